//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TUTORFLOW__*` 覆盖（双下划线表示嵌套，如 `TUTORFLOW__LLM__PROVIDER=openai`）。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::resilience::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub llm: LlmSection,
    pub resilience: ResilienceSection,
}

/// [app] 段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 快照目录；未设置时不写快照
    pub snapshot_dir: Option<PathBuf>,
}

/// [logging] 段；RUST_LOG 优先于 level
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
        }
    }
}

/// [resilience] 段：阶段与能力调用的重试 / 超时
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSection {
    /// 两次尝试之间的固定间隔（毫秒）
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// 阶段名（multimodal / planner）→ 重试次数
    #[serde(default = "default_node_retries")]
    pub node_retries: BTreeMap<String, u32>,
    /// 阶段名 → 单次尝试超时（秒），0 表示不限时
    #[serde(default = "default_node_timeouts")]
    pub node_timeout_secs: BTreeMap<String, u64>,
    #[serde(default = "default_capability_retries")]
    pub capability_retries: u32,
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
}

pub const NODE_MULTIMODAL: &str = "multimodal";
pub const NODE_PLANNER: &str = "planner";

const DEFAULT_NODE_RETRIES: u32 = 1;
const DEFAULT_NODE_TIMEOUT_SECS: u64 = 60;

fn default_node_retries() -> BTreeMap<String, u32> {
    BTreeMap::from([
        (NODE_MULTIMODAL.to_string(), DEFAULT_NODE_RETRIES),
        (NODE_PLANNER.to_string(), DEFAULT_NODE_RETRIES),
    ])
}

fn default_node_timeouts() -> BTreeMap<String, u64> {
    BTreeMap::from([
        (NODE_MULTIMODAL.to_string(), DEFAULT_NODE_TIMEOUT_SECS),
        (NODE_PLANNER.to_string(), DEFAULT_NODE_TIMEOUT_SECS),
    ])
}

fn default_capability_retries() -> u32 {
    1
}

fn default_capability_timeout_secs() -> u64 {
    120
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            retry_delay_ms: 0,
            node_retries: default_node_retries(),
            node_timeout_secs: default_node_timeouts(),
            capability_retries: default_capability_retries(),
            capability_timeout_secs: default_capability_timeout_secs(),
        }
    }
}

impl ResilienceSection {
    fn policy(&self, retries: u32, timeout_secs: u64) -> RetryPolicy {
        let policy = RetryPolicy::new()
            .with_retries(retries)
            .with_delay(Duration::from_millis(self.retry_delay_ms));
        if timeout_secs == 0 {
            policy
        } else {
            policy.with_timeout(Duration::from_secs(timeout_secs))
        }
    }

    /// 阶段策略；未配置的阶段用默认值
    pub fn node_policy(&self, node: &str) -> RetryPolicy {
        let retries = self
            .node_retries
            .get(node)
            .copied()
            .unwrap_or(DEFAULT_NODE_RETRIES);
        let timeout = self
            .node_timeout_secs
            .get(node)
            .copied()
            .unwrap_or(DEFAULT_NODE_TIMEOUT_SECS);
        self.policy(retries, timeout)
    }

    /// 所有能力共用的策略
    pub fn capability_policy(&self) -> RetryPolicy {
        self.policy(self.capability_retries, self.capability_timeout_secs)
    }
}

/// 加载配置，环境变量 TUTORFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TUTORFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignored", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TUTORFLOW")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.llm.provider, "deepseek");

        let planner = cfg.resilience.node_policy(NODE_PLANNER);
        assert_eq!(planner.retries, 1);
        assert_eq!(planner.timeout, Some(Duration::from_secs(60)));

        let capability = cfg.resilience.capability_policy();
        assert_eq!(capability.retries, 1);
        assert_eq!(capability.timeout, Some(Duration::from_secs(120)));
        assert!(capability.delay.is_zero());
    }

    #[test]
    fn test_unknown_node_and_zero_timeout() {
        let section = ResilienceSection {
            capability_timeout_secs: 0,
            ..ResilienceSection::default()
        };
        assert_eq!(section.capability_policy().timeout, None);
        assert_eq!(section.node_policy("other").retries, DEFAULT_NODE_RETRIES);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[app]
name = "tutor-dev"
snapshot_dir = "snapshots"

[resilience]
retry_delay_ms = 250
capability_retries = 3

[resilience.node_retries]
planner = 2
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.name.as_deref(), Some("tutor-dev"));
        assert_eq!(cfg.app.snapshot_dir, Some(PathBuf::from("snapshots")));
        assert_eq!(cfg.resilience.capability_retries, 3);
        assert_eq!(cfg.resilience.capability_policy().delay, Duration::from_millis(250));
        assert_eq!(cfg.resilience.node_policy(NODE_PLANNER).retries, 2);
        // 只覆盖了 planner，multimodal 的重试次数回落到默认
        assert_eq!(cfg.resilience.node_policy(NODE_MULTIMODAL).retries, 1);
    }
}
