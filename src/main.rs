//! Tutorflow 命令行入口
//!
//! 加载配置、初始化日志、组装流水线并运行一次，结果以 JSON 打印到 stdout。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tutorflow::config::load_config;
use tutorflow::core::{
    create_llm_from_config, create_pipeline, GroundedContext, StaticGrounding, UserProfile,
};
use tutorflow::llm::{LlmClient, MockLlmClient};
use tutorflow::observability;
use tutorflow::plan::{PlanSource, StaticPlan};

#[derive(Parser, Debug)]
#[command(name = "tutorflow")]
#[command(about = "Exam question generation pipeline")]
#[command(version)]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
    /// 用给定的计划 JSON 代替 Planner 输出（仍经过校验 / 修复 / 兜底）
    #[arg(long)]
    plan: Option<PathBuf>,
    /// 预置的 grounding 结果 JSON
    #[arg(long)]
    context: Option<PathBuf>,
    #[arg(long = "class")]
    class_level: String,
    #[arg(long)]
    board: String,
    #[arg(long)]
    exam: String,
    /// 输入内容（图片描述或原文）
    #[arg(long, default_value = "")]
    image: String,
    /// 使用 Mock LLM，离线运行
    #[arg(long)]
    mock: bool,
}

impl Cli {
    fn profile(&self) -> UserProfile {
        UserProfile {
            class_level: self.class_level.clone(),
            board: self.board.clone(),
            target_exam: self.exam.clone(),
        }
    }
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    observability::init(&cfg.logging.level, cfg.logging.json);
    tracing::info!("{} starting", cfg.app.name.as_deref().unwrap_or("tutorflow"));

    let llm: Arc<dyn LlmClient> = if args.mock {
        Arc::new(MockLlmClient::new())
    } else {
        create_llm_from_config(&cfg.llm).context("Failed to create LLM client")?
    };

    let grounded = match &args.context {
        Some(path) => serde_json::from_value::<GroundedContext>(read_json(path)?)
            .context("Invalid grounded context")?,
        None => GroundedContext::default(),
    };
    let planner: Option<Arc<dyn PlanSource>> = match &args.plan {
        Some(path) => Some(Arc::new(StaticPlan(read_json(path)?))),
        None => None,
    };

    let pipeline = create_pipeline(&cfg, llm, Arc::new(StaticGrounding(grounded)), planner);
    let output = pipeline
        .run(args.profile(), args.image.clone())
        .await
        .context("Pipeline run failed")?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_args() {
        let cli = Cli::try_parse_from([
            "tutorflow", "--class", "11", "--board", "CBSE", "--exam", "NEET", "--plan", "plan.json", "--mock",
        ])
        .unwrap();
        assert_eq!(cli.profile().target_exam, "NEET");
        assert_eq!(cli.profile().class_level, "11");
        assert_eq!(cli.plan, Some(PathBuf::from("plan.json")));
        assert!(cli.mock);
        assert!(cli.image.is_empty());
    }

    #[test]
    fn test_parse_rejects_incomplete_args() {
        assert!(Cli::try_parse_from(["tutorflow", "--class", "11"]).is_err());
        assert!(Cli::try_parse_from([
            "tutorflow", "--class", "11", "--board", "B", "--exam", "E", "--wat", "x"
        ])
        .is_err());
    }
}
