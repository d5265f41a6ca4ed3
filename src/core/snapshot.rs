//! 运行快照持久化
//!
//! 每个阶段 / 每个任务完成后把共享状态写成一个 JSON 文件：`<root>/<run_id>/<seq>_<label>.json`。
//! 快照只是副作用，写入失败由调用方记录日志后继续运行。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::state::SharedState;

#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
    seq: AtomicUsize,
}

impl SnapshotStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            seq: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 写入一份快照；父目录不存在时自动创建
    pub fn save(&self, state: &SharedState, label: &str) -> anyhow::Result<PathBuf> {
        let dir = self.root.join(&state.run_id);
        std::fs::create_dir_all(&dir)?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{:03}_{}.json", seq, sanitize(label)));
        std::fs::write(&path, serde_json::to_string_pretty(state)?)?;
        Ok(path)
    }

    /// 写快照，失败只告警
    pub fn save_or_warn(&self, state: &SharedState, label: &str) {
        match self.save(state, label) {
            Ok(path) => tracing::debug!("Snapshot '{}' written to {}", label, path.display()),
            Err(e) => tracing::warn!("Failed to write snapshot '{}': {}", label, e),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<SharedState> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}
