use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;

use super::{Graph, GraphSnapshot};

/// Durable home of the graph. `persist` receives the full post-transaction state.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn load(&self) -> anyhow::Result<Option<GraphSnapshot>>;
    async fn persist(&self, graph: &Graph) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

#[async_trait]
impl GraphBackend for MemoryBackend {
    async fn load(&self) -> anyhow::Result<Option<GraphSnapshot>> {
        Ok(None)
    }

    async fn persist(&self, _graph: &Graph) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps the graph as `graph.json` under `base_dir`, replaced atomically on every commit.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    base_dir: PathBuf,
}

impl LocalFsBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.base_dir.join("graph.json")
    }
}

#[async_trait]
impl GraphBackend for LocalFsBackend {
    async fn load(&self) -> anyhow::Result<Option<GraphSnapshot>> {
        let path = self.snapshot_path();
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn persist(&self, graph: &Graph) -> anyhow::Result<()> {
        let snapshot = graph.to_snapshot();
        write_json_atomic(&self.snapshot_path(), &snapshot)
            .await
            .context("write graph.json")
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
