//! Durable snapshots of workflow state, keyed by session

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{
    error::{Error, Result},
    state::AgentState,
};

/// Stores the latest state snapshot per session
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, session: &str) -> Result<Option<AgentState>>;

    async fn save(&self, session: &str, state: &AgentState) -> Result<()>;

    /// Forget a session. Deleting an unknown session is not an error.
    async fn delete(&self, session: &str) -> Result<()>;
}

/// One JSON file per session under a directory
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session: &str) -> PathBuf {
        let name: String = session
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, session: &str) -> Result<Option<AgentState>> {
        let path = self.path_for(session);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Checkpoint(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Checkpoint(format!("{}: {}", path.display(), e)))
    }

    async fn save(&self, session: &str, state: &AgentState) -> Result<()> {
        let path = self.path_for(session);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(state)?;

        let write = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&tmp, &content).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        write
            .await
            .map_err(|e| Error::Checkpoint(format!("{}: {}", path.display(), e)))
    }

    async fn delete(&self, session: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(session)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Checkpoint(e.to_string())),
        }
    }
}

/// Checkpoints held in process
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<String, AgentState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session: &str) -> Result<Option<AgentState>> {
        Ok(self.states.lock().get(session).cloned())
    }

    async fn save(&self, session: &str, state: &AgentState) -> Result<()> {
        self.states.lock().insert(session.to_string(), state.clone());
        Ok(())
    }

    async fn delete(&self, session: &str) -> Result<()> {
        self.states.lock().remove(session);
        Ok(())
    }
}
