//! Long-term memory of past interactions

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Metadata stored alongside a remembered interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub intent_confidence: f64,
    pub research_confidence: f64,
    pub mode: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

/// One remembered interaction (a line in the JSONL store)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub text: String,
    pub metadata: MemoryMetadata,
}

/// Best-effort store of past interactions
#[async_trait]
pub trait Memory: Send + Sync {
    async fn add(&self, text: &str, metadata: MemoryMetadata) -> Result<()>;

    /// Up to `n` remembered texts most relevant to `query`
    async fn get_context(&self, query: &str, n: usize) -> Result<Vec<String>>;
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Rank records by how many query keywords they share; newer records win ties.
fn rank<'a>(records: impl DoubleEndedIterator<Item = &'a MemoryRecord>, query: &str, n: usize) -> Vec<String> {
    let wanted = keywords(query);
    if wanted.is_empty() || n == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &MemoryRecord)> = records
        .rev()
        .filter_map(|record| {
            let score = keywords(&record.text).intersection(&wanted).count();
            (score > 0).then_some((score, record))
        })
        .collect();
    // Stable sort keeps newest-first order among equal scores
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(n)
        .map(|(_, record)| record.text.clone())
        .collect()
}

/// Memory persisted as one JSON record per line
pub struct JsonlMemory {
    path: PathBuf,
}

impl JsonlMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn load(&self) -> Result<Vec<MemoryRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Memory(format!("{}: {}", self.path.display(), e))),
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping malformed memory line {}: {}", line_no + 1, e);
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Memory for JsonlMemory {
    async fn add(&self, text: &str, metadata: MemoryMetadata) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let record = MemoryRecord {
            text: text.to_string(),
            metadata,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get_context(&self, query: &str, n: usize) -> Result<Vec<String>> {
        let records = self.load().await?;
        Ok(rank(records.iter(), query, n))
    }
}

/// Memory held in process, lost on exit
#[derive(Default)]
pub struct InMemoryMemory {
    records: Mutex<Vec<MemoryRecord>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MemoryRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn add(&self, text: &str, metadata: MemoryMetadata) -> Result<()> {
        self.records.lock().push(MemoryRecord {
            text: text.to_string(),
            metadata,
        });
        Ok(())
    }

    async fn get_context(&self, query: &str, n: usize) -> Result<Vec<String>> {
        let records = self.records.lock();
        Ok(rank(records.iter(), query, n))
    }
}
