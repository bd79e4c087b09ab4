//! Report artifacts written after each answered query

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Destination for finished reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist a report, returning where it went
    async fn write(&self, report: &str) -> Result<String>;
}

/// Writes `research_report_{YYYYmmdd_HHMMSS_mmm}.md` files into a directory, never overwriting one
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Report file name; `attempt` disambiguates reports finished in the same millisecond
    pub fn file_name(now: chrono::DateTime<chrono::Local>, attempt: u32) -> String {
        let stamp = now.format("%Y%m%d_%H%M%S_%3f");
        if attempt == 0 {
            format!("research_report_{}.md", stamp)
        } else {
            format!("research_report_{}_{}.md", stamp, attempt)
        }
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn write(&self, report: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let now = chrono::Local::now();
        let mut attempt = 0;
        loop {
            let path = self.dir.join(Self::file_name(now, attempt));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(report.as_bytes()).await?;
                    file.flush().await?;
                    return Ok(path.display().to_string());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
