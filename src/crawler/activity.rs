//! Append-only record of what happened to each frontier entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::crawler::error::CrawlError;

/// File name of the log inside the output root
pub const ACTIVITY_FILE: &str = "crawl-activity.jsonl";

/// Final outcome of one frontier entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Fetched and at least one region written
    Fetched,
    /// Fetched but nothing to keep (non-HTML or no content region)
    Skipped,
    /// Fetch or write failed
    Failed,
}

/// One line of the activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub url: Url,
    pub depth: u32,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub records: usize,
}

impl ActivityRecord {
    pub fn new(url: &Url, depth: u32, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.clone(),
            depth,
            outcome,
            reason: None,
            records: 0,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }
}

/// JSON-lines writer opened in append mode
#[derive(Debug)]
pub struct ActivityLog {
    path: PathBuf,
    file: File,
}

impl ActivityLog {
    /// Open (or create) the log under `root`
    pub async fn open(root: &Path) -> Result<Self, CrawlError> {
        let path = root.join(ACTIVITY_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it
    pub async fn append(&mut self, record: &ActivityRecord) -> Result<(), CrawlError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Read every record from a log file
    pub async fn read_all(path: &Path) -> Result<Vec<ActivityRecord>, CrawlError> {
        let text = tokio::fs::read_to_string(path).await?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(CrawlError::from))
            .collect()
    }
}
