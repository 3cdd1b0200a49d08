//! Storage for classification results.
//!
//! Batches are persisted as they complete so a crash or cancellation
//! mid-run keeps partial progress; consolidation later replaces the raw
//! per-batch records with the merged set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crawler::SessionId;

use crate::error::{AnalysisError, Result};
use crate::records::{AnalyticsEvent, BatchClassification, TechStackItem};

/// All classification records accumulated for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionClassifications {
    pub tech_stack: Vec<TechStackItem>,
    pub analytics_events: Vec<AnalyticsEvent>,
}

/// Storage trait for classification results.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Append one batch's output. Called immediately after each batch.
    async fn append_batch(&self, session_id: SessionId, batch: &BatchClassification)
        -> Result<()>;

    /// Everything recorded for a session.
    async fn list(&self, session_id: SessionId) -> Result<SessionClassifications>;

    /// Replace all records with a consolidated set.
    async fn replace(&self, session_id: SessionId, records: SessionClassifications) -> Result<()>;

    /// Drop a session's records.
    async fn clear(&self, session_id: SessionId) -> Result<()>;

    /// Drop every session (process-epoch wipe).
    async fn clear_all(&self) -> Result<()>;
}

/// In-memory classification store.
#[derive(Default)]
pub struct MemoryClassificationStore {
    sessions: RwLock<HashMap<SessionId, SessionClassifications>>,
}

impl MemoryClassificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClassificationStore for MemoryClassificationStore {
    async fn append_batch(
        &self,
        session_id: SessionId,
        batch: &BatchClassification,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap();
        let records = sessions.entry(session_id).or_default();
        records.tech_stack.extend(batch.tech_stack.iter().cloned());
        records
            .analytics_events
            .extend(batch.analytics_events.iter().cloned());
        Ok(())
    }

    async fn list(&self, session_id: SessionId) -> Result<SessionClassifications> {
        Ok(self
            .sessions
            .read()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, session_id: SessionId, records: SessionClassifications) -> Result<()> {
        self.sessions.write().unwrap().insert(session_id, records);
        Ok(())
    }

    async fn clear(&self, session_id: SessionId) -> Result<()> {
        self.sessions.write().unwrap().remove(&session_id);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.sessions.write().unwrap().clear();
        Ok(())
    }
}

/// Classification store persisted as one JSONL file of batches per session.
///
/// Each appended batch is one line, so partial progress survives a crash;
/// `replace` rewrites the file with a single consolidated line.
pub struct JsonlClassificationStore {
    dir: PathBuf,
}

impl JsonlClassificationStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        Ok(Self { dir })
    }

    fn session_path(&self, session_id: SessionId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", session_id))
    }
}

#[async_trait]
impl ClassificationStore for JsonlClassificationStore {
    async fn append_batch(
        &self,
        session_id: SessionId,
        batch: &BatchClassification,
    ) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let line =
            serde_json::to_string(batch).map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.session_path(session_id))
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        Ok(())
    }

    async fn list(&self, session_id: SessionId) -> Result<SessionClassifications> {
        let content = match tokio::fs::read_to_string(self.session_path(session_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionClassifications::default())
            }
            Err(e) => return Err(AnalysisError::Storage(Box::new(e))),
        };

        let mut records = SessionClassifications::default();
        for line in content.lines() {
            match serde_json::from_str::<BatchClassification>(line) {
                Ok(batch) => {
                    records.tech_stack.extend(batch.tech_stack);
                    records.analytics_events.extend(batch.analytics_events);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping corrupt classification line");
                }
            }
        }
        Ok(records)
    }

    async fn replace(&self, session_id: SessionId, records: SessionClassifications) -> Result<()> {
        let batch = BatchClassification {
            tech_stack: records.tech_stack,
            analytics_events: records.analytics_events,
        };
        let line =
            serde_json::to_string(&batch).map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        let path = self.session_path(session_id);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, format!("{line}\n"))
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        Ok(())
    }

    async fn clear(&self, session_id: SessionId) -> Result<()> {
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AnalysisError::Storage(Box::new(e))),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AnalysisError::Storage(Box::new(e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}
