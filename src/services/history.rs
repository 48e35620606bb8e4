use crate::error::PersistenceError;
use crate::models::HistoryRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Destination for finished runs. Failures here never invalidate a Document.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn save(&self, record: &HistoryRecord) -> Result<(), PersistenceError>;
    async fn list(&self) -> Result<Vec<HistoryRecord>, PersistenceError>;
}

#[derive(Default)]
pub struct InMemoryHistory {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn save(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        Ok(self.records.read().await.clone())
    }
}

/// One pretty-printed JSON file per record, named after the record id.
pub struct JsonFileHistory {
    dir: PathBuf,
}

impl JsonFileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileHistory { dir: dir.into() }
    }
}

#[async_trait]
impl HistorySink for JsonFileHistory {
    async fn save(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", record.id));
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "history record written");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        records.sort_by(|a: &HistoryRecord, b| b.generation_date.cmp(&a.generation_date));
        Ok(records)
    }
}
