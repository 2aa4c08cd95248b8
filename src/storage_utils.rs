use crate::error::StoreError;
use crate::forecast::ForecastResult;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Artifact name for a (symbol, period). Readers derive the same path
/// without talking to the pipeline.
pub fn artifact_name(symbol: &str, period: &str) -> String {
    format!("{}_{}", symbol, period)
}

// RESULT STORE

#[derive(Debug, Clone)]
pub struct ResultStore {
    // Directory holding one artifact per (symbol, period), e.g. "data"
    pub base_dir: PathBuf,
}

impl ResultStore {
    /// Creates the store, and its directory if it does not exist yet, so
    /// publishing never has to check for it.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn artifact_path(&self, symbol: &str, period: &str) -> PathBuf {
        self.base_dir.join(artifact_name(symbol, period))
    }

    /// Replaces the artifact for (symbol, period) with `result`.
    ///
    /// Bytes go to a sibling `.tmp` file first and are renamed over the
    /// artifact once flushed, so readers see either the previous result or
    /// this one, never a partial write.
    pub async fn publish(&self, symbol: &str, period: &str, result: &ForecastResult) -> Result<(), StoreError> {
        let final_path = self.artifact_path(symbol, period);
        let tmp_path = self
            .base_dir
            .join(format!("{}.tmp", artifact_name(symbol, period)));

        let json_bytes = serde_json::to_vec(result)?;

        // 1. Write and flush the temporary file
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json_bytes).await?;
        file.sync_all().await?;
        drop(file);

        // 2. Atomically swap it into place
        fs::rename(&tmp_path, &final_path).await?;

        Ok(())
    }

    /// The current artifact, or `None` if no cycle has published one yet.
    pub async fn load(&self, symbol: &str, period: &str) -> Result<Option<ForecastResult>, StoreError> {
        let content = match fs::read(self.artifact_path(symbol, period)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&content)?))
    }

    /// When the artifact was last replaced.
    pub async fn updated_at(&self, symbol: &str, period: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        match fs::metadata(self.artifact_path(symbol, period)).await {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn result_with(level: f64, points: usize) -> ForecastResult {
        ForecastResult {
            labels: (0..points).map(|i| format!("01-01 00:{:02}", i % 60)).collect(),
            trend: vec![level; points],
            trend_upper_width: vec![0.0; points],
            trend_lower: vec![level; points],
            origin: vec![level; points / 2],
        }
    }

    #[test]
    fn test_artifact_name_is_deterministic() {
        assert_eq!(artifact_name("btcusdt", "1day"), "btcusdt_1day");
        assert_eq!(artifact_name("btcusdt", "1day"), artifact_name("btcusdt", "1day"));
    }

    #[tokio::test]
    async fn test_missing_artifact_loads_as_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(temp_dir.path().join("nested/data")).await.unwrap();

        assert!(store.load("btcusdt", "1day").await.unwrap().is_none());
        assert!(store.updated_at("btcusdt", "1day").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_publish_replaces_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(temp_dir.path()).await.unwrap();

        let first = result_with(1.0, 10);
        let second = result_with(2.0, 20);
        store.publish("ethusdt", "60min", &first).await.unwrap();
        store.publish("ethusdt", "60min", &second).await.unwrap();

        assert_eq!(store.load("ethusdt", "60min").await.unwrap(), Some(second));
        assert!(store.updated_at("ethusdt", "60min").await.unwrap().is_some());

        // only the artifact remains, no leftover temp file
        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["ethusdt_60min"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reader_never_sees_partial_artifact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(temp_dir.path()).await.unwrap();

        // Large enough that a non-atomic write would be observable mid-way.
        let small = result_with(1.0, 2_000);
        let large = result_with(2.0, 20_000);
        store.publish("btcusdt", "15min", &small).await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let done = Arc::clone(&done);
            let (small, large) = (small.clone(), large.clone());
            tokio::spawn(async move {
                let mut reads = 0usize;
                loop {
                    let seen = store.load("btcusdt", "15min").await.unwrap().unwrap();
                    assert!(seen == small || seen == large);
                    reads += 1;
                    if done.load(Ordering::Relaxed) {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..50 {
            let next = if i % 2 == 0 { &large } else { &small };
            store.publish("btcusdt", "15min", next).await.unwrap();
        }
        store.publish("btcusdt", "15min", &large).await.unwrap();
        done.store(true, Ordering::Relaxed);

        let reads = reader.await.unwrap();
        assert!(reads > 0);
        assert_eq!(store.load("btcusdt", "15min").await.unwrap(), Some(large));
    }
}
