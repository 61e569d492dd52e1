use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

use super::types::{StateStore, StoreError};

/// One document per key in a directory.
///
/// File names are the hex SHA-256 of the key plus `.json`: one fixed-length
/// path component whatever the key contains.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir`, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.json", hash))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_state(&self, key: &str, state: &[u8]) -> Result<(), StoreError> {
        atomic_write(&self.path_for(key), state).await
    }
}

/// Distinguishes temp files of writes started in the same nanosecond.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write to a fresh temp file next to `dst`, sync, then rename over `dst`.
async fn atomic_write(dst: &Path, content: &[u8]) -> Result<(), StoreError> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let sequence = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let temp_path = dst.with_extension(format!(
        "tmp.{}.{:016x}.{}",
        std::process::id(),
        nanos,
        sequence
    ));

    let result: std::io::Result<()> = async {
        let mut temp_file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true) // Fails if the path exists (no symlink race)
            .open(&temp_path)
            .await?;
        temp_file.write_all(content).await?;
        temp_file.sync_all().await?;
        drop(temp_file);
        tokio::fs::rename(&temp_path, dst).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        tracing::warn!(path = %dst.display(), error = %e, "Failed to write state file");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("states")).await.unwrap();

        assert_eq!(store.load_state("http://example.org/feed").await.unwrap(), None);
        store
            .store_state("http://example.org/feed", b"{\"version\":1}")
            .await
            .unwrap();
        assert_eq!(
            store.load_state("http://example.org/feed").await.unwrap(),
            Some(b"{\"version\":1}".to_vec())
        );
    }

    #[tokio::test]
    async fn test_key_maps_to_single_component() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let path = store.path_for("../escape");
        assert_eq!(path.parent(), Some(dir.path()));

        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert_eq!(name.len(), 64 + ".json".len());
        assert!(name.ends_with(".json"));
        assert_ne!(store.path_for("../escape"), store.path_for("../escapf"));
    }

    #[tokio::test]
    async fn test_long_keys_fit_in_a_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let key = format!("https://example.org/{}", "segment/".repeat(40));
        assert!(key.len() > 255);

        store.store_state(&key, b"state").await.unwrap();
        assert_eq!(store.load_state(&key).await.unwrap(), Some(b"state".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let writes = (0..16u8).map(|i| {
            let store = store.clone();
            async move { store.store_state("shared", &[i]).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let state = store.load_state("shared").await.unwrap().unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store_state("k", b"one").await.unwrap();
        store.store_state("k", b"two").await.unwrap();

        assert_eq!(store.load_state("k").await.unwrap(), Some(b"two".to_vec()));
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
