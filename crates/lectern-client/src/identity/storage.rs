// Session token persistence.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Key under which the session token is persisted.
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("token storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("token storage at {path} is not a JSON key/value document: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Key/value persistence for session state.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn load(&self, key: &str) -> StorageResult<Option<String>>;
    async fn save(&self, key: &str, value: &str) -> StorageResult<()>;
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(TOKEN_KEY.to_string(), token.into());
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// JSON document on disk, e.g. `{"token": "<jwt>"}`.
///
/// Writes go to a sibling temp file and are renamed into place. A missing file
/// reads as empty.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> StorageResult<BTreeMap<String, String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|source| StorageError::Format {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_document(&self, document: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let encoded = serde_json::to_vec_pretty(document).map_err(|source| StorageError::Format {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, encoded)
            .await
            .map_err(|source| self.io_error(source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_document().await?.remove(key))
    }

    async fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value.to_string());
        self.write_document(&document).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let document = match self.read_document().await {
            Ok(mut document) => {
                if document.remove(key).is_none() {
                    return Ok(());
                }
                document
            }
            // Unreadable documents are replaced with an empty one.
            Err(StorageError::Format { .. }) => BTreeMap::new(),
            Err(err) => return Err(err),
        };
        self.write_document(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryTokenStorage::new();
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
        storage.save(TOKEN_KEY, "a.b.c").await.expect("save");
        assert_eq!(
            storage.load(TOKEN_KEY).await.expect("load").as_deref(),
            Some("a.b.c")
        );
        storage.remove(TOKEN_KEY).await.expect("remove");
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
    }

    #[tokio::test]
    async fn file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileTokenStorage::new(dir.path().join("nested/session.json"));
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
        storage.remove(TOKEN_KEY).await.expect("remove on missing file");
        assert!(!storage.path().exists());
    }

    #[tokio::test]
    async fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/session.json");
        FileTokenStorage::new(&path)
            .save(TOKEN_KEY, "a.b.c")
            .await
            .expect("save");

        let reopened = FileTokenStorage::new(&path);
        assert_eq!(
            reopened.load(TOKEN_KEY).await.expect("load").as_deref(),
            Some("a.b.c")
        );
        let raw = std::fs::read_to_string(&path).expect("read");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["token"], "a.b.c");

        reopened.remove(TOKEN_KEY).await.expect("remove");
        assert_eq!(reopened.load(TOKEN_KEY).await.expect("load"), None);
    }

    #[tokio::test]
    async fn file_storage_keeps_unrelated_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"theme": "dark"}"#).expect("seed");
        let storage = FileTokenStorage::new(&path);
        storage.save(TOKEN_KEY, "a.b.c").await.expect("save");
        storage.remove(TOKEN_KEY).await.expect("remove");
        assert_eq!(
            storage.load("theme").await.expect("load").as_deref(),
            Some("dark")
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_a_format_error_and_can_be_cleared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").expect("seed");
        let storage = FileTokenStorage::new(&path);
        let err = storage.load(TOKEN_KEY).await.expect_err("corrupt");
        assert!(matches!(err, StorageError::Format { .. }));

        storage.remove(TOKEN_KEY).await.expect("remove");
        assert_eq!(storage.load(TOKEN_KEY).await.expect("load"), None);
    }
}
