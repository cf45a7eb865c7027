//! Local annotation stores.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use folio_core::{AnnotationRecord, AnnotationStore, Result};

/// In-memory store, one record set per document.
#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    documents: RwLock<HashMap<String, Vec<AnnotationRecord>>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one document's records.
    pub fn with_records(document_id: impl Into<String>, records: Vec<AnnotationRecord>) -> Self {
        let mut documents = HashMap::new();
        documents.insert(document_id.into(), records);
        Self {
            documents: RwLock::new(documents),
        }
    }
}

#[async_trait]
impl AnnotationStore for MemoryAnnotationStore {
    async fn get(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        Ok(self
            .documents
            .read()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put(&self, document_id: &str, records: Vec<AnnotationRecord>) -> Result<()> {
        self.documents
            .write()
            .await
            .insert(document_id.to_string(), records);
        Ok(())
    }
}

/// JSON-file store: one `<document>.json` file per document under `root`.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash mid-write leaves the previous set intact.
#[derive(Debug, Clone)]
pub struct FileAnnotationStore {
    root: PathBuf,
}

impl FileAnnotationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding `document_id`'s records. Bytes outside `[A-Za-z0-9._-]`
    /// are percent-encoded so any id maps to a single safe file name.
    pub fn path_for(&self, document_id: &str) -> PathBuf {
        let mut name = String::with_capacity(document_id.len() + 5);
        for b in document_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && !name.is_empty())
            {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        name.push_str(".json");
        self.root.join(name)
    }
}

#[async_trait]
impl AnnotationStore for FileAnnotationStore {
    async fn get(&self, document_id: &str) -> Result<Vec<AnnotationRecord>> {
        let path = self.path_for(document_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, document_id: &str, records: Vec<AnnotationRecord>) -> Result<()> {
        let path = self.path_for(document_id);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&records)?;

        tokio::fs::create_dir_all(&self.root).await?;
        if let Err(e) = tokio::fs::write(&temp_path, &json).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp_path, &path).await?;

        debug!(
            document_id,
            record_count = records.len(),
            byte_len = json.len(),
            "Local annotations written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(doc: &str) -> Vec<AnnotationRecord> {
        vec![
            AnnotationRecord::new(doc, "cfi-a", "first").with_timestamps(1, 2),
            AnnotationRecord::new(doc, "cfi-b", "second")
                .with_note("remember this")
                .with_timestamps(3, 4),
        ]
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryAnnotationStore::new();
        assert!(store.get("doc").await.unwrap().is_empty());

        let records = sample("doc");
        store.put("doc", records.clone()).await.unwrap();
        assert_eq!(store.get("doc").await.unwrap(), records);
        assert!(store.get("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_put_replaces() {
        let records = sample("doc");
        let store = MemoryAnnotationStore::with_records("doc", records.clone());
        assert_eq!(store.get("doc").await.unwrap(), records);

        store.put("doc", records[..1].to_vec()).await.unwrap();
        assert_eq!(store.get("doc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAnnotationStore::new(dir.path().join("annotations"));

        assert!(store.get("book-1").await.unwrap().is_empty());

        let records = sample("book-1");
        store.put("book-1", records.clone()).await.unwrap();
        assert_eq!(store.get("book-1").await.unwrap(), records);
        assert!(store.path_for("book-1").exists());
        assert!(!store.path_for("book-1").with_extension("json.tmp").exists());

        store.put("book-1", Vec::new()).await.unwrap();
        assert!(store.get("book-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAnnotationStore::new(dir.path());
        std::fs::write(store.path_for("doc"), b"{not json").unwrap();
        assert!(matches!(
            store.get("doc").await,
            Err(folio_core::Error::Serialization(_))
        ));
    }

    #[test]
    fn test_path_for_encodes_unsafe_ids() {
        let store = FileAnnotationStore::new("/data");
        assert_eq!(store.path_for("book-1"), PathBuf::from("/data/book-1.json"));
        assert_eq!(
            store.path_for("../etc/passwd"),
            PathBuf::from("/data/%2E.%2Fetc%2Fpasswd.json")
        );
        assert_eq!(store.path_for("a b"), PathBuf::from("/data/a%20b.json"));
    }
}
