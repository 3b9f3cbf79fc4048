use crate::store::Repository;
use async_trait::async_trait;
use labcore::StoreError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// One JSON file per entity under `<root>/<kind>/<id>.json`.
///
/// Shared by the serving process and its out-of-process workers, so writes
/// go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root.join(kind)
    }

    fn document_path(&self, kind: &str, id: Uuid) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", id))
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn put(&self, kind: &str, id: Uuid, document: serde_json::Value) -> Result<(), StoreError> {
        let dir = self.kind_dir(kind);
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(&document)?;
        let tmp = dir.join(format!(".{}.{}.tmp", id, Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.document_path(kind, id)).await?;
        Ok(())
    }

    async fn get(&self, kind: &str, id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        match tokio::fs::read(self.document_path(kind, id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, kind: &str, id: Uuid) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.document_path(kind, id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, kind: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.kind_dir(kind)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_document {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => documents.push(serde_json::from_slice(&bytes)?),
                // deleted between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(documents)
    }
}
