use async_trait::async_trait;
use labcore::{StoreError, User};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence boundary. Documents are plain JSON keyed by kind and id.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn put(&self, kind: &str, id: Uuid, document: serde_json::Value) -> Result<(), StoreError>;

    async fn get(&self, kind: &str, id: Uuid) -> Result<Option<serde_json::Value>, StoreError>;

    /// Returns whether something was deleted
    async fn delete(&self, kind: &str, id: Uuid) -> Result<bool, StoreError>;

    async fn list(&self, kind: &str) -> Result<Vec<serde_json::Value>, StoreError>;
}

/// Anything the engine persists
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;

    fn entity_id(&self) -> Uuid;
}

/// Typed helpers over any [`Repository`]
#[async_trait]
pub trait RepositoryExt: Repository {
    async fn save<E: Entity>(&self, entity: &E) -> Result<(), StoreError> {
        let document = serde_json::to_value(entity)?;
        self.put(E::KIND, entity.entity_id(), document).await
    }

    async fn get_by_id<E: Entity>(&self, id: Uuid) -> Result<Option<E>, StoreError> {
        match self.get(E::KIND, id).await? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    async fn delete_by_id<E: Entity>(&self, id: Uuid) -> Result<bool, StoreError> {
        self.delete(E::KIND, id).await
    }

    async fn list_all<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        self.list(E::KIND)
            .await?
            .into_iter()
            .map(|document| serde_json::from_value(document).map_err(StoreError::from))
            .collect()
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

impl Entity for User {
    const KIND: &'static str = "user";

    fn entity_id(&self) -> Uuid {
        self.id
    }
}

/// Volatile repository for tests and single-shot runs
#[derive(Default)]
pub struct MemoryRepository {
    documents: RwLock<HashMap<(String, Uuid), serde_json::Value>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn put(&self, kind: &str, id: Uuid, document: serde_json::Value) -> Result<(), StoreError> {
        self.documents
            .write()
            .await
            .insert((kind.to_string(), id), document);
        Ok(())
    }

    async fn get(&self, kind: &str, id: Uuid) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .get(&(kind.to_string(), id))
            .cloned())
    }

    async fn delete(&self, kind: &str, id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .documents
            .write()
            .await
            .remove(&(kind.to_string(), id))
            .is_some())
    }

    async fn list(&self, kind: &str) -> Result<Vec<serde_json::Value>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|(_, document)| document.clone())
            .collect())
    }
}
