use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{merge_fields, Document, DocumentStore};

/// Process-local document store.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<(String, String), Document>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set`/`update` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Seeds a document without counting it as a write.
    pub async fn insert(&self, collection: &str, key: &str, document: Document) {
        self.documents
            .write()
            .await
            .insert((collection.to_string(), key.to_string()), document);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, collection: &str, key: &str, document: Document) -> Result<()> {
        self.documents
            .write()
            .await
            .insert((collection.to_string(), key.to_string()), document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, collection: &str, key: &str, partial: Document) -> Result<()> {
        let mut documents = self.documents.write().await;
        let existing = documents
            .get_mut(&(collection.to_string(), key.to_string()))
            .ok_or_else(|| anyhow!("no document to update: {collection}/{key}"))?;
        merge_fields(existing, partial);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
