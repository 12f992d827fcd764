//! Keyed document storage for student records.

pub mod memory;
pub mod sqlite;

mod migrations;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Schemaless JSON object stored under a `(collection, key)` pair.
pub type Document = Map<String, Value>;

pub const STUDENTS_COLLECTION: &str = "students";

/// Document store capability.
///
/// `update` merges the given top-level fields into an existing document and
/// fails when the document does not exist; `set` replaces or creates.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    async fn set(&self, collection: &str, key: &str, document: Document) -> Result<()>;

    async fn update(&self, collection: &str, key: &str, partial: Document) -> Result<()>;
}

/// Shallow merge used by `update` implementations.
pub(crate) fn merge_fields(target: &mut Document, partial: Document) {
    for (field, value) in partial {
        target.insert(field, value);
    }
}
