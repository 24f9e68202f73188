use litesearch_core::{Document, Index, Page, Predicate, QueryResult, Result, StoreError};
use serde::{Deserialize, Serialize};

/// A single staged change. A committed transaction is an ordered list of
/// these, applied (and logged) as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    PutIndex(Index),
    /// Removes the index and every document in it.
    DeleteIndex { id: String },
    PutDocument(Document),
    DeleteDocument { index_id: String, id: String },
}

#[async_trait::async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn get_index(&self, id: &str) -> Result<Option<Index>>;
    async fn list_indexes(&self, id_contains: Option<&str>) -> Result<Vec<Index>>;
    async fn get_document(&self, index_id: &str, id: &str) -> Result<Option<Document>>;
    /// Every document of an index, ordered by id.
    async fn documents(&self, index_id: &str) -> Result<Vec<Document>>;
    /// An index together with its documents, read under one lock.
    async fn index_with_documents(&self, index_id: &str) -> Result<Option<(Index, Vec<Document>)>>;
    /// Exact count of matching documents plus one page of them, ordered by id.
    async fn query(&self, index_id: &str, predicate: &Predicate, page: Page) -> Result<QueryResult>;

    /// Opens a serializable read-write transaction. Only one is open at a
    /// time; it sees its own staged writes.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    // Admin
    async fn admin_snapshot(&self) -> Result<(String, u64)> {
        Err(StoreError::Internal("snapshots need a persistent store".into()))
    }
    async fn admin_manifest(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"mode": "memory"}))
    }
    async fn admin_trim_wal(&self, _snapshot_id: &str) -> Result<Vec<String>> {
        Err(StoreError::Internal("no WAL in a memory store".into()))
    }
}

#[async_trait::async_trait]
pub trait Transaction: Send {
    fn get_index(&self, id: &str) -> Option<Index>;
    fn get_document(&self, index_id: &str, id: &str) -> Option<Document>;

    fn put_index(&mut self, index: Index);
    fn delete_index(&mut self, id: &str);
    fn put_document(&mut self, document: Document);
    fn delete_document(&mut self, index_id: &str, id: &str);

    /// Applies every staged mutation at once and returns the commit sequence
    /// number. Dropping the transaction instead discards them.
    async fn commit(self: Box<Self>) -> Result<u64>;
}
