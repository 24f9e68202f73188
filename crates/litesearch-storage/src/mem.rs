use crate::traits::{Mutation, Storage, Transaction};
use litesearch_core::{Document, Index, Page, Predicate, QueryResult, Result};
use once_cell::sync::Lazy;
use prometheus::{register_histogram, Histogram};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

static QUERY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("document_query_seconds", "Predicate scan latency").unwrap()
});

/// Committed state: every index and document, plus the sequence number of
/// the last commit applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tables {
    pub indexes: BTreeMap<String, Index>,
    // key: (index_id, document_id)
    pub documents: BTreeMap<(String, String), Document>,
    pub commit_seq: u64,
}

impl Tables {
    pub fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutIndex(index) => {
                self.indexes.insert(index.id.clone(), index);
            }
            Mutation::DeleteIndex { id } => {
                self.indexes.remove(&id);
                let doomed: Vec<(String, String)> = self
                    .index_documents(&id)
                    .map(|d| (d.index_id.clone(), d.id.clone()))
                    .collect();
                for key in doomed {
                    self.documents.remove(&key);
                }
            }
            Mutation::PutDocument(doc) => {
                self.documents
                    .insert((doc.index_id.clone(), doc.id.clone()), doc);
            }
            Mutation::DeleteDocument { index_id, id } => {
                self.documents.remove(&(index_id, id));
            }
        }
    }

    /// Replays one logged commit.
    pub fn apply_commit(&mut self, seq: u64, mutations: Vec<Mutation>) {
        for m in mutations {
            self.apply(m);
        }
        self.commit_seq = self.commit_seq.max(seq);
    }

    pub fn index_documents<'a>(&'a self, index_id: &'a str) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents
            .range((index_id.to_string(), String::new())..)
            .take_while(move |((ix, _), _)| ix == index_id)
            .map(|(_, doc)| doc)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Tables) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tables)),
        }
    }

    /// Consistent copy of the committed state.
    pub async fn export(&self) -> Tables {
        self.inner.read().await.clone()
    }

    pub async fn commit_seq(&self) -> u64 {
        self.inner.read().await.commit_seq
    }

    pub(crate) async fn write_txn(&self) -> MemTransaction {
        MemTransaction {
            tables: self.inner.clone().write_owned().await,
            indexes: BTreeMap::new(),
            documents: BTreeMap::new(),
            dropped_indexes: BTreeSet::new(),
            mutations: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStore {
    async fn get_index(&self, id: &str) -> Result<Option<Index>> {
        Ok(self.inner.read().await.indexes.get(id).cloned())
    }

    async fn list_indexes(&self, id_contains: Option<&str>) -> Result<Vec<Index>> {
        let inner = self.inner.read().await;
        Ok(inner
            .indexes
            .values()
            .filter(|ix| id_contains.map_or(true, |s| ix.id.contains(s)))
            .cloned()
            .collect())
    }

    async fn get_document(&self, index_id: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .documents
            .get(&(index_id.to_string(), id.to_string()))
            .cloned())
    }

    async fn documents(&self, index_id: &str) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        Ok(inner.index_documents(index_id).cloned().collect())
    }

    async fn index_with_documents(&self, index_id: &str) -> Result<Option<(Index, Vec<Document>)>> {
        let inner = self.inner.read().await;
        Ok(inner.indexes.get(index_id).map(|index| {
            (index.clone(), inner.index_documents(index_id).cloned().collect())
        }))
    }

    async fn query(&self, index_id: &str, predicate: &Predicate, page: Page) -> Result<QueryResult> {
        let _timer = QUERY_SECONDS.start_timer();
        let inner = self.inner.read().await;
        let mut total = 0u64;
        let mut documents = Vec::new();
        for doc in inner.index_documents(index_id) {
            if !predicate.evaluate(&doc.fields) {
                continue;
            }
            let rank = total as usize;
            total += 1;
            if rank >= page.offset && documents.len() < page.limit {
                documents.push(doc.summary());
            }
        }
        Ok(QueryResult { total, documents })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.write_txn().await))
    }
}

/// Holds the store's write lock; staged writes live in an overlay until
/// [`MemTransaction::apply`].
pub struct MemTransaction {
    tables: OwnedRwLockWriteGuard<Tables>,
    // None marks a staged delete
    indexes: BTreeMap<String, Option<Index>>,
    documents: BTreeMap<(String, String), Option<Document>>,
    dropped_indexes: BTreeSet<String>,
    mutations: Vec<Mutation>,
}

impl MemTransaction {
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Sequence number this transaction will commit under.
    pub fn next_seq(&self) -> u64 {
        self.tables.commit_seq + 1
    }

    pub fn apply(mut self) -> u64 {
        if self.mutations.is_empty() {
            return self.tables.commit_seq;
        }
        let seq = self.next_seq();
        let mutations = std::mem::take(&mut self.mutations);
        tracing::debug!(seq, mutations = mutations.len(), "commit");
        self.tables.apply_commit(seq, mutations);
        seq
    }
}

#[async_trait::async_trait]
impl Transaction for MemTransaction {
    fn get_index(&self, id: &str) -> Option<Index> {
        match self.indexes.get(id) {
            Some(staged) => staged.clone(),
            None => self.tables.indexes.get(id).cloned(),
        }
    }

    fn get_document(&self, index_id: &str, id: &str) -> Option<Document> {
        let key = (index_id.to_string(), id.to_string());
        if let Some(staged) = self.documents.get(&key) {
            return staged.clone();
        }
        if self.dropped_indexes.contains(index_id) {
            return None;
        }
        self.tables.documents.get(&key).cloned()
    }

    fn put_index(&mut self, index: Index) {
        self.indexes.insert(index.id.clone(), Some(index.clone()));
        self.mutations.push(Mutation::PutIndex(index));
    }

    fn delete_index(&mut self, id: &str) {
        self.indexes.insert(id.to_string(), None);
        self.documents.retain(|(ix, _), _| ix != id);
        self.dropped_indexes.insert(id.to_string());
        self.mutations.push(Mutation::DeleteIndex { id: id.to_string() });
    }

    fn put_document(&mut self, document: Document) {
        self.documents.insert(
            (document.index_id.clone(), document.id.clone()),
            Some(document.clone()),
        );
        self.mutations.push(Mutation::PutDocument(document));
    }

    fn delete_document(&mut self, index_id: &str, id: &str) {
        self.documents
            .insert((index_id.to_string(), id.to_string()), None);
        self.mutations.push(Mutation::DeleteDocument {
            index_id: index_id.to_string(),
            id: id.to_string(),
        });
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        Ok(self.apply())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litesearch_core::{compile, flatten};
    use serde_json::json;

    fn doc(index_id: &str, id: &str, source: serde_json::Value) -> Document {
        Document {
            id: id.into(),
            index_id: index_id.into(),
            fields: flatten(&source),
            source,
        }
    }

    #[tokio::test]
    async fn uncommitted_transactions_are_discarded() {
        let store = InMemoryStore::new();
        {
            let mut txn = store.begin().await.unwrap();
            txn.put_index(Index::new("a"));
            assert!(txn.get_index("a").is_some());
        }
        assert!(store.get_index("a").await.unwrap().is_none());
        assert_eq!(store.commit_seq().await, 0);
    }

    #[tokio::test]
    async fn commit_applies_everything_and_bumps_seq() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.put_index(Index::new("a"));
        txn.put_document(doc("a", "1", json!({"x": 1})));
        assert_eq!(txn.commit().await.unwrap(), 1);

        assert!(store.get_index("a").await.unwrap().is_some());
        assert!(store.get_document("a", "1").await.unwrap().is_some());
        assert_eq!(store.commit_seq().await, 1);
    }

    #[tokio::test]
    async fn delete_index_cascades_inside_the_transaction() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.put_index(Index::new("a"));
        txn.put_index(Index::new("ab"));
        txn.put_document(doc("a", "1", json!({})));
        txn.put_document(doc("ab", "1", json!({})));
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        txn.delete_index("a");
        assert!(txn.get_document("a", "1").is_none());
        assert!(txn.get_document("ab", "1").is_some());
        txn.commit().await.unwrap();

        assert!(store.documents("a").await.unwrap().is_empty());
        assert_eq!(store.documents("ab").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_counts_all_matches_and_pages_by_id() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.put_index(Index::new("a"));
        for i in 0..25 {
            txn.put_document(doc("a", &format!("{i:02}"), json!({"n": i})));
        }
        txn.put_document(doc("b", "00", json!({"n": 100})));
        txn.commit().await.unwrap();

        let p = compile("n >= 10").unwrap();
        let res = store.query("a", &p, Page::new(5, 4)).await.unwrap();
        assert_eq!(res.total, 15);
        let ids: Vec<&str> = res.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["15", "16", "17", "18"]);

        let res = store.query("a", &p, Page::new(100, 10)).await.unwrap();
        assert_eq!(res.total, 15);
        assert!(res.documents.is_empty());
    }

    #[tokio::test]
    async fn list_indexes_filters_by_substring() {
        let store = InMemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        for id in ["books", "cars", "bookmarks"] {
            txn.put_index(Index::new(id));
        }
        txn.commit().await.unwrap();

        let ids = |v: Vec<Index>| v.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(
            ids(store.list_indexes(Some("book")).await.unwrap()),
            ["bookmarks", "books"]
        );
        assert_eq!(store.list_indexes(None).await.unwrap().len(), 3);
    }
}
