//! Index and document operations over any [`Storage`].
//!
//! Every write runs in one storage transaction, so a document and the field
//! accounting of its index always change together.

use crate::traits::Storage;
use litesearch_core::{
    compile, compute_delta, flatten, merge_fields, new_document_id, validate_source, Document,
    DocumentFields, Index, Page, QueryResult, Result, StoreError,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct DocumentStore {
    storage: Arc<dyn Storage>,
}

fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(StoreError::Validation(format!("{kind} id must not be empty")));
    }
    Ok(())
}

impl DocumentStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn create_index(&self, id: &str) -> Result<Index> {
        validate_id("index", id)?;
        let mut txn = self.storage.begin().await?;
        if txn.get_index(id).is_some() {
            return Err(StoreError::AlreadyExists(format!("index {id} already exists")));
        }
        let index = Index::new(id);
        txn.put_index(index.clone());
        txn.commit().await?;
        info!(index_id = id, "index created");
        Ok(index)
    }

    pub async fn get_index(&self, id: &str) -> Result<Index> {
        self.storage
            .get_index(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("index {id} not found")))
    }

    /// Removes the index and all of its documents.
    pub async fn delete_index(&self, id: &str) -> Result<()> {
        let mut txn = self.storage.begin().await?;
        if txn.get_index(id).is_none() {
            return Err(StoreError::NotFound(format!("index {id} not found")));
        }
        txn.delete_index(id);
        txn.commit().await?;
        info!(index_id = id, "index deleted");
        Ok(())
    }

    pub async fn list_indexes(&self, id_contains: Option<&str>) -> Result<Vec<Index>> {
        self.storage.list_indexes(id_contains).await
    }

    /// Creates or replaces a document. Returns whether it was created.
    ///
    /// The index is created on the fly when missing. With `force_create`, an
    /// existing document is an error instead of being replaced.
    pub async fn upsert_document(
        &self,
        index_id: &str,
        document_id: &str,
        source: JsonValue,
        force_create: bool,
    ) -> Result<(bool, Document)> {
        validate_id("index", index_id)?;
        validate_id("document", document_id)?;
        validate_source(&source)?;
        let fields = flatten(&source);

        let mut txn = self.storage.begin().await?;
        let previous = txn.get_document(index_id, document_id);
        if force_create && previous.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "document {document_id} already exists in index {index_id}"
            )));
        }
        let (mut index, index_created) = match txn.get_index(index_id) {
            Some(index) => (index, false),
            None => (Index::new(index_id), true),
        };

        let no_fields = DocumentFields::new();
        let old_fields = previous.as_ref().map_or(&no_fields, |d| &d.fields);
        let delta = compute_delta(old_fields, &fields);
        if index_created || !delta.is_empty() {
            index.fields = merge_fields(&index.fields, &delta);
            txn.put_index(index);
        }

        let document = Document {
            id: document_id.to_string(),
            index_id: index_id.to_string(),
            source,
            fields,
        };
        txn.put_document(document.clone());
        let seq = txn.commit().await?;

        if index_created {
            info!(index_id, "index created on first write");
        }
        let created = previous.is_none();
        debug!(index_id, document_id, created, changed_fields = delta.len(), seq, "document upserted");
        Ok((created, document))
    }

    /// Stores `source` under a freshly generated id.
    pub async fn create_document(&self, index_id: &str, source: JsonValue) -> Result<Document> {
        let id = new_document_id();
        let (_, document) = self.upsert_document(index_id, &id, source, true).await?;
        Ok(document)
    }

    pub async fn get_document(&self, index_id: &str, document_id: &str) -> Result<Document> {
        self.storage
            .get_document(index_id, document_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "document {document_id} not found in index {index_id}"
                ))
            })
    }

    pub async fn delete_document(&self, index_id: &str, document_id: &str) -> Result<()> {
        let mut txn = self.storage.begin().await?;
        let Some(previous) = txn.get_document(index_id, document_id) else {
            return Err(StoreError::NotFound(format!(
                "document {document_id} not found in index {index_id}"
            )));
        };
        if let Some(mut index) = txn.get_index(index_id) {
            let delta = compute_delta(&previous.fields, &DocumentFields::new());
            index.fields = merge_fields(&index.fields, &delta);
            txn.put_index(index);
        }
        txn.delete_document(index_id, document_id);
        txn.commit().await?;
        debug!(index_id, document_id, "document deleted");
        Ok(())
    }

    /// Runs a filter query. A blank query matches every document; an unknown
    /// index matches nothing.
    pub async fn query_documents(&self, index_id: &str, query: &str, page: Page) -> Result<QueryResult> {
        let predicate = compile(query)?;
        self.storage.query(index_id, &predicate, page).await
    }

    /// Checks the index's field accounting against its live documents.
    pub async fn verify_index(&self, index_id: &str) -> Result<()> {
        let (index, documents) = self
            .storage
            .index_with_documents(index_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("index {index_id} not found")))?;
        litesearch_core::verify_index(&index, &documents).map_err(|e| {
            error!(index_id, error = %e, "index accounting is inconsistent");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use serde_json::json;

    fn store() -> DocumentStore {
        DocumentStore::new(Arc::new(InMemoryStore::new()))
    }

    fn counts(entries: &[(&str, u64)]) -> litesearch_core::IndexFields {
        entries.iter().map(|(p, c)| (p.to_string(), *c)).collect()
    }

    #[tokio::test]
    async fn create_index_twice_is_rejected() {
        let s = store();
        s.create_index("books").await.unwrap();
        let err = s.create_index("books").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert!(matches!(
            s.create_index(" ").await.unwrap_err(),
            StoreError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn replacing_a_document_moves_field_counts() {
        let s = store();
        let (created, _) = s.upsert_document("i", "d1", json!({"x": 1}), false).await.unwrap();
        assert!(created);
        assert_eq!(s.get_index("i").await.unwrap().fields, counts(&[("x", 1)]));

        let (created, _) = s.upsert_document("i", "d1", json!({"y": 2}), false).await.unwrap();
        assert!(!created);
        assert_eq!(s.get_index("i").await.unwrap().fields, counts(&[("y", 1)]));
    }

    #[tokio::test]
    async fn deleting_the_last_reference_drops_the_field() {
        let s = store();
        s.upsert_document("i", "a", json!({"x": 1, "y": 1}), false).await.unwrap();
        s.upsert_document("i", "b", json!({"x": 2}), false).await.unwrap();
        assert_eq!(
            s.get_index("i").await.unwrap().fields,
            counts(&[("x", 2), ("y", 1)])
        );

        s.delete_document("i", "a").await.unwrap();
        assert_eq!(s.get_index("i").await.unwrap().fields, counts(&[("x", 1)]));
        assert!(matches!(
            s.delete_document("i", "a").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn force_create_refuses_existing_documents() {
        let s = store();
        s.upsert_document("i", "d", json!({"a": 1}), true).await.unwrap();
        let err = s
            .upsert_document("i", "d", json!({"a": 2}), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(s.get_document("i", "d").await.unwrap().source, json!({"a": 1}));
    }

    #[tokio::test]
    async fn sources_keep_their_key_order() {
        let s = store();
        s.upsert_document("i", "d", json!({"zeta": 1, "alpha": 2}), false).await.unwrap();
        let doc = s.get_document("i", "d").await.unwrap();
        let keys: Vec<&str> = doc.source.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn create_document_generates_hex_ids() {
        let s = store();
        let doc = s.create_document("i", json!({"t": "x"})).await.unwrap();
        assert_eq!(doc.id.len(), 32);
        assert!(doc.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(s.get_document("i", &doc.id).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn non_object_sources_are_rejected() {
        let s = store();
        let err = s.upsert_document("i", "d", json!([1, 2]), false).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(matches!(
            s.get_index("i").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_index_removes_its_documents() {
        let s = store();
        s.upsert_document("i", "d", json!({"a": 1}), false).await.unwrap();
        s.delete_index("i").await.unwrap();
        assert!(matches!(
            s.get_document("i", "d").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            s.delete_index("i").await.unwrap_err(),
            StoreError::NotFound(_)
        ));

        // a recreated index starts empty
        s.upsert_document("i", "e", json!({"b": 1}), false).await.unwrap();
        assert_eq!(s.get_index("i").await.unwrap().fields, counts(&[("b", 1)]));
    }

    #[tokio::test]
    async fn query_reports_total_and_one_page() {
        let s = store();
        for i in 0..30 {
            let score = 60 + i;
            s.upsert_document("scores", &format!("d{i:02}"), json!({"score": score}), false)
                .await
                .unwrap();
        }
        let res = s
            .query_documents("scores", "score >= 90", Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(res.total, 0);

        let res = s
            .query_documents("scores", "score >= 80", Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(res.total, 10);
        assert_eq!(res.documents.len(), 10);
        assert_eq!(res.documents[0].id, "d20");

        let res = s
            .query_documents("scores", "score >= 70", Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(res.total, 20);
        assert_eq!(res.documents.len(), 10);

        let all = s.query_documents("scores", "", Page::default()).await.unwrap();
        assert_eq!(all.total, 30);
    }

    #[tokio::test]
    async fn query_on_missing_index_is_empty_but_syntax_still_checked() {
        let s = store();
        let res = s.query_documents("nope", "a = 1", Page::default()).await.unwrap();
        assert_eq!(res.total, 0);
        assert!(res.documents.is_empty());

        let err = s
            .query_documents("nope", "a = ", Page::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QuerySyntax { .. }));
    }

    #[tokio::test]
    async fn concurrent_writers_keep_accounting_exact() {
        let s = store();
        s.create_index("i").await.unwrap();
        let mut tasks = Vec::new();
        for w in 0..8 {
            let s = s.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..20 {
                    let id = format!("d{}", n % 5);
                    let source = if (w + n) % 2 == 0 {
                        json!({"even": true, "n": n})
                    } else {
                        json!({"odd": [n, w]})
                    };
                    s.upsert_document("i", &id, source, false).await.unwrap();
                    if n % 7 == 0 {
                        let _ = s.delete_document("i", &id).await;
                    }
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        s.verify_index("i").await.unwrap();
    }
}
