//! Per-index field usage accounting.
//!
//! An index keeps, for every flattened field path, the number of its documents
//! whose projection contains that path. Each document write turns into a
//! signed [`FieldDelta`] that is merged into the index inside the same
//! transaction.

use crate::errors::{Result, StoreError};
use crate::flatten::flatten;
use crate::model::{Document, DocumentFields, Index, IndexFields};
use std::collections::BTreeMap;

/// field path -> signed change in reference count
pub type FieldDelta = BTreeMap<String, i64>;

/// Presence delta for a document moving from `old` to `new` fields.
/// Paths present in both cancel out.
pub fn compute_delta(old: &DocumentFields, new: &DocumentFields) -> FieldDelta {
    let mut delta = FieldDelta::new();
    for path in old.keys() {
        *delta.entry(path.clone()).or_insert(0) -= 1;
    }
    for path in new.keys() {
        *delta.entry(path.clone()).or_insert(0) += 1;
    }
    delta.retain(|_, d| *d != 0);
    delta
}

/// Applies `delta` to `current`, dropping every path whose count is no longer
/// positive.
pub fn merge_fields(current: &IndexFields, delta: &FieldDelta) -> IndexFields {
    let mut merged: BTreeMap<String, i64> = current
        .iter()
        .map(|(path, count)| (path.clone(), *count as i64))
        .collect();
    for (path, d) in delta {
        *merged.entry(path.clone()).or_insert(0) += d;
    }
    merged
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(path, count)| (path, count as u64))
        .collect()
}

/// Accounting recomputed from scratch over a set of documents.
pub fn recount_fields<'a>(documents: impl IntoIterator<Item = &'a Document>) -> IndexFields {
    let mut fields = IndexFields::new();
    for doc in documents {
        for path in doc.fields.keys() {
            *fields.entry(path.clone()).or_insert(0) += 1;
        }
    }
    fields
}

/// Checks an index's stored accounting, and each document's projection,
/// against the documents themselves.
pub fn verify_index<'a>(
    index: &Index,
    documents: impl IntoIterator<Item = &'a Document>,
) -> Result<()> {
    let documents: Vec<&Document> = documents.into_iter().collect();
    for doc in &documents {
        if doc.index_id != index.id {
            return Err(StoreError::InvariantViolation(format!(
                "document {}/{} listed under index {}",
                doc.index_id, doc.id, index.id
            )));
        }
        if doc.fields != flatten(&doc.source) {
            return Err(StoreError::InvariantViolation(format!(
                "document {}/{} fields differ from its source",
                doc.index_id, doc.id
            )));
        }
    }
    let expected = recount_fields(documents.iter().copied());
    if expected != index.fields {
        let drifted: Vec<&str> = expected
            .keys()
            .chain(index.fields.keys())
            .filter(|p| expected.get(*p) != index.fields.get(*p))
            .map(String::as_str)
            .collect();
        return Err(StoreError::InvariantViolation(format!(
            "index {} accounting drifted on fields {:?}",
            index.id, drifted
        )));
    }
    Ok(())
}
