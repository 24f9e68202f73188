use crate::mem::{MemTransaction, Tables};
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::walbin::{self, RecBody, WalOptions, WalWriter};
use crate::{InMemoryStore, Storage, Transaction};
use chrono::Utc;
use litesearch_core::{Document, Index, Page, Predicate, QueryResult, Result, StoreError};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rebuilds committed state from `data_dir`: the current snapshot (if any)
/// followed by every logged commit newer than it.
pub fn recover(data_dir: impl AsRef<Path>) -> io::Result<Tables> {
    let dir = data_dir.as_ref();
    let manifest = walbin::read_manifest(dir)?.unwrap_or_default();
    let mut tables = match &manifest.current_snapshot {
        Some(name) => read_snapshot(&dir.join("snapshots").join(name))?,
        None => Tables::default(),
    };
    let from = tables.commit_seq;
    let mut replayed = 0usize;
    for rec in walbin::replay(dir)? {
        if rec.seq <= tables.commit_seq {
            continue;
        }
        match rec.body {
            RecBody::Commit { mutations } => tables.apply_commit(rec.seq, mutations),
        }
        replayed += 1;
    }
    tracing::info!(
        snapshot = ?manifest.current_snapshot,
        from,
        replayed,
        commit_seq = tables.commit_seq,
        "recovered store"
    );
    Ok(tables)
}

/// In-memory tables made durable by a write-ahead log: every commit is
/// fsynced before it becomes visible.
pub struct PersistentStore {
    mem: InMemoryStore,
    wal: Arc<WalWriter>,
    // set after a failed WAL write; later commits are refused
    poisoned: Arc<AtomicBool>,
    data_dir: PathBuf,
}

impl PersistentStore {
    pub fn open(data_dir: PathBuf) -> io::Result<Self> {
        Self::open_with(data_dir, WalOptions::from_env()?)
    }

    pub fn open_with(data_dir: PathBuf, opts: WalOptions) -> io::Result<Self> {
        let tables = recover(&data_dir)?;
        let wal = WalWriter::open(&data_dir, opts)?;
        Ok(Self {
            mem: InMemoryStore::from_tables(tables),
            wal: Arc::new(wal),
            poisoned: Arc::new(AtomicBool::new(false)),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Writes a snapshot of the committed state and bookmarks it in the
    /// manifest. Returns the snapshot name and the commit it covers.
    pub async fn snapshot(&self) -> io::Result<(String, u64)> {
        let tables = self.mem.export().await;
        let dir = self.data_dir.join("snapshots");
        let name = write_snapshot(&dir, &tables, Utc::now().timestamp())?;
        self.wal.set_snapshot(&name, tables.commit_seq)?;
        tracing::info!(snapshot = %name, commit_seq = tables.commit_seq, "snapshot written");
        Ok((name, tables.commit_seq))
    }
}

#[async_trait::async_trait]
impl Storage for PersistentStore {
    async fn get_index(&self, id: &str) -> Result<Option<Index>> {
        self.mem.get_index(id).await
    }
    async fn list_indexes(&self, id_contains: Option<&str>) -> Result<Vec<Index>> {
        self.mem.list_indexes(id_contains).await
    }
    async fn get_document(&self, index_id: &str, id: &str) -> Result<Option<Document>> {
        self.mem.get_document(index_id, id).await
    }
    async fn documents(&self, index_id: &str) -> Result<Vec<Document>> {
        self.mem.documents(index_id).await
    }
    async fn index_with_documents(&self, index_id: &str) -> Result<Option<(Index, Vec<Document>)>> {
        self.mem.index_with_documents(index_id).await
    }
    async fn query(&self, index_id: &str, predicate: &Predicate, page: Page) -> Result<QueryResult> {
        self.mem.query(index_id, predicate, page).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(PersistentTransaction {
            inner: self.mem.write_txn().await,
            wal: self.wal.clone(),
            poisoned: self.poisoned.clone(),
        }))
    }

    async fn admin_snapshot(&self) -> Result<(String, u64)> {
        self.snapshot()
            .await
            .map_err(|e| StoreError::Internal(e.to_string()))
    }
    async fn admin_manifest(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.wal.manifest())?)
    }
    async fn admin_trim_wal(&self, snapshot_id: &str) -> Result<Vec<String>> {
        self.wal.trim(snapshot_id).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput => StoreError::Validation(e.to_string()),
            _ => StoreError::Internal(e.to_string()),
        })
    }
}

pub struct PersistentTransaction {
    inner: MemTransaction,
    wal: Arc<WalWriter>,
    poisoned: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Transaction for PersistentTransaction {
    fn get_index(&self, id: &str) -> Option<Index> {
        self.inner.get_index(id)
    }
    fn get_document(&self, index_id: &str, id: &str) -> Option<Document> {
        self.inner.get_document(index_id, id)
    }
    fn put_index(&mut self, index: Index) {
        self.inner.put_index(index)
    }
    fn delete_index(&mut self, id: &str) {
        self.inner.delete_index(id)
    }
    fn put_document(&mut self, document: Document) {
        self.inner.put_document(document)
    }
    fn delete_document(&mut self, index_id: &str, id: &str) {
        self.inner.delete_document(index_id, id)
    }

    async fn commit(self: Box<Self>) -> Result<u64> {
        let this = *self;
        if this.inner.mutations().is_empty() {
            return Ok(this.inner.apply());
        }
        if this.poisoned.load(Ordering::Acquire) {
            return Err(StoreError::Internal(
                "write-ahead log failed earlier; store is read-only".into(),
            ));
        }
        let seq = this.inner.next_seq();
        let body = RecBody::Commit {
            mutations: this.inner.mutations().to_vec(),
        };
        if let Err(e) = this.wal.append(seq, Utc::now().timestamp(), &body).await {
            this.poisoned.store(true, Ordering::Release);
            tracing::error!(seq, error = %e, "wal append failed; refusing further writes");
            return Err(StoreError::Internal(e.to_string()));
        }
        Ok(this.inner.apply())
    }
}
