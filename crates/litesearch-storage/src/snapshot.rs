use crate::mem::Tables;
use litesearch_core::{Document, Index};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

/// One line of a snapshot file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SnapshotRecord {
    Header { commit_seq: u64, created_ts: i64 },
    Index(Index),
    Document(Document),
}

pub struct SnapshotWriter {
    out: zstd::Encoder<'static, File>,
    pub path: PathBuf,
}

impl SnapshotWriter {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let out = zstd::Encoder::new(file, 3)?;
        Ok(Self { out, path })
    }

    fn write_record(&mut self, rec: &SnapshotRecord) -> io::Result<()> {
        let s = serde_json::to_string(rec)?;
        self.out.write_all(s.as_bytes())?;
        self.out.write_all(b"\n")
    }

    pub fn finish(self) -> io::Result<()> {
        let file = self.out.finish()?;
        file.sync_all()
    }
}

/// Writes `tables` to a fresh `snap-<ulid>.zst` under `dir` and returns the
/// file name.
pub fn write_snapshot(dir: &Path, tables: &Tables, created_ts: i64) -> io::Result<String> {
    let name = format!("snap-{}.zst", ulid::Ulid::new());
    let mut w = SnapshotWriter::create(dir.join(&name))?;
    w.write_record(&SnapshotRecord::Header {
        commit_seq: tables.commit_seq,
        created_ts,
    })?;
    for index in tables.indexes.values() {
        w.write_record(&SnapshotRecord::Index(index.clone()))?;
    }
    for doc in tables.documents.values() {
        w.write_record(&SnapshotRecord::Document(doc.clone()))?;
    }
    w.finish()?;
    Ok(name)
}

pub fn read_snapshot(path: &Path) -> io::Result<Tables> {
    let fh = zstd::Decoder::new(File::open(path)?)?;
    let br = BufReader::new(fh);
    let mut tables = Tables::default();
    for line in br.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<SnapshotRecord>(&line)? {
            SnapshotRecord::Header { commit_seq, .. } => tables.commit_seq = commit_seq,
            SnapshotRecord::Index(index) => {
                tables.indexes.insert(index.id.clone(), index);
            }
            SnapshotRecord::Document(doc) => {
                tables
                    .documents
                    .insert((doc.index_id.clone(), doc.id.clone()), doc);
            }
        }
    }
    Ok(tables)
}
