use crate::traits::Mutation;
use ciborium::ser;
use crc32c::crc32c;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus::{Histogram, HistogramOpts, IntCounter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};
use tokio::sync::{mpsc, oneshot};

const MAGIC: [u8; 4] = *b"LSWL";
const VER: u8 = 1;
// magic, version, type, seq, ts, body length
const HEADER_LEN: usize = 4 + 1 + 1 + 8 + 8 + 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum RecType {
    Commit = 1,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecBody {
    /// One committed transaction.
    Commit { mutations: Vec<Mutation> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub seq: u64,
    pub ts: i64,
    pub body: RecBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalSegmentMeta {
    pub name: String,
    pub max_seq: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub version: u32,
    pub current_snapshot: Option<String>,
    pub snapshot_bookmark: Option<u64>,
    pub last_seq: u64,
    pub current_segment: String,
    pub segments: Vec<WalSegmentMeta>,
}

#[derive(Debug, Clone)]
pub struct WalOptions {
    pub segment_bytes: u64,
    pub batch_max_bytes: usize,
    pub batch_max_ms: u64,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            segment_bytes: 256 * 1024 * 1024,
            batch_max_bytes: 256 * 1024,
            batch_max_ms: 3,
        }
    }
}

impl WalOptions {
    /// Defaults overridden by `WAL_SEGMENT_BYTES`, `WAL_BATCH_MAX_BYTES` and
    /// `WAL_BATCH_MAX_MS`. A value that does not parse is an error.
    pub fn from_env() -> io::Result<Self> {
        fn var<T: std::str::FromStr>(name: &str, default: T) -> io::Result<T> {
            match std::env::var(name) {
                Ok(s) => s.trim().parse().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, format!("invalid {name}: {s:?}"))
                }),
                Err(_) => Ok(default),
            }
        }
        let d = Self::default();
        Ok(Self {
            segment_bytes: var("WAL_SEGMENT_BYTES", d.segment_bytes)?,
            batch_max_bytes: var("WAL_BATCH_MAX_BYTES", d.batch_max_bytes)?,
            batch_max_ms: var("WAL_BATCH_MAX_MS", d.batch_max_ms)?,
        })
    }
}

pub struct WalSegment {
    pub path: PathBuf,
    file: File,
    pub bytes: u64,
}

pub struct WalWriter {
    dir: PathBuf,
    inner: Arc<RwLock<WalInner>>,
    tx: mpsc::Sender<Enq>,
}

#[derive(Clone)]
struct WalHandle {
    dir: PathBuf,
    opts: WalOptions,
    inner: Arc<RwLock<WalInner>>,
}

struct WalInner {
    segment: WalSegment,
    manifest: Manifest,
}

struct Enq {
    rec: Vec<u8>,
    seq: u64,
    ack: oneshot::Sender<io::Result<()>>,
}

static WAL_RECORDS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("wal_records_total", "wal records").unwrap());
static WAL_BYTES_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("wal_bytes_total", "wal bytes").unwrap());
static WAL_FSYNC_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("wal_fsync_total", "wal fsyncs").unwrap());
static WAL_BATCH_BYTES: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new("wal_batch_bytes", "wal batch sizes")).unwrap()
});
static WAL_FSYNC_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new("wal_fsync_seconds", "wal fsync time")).unwrap()
});

impl WalWriter {
    /// Opens (or creates) the WAL under `dir` and starts the fsync worker.
    /// Must be called from within a tokio runtime.
    pub fn open(dir: impl AsRef<Path>, opts: WalOptions) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join("wal"))?;
        std::fs::create_dir_all(dir.join("snapshots"))?;
        let mut manifest = read_manifest(&dir)?.unwrap_or_else(|| Manifest {
            version: 1,
            ..Manifest::default()
        });
        let seg_name = if manifest.current_segment.is_empty() {
            Self::new_segment_name(manifest.segments.last())
        } else {
            manifest.current_segment.clone()
        };
        let seg_path = dir.join("wal").join(&seg_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&seg_path)?;
        let mut bytes = file.metadata()?.len();
        if bytes > 0 {
            // truncate a torn tail before appending
            let (_, valid) = scan_segment(&seg_path)?;
            if valid < bytes {
                tracing::warn!(segment = %seg_name, valid, bytes, "truncating torn wal tail");
                file.set_len(valid)?;
                bytes = valid;
            }
        }
        let segment = WalSegment {
            path: seg_path,
            file,
            bytes,
        };
        if !manifest.segments.iter().any(|s| s.name == seg_name) {
            manifest.segments.push(WalSegmentMeta {
                name: seg_name.clone(),
                max_seq: manifest.last_seq,
            });
        }
        manifest.current_segment = seg_name;
        persist_manifest_at(&dir, &manifest)?;

        let (tx, mut rx) = mpsc::channel::<Enq>(1024);
        // register metrics in default registry
        let reg = prometheus::default_registry();
        let _ = reg.register(Box::new(WAL_RECORDS_TOTAL.clone()));
        let _ = reg.register(Box::new(WAL_BYTES_TOTAL.clone()));
        let _ = reg.register(Box::new(WAL_FSYNC_TOTAL.clone()));
        let _ = reg.register(Box::new(WAL_BATCH_BYTES.clone()));
        let _ = reg.register(Box::new(WAL_FSYNC_SECONDS.clone()));

        let inner = Arc::new(RwLock::new(WalInner { segment, manifest }));
        let handle = WalHandle {
            dir: dir.clone(),
            opts,
            inner: inner.clone(),
        };
        tokio::spawn(async move {
            handle.fsync_worker(&mut rx).await;
        });
        Ok(Self { dir, inner, tx })
    }

    fn new_segment_name(prev: Option<&WalSegmentMeta>) -> String {
        if let Some(p) = prev {
            if let Ok(n) = p.name.trim_end_matches(".wal").parse::<u64>() {
                return format!("{:08}.wal", n + 1);
            }
        }
        "00000001.wal".to_string()
    }

    pub fn manifest(&self) -> Manifest {
        self.inner.read().manifest.clone()
    }

    /// Appends one record and waits until it is fsynced.
    pub async fn append(&self, seq: u64, ts: i64, body: &RecBody) -> io::Result<()> {
        let rec = encode_record(seq, ts, body)?;
        WAL_RECORDS_TOTAL.inc();
        WAL_BYTES_TOTAL.inc_by(rec.len() as u64);
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Enq { rec, seq, ack: tx })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "wal worker stopped"))?;
        rx.await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "wal worker dropped ack"))?
    }

    /// Records `name` as the current snapshot, covering everything up to `seq`.
    pub fn set_snapshot(&self, name: &str, seq: u64) -> io::Result<()> {
        let mut inner = self.inner.write();
        inner.manifest.current_snapshot = Some(name.to_string());
        inner.manifest.snapshot_bookmark = Some(seq);
        persist_manifest_at(&self.dir, &inner.manifest)
    }

    /// Deletes segments whose records are all covered by `snapshot_id`.
    /// The active segment is always kept.
    pub fn trim(&self, snapshot_id: &str) -> io::Result<Vec<String>> {
        let mut inner = self.inner.write();
        let m = &mut inner.manifest;
        if m.current_snapshot.as_deref() != Some(snapshot_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "snapshot id mismatch",
            ));
        }
        let cutoff = m.snapshot_bookmark.unwrap_or(0);
        let mut deleted = Vec::new();
        let mut retain = Vec::new();
        for seg in m.segments.drain(..) {
            if seg.max_seq <= cutoff && seg.name != m.current_segment {
                let p = self.dir.join("wal").join(&seg.name);
                if let Err(e) = std::fs::remove_file(&p) {
                    tracing::warn!(segment = %seg.name, error = %e, "failed to remove wal segment");
                }
                deleted.push(seg.name);
            } else {
                retain.push(seg);
            }
        }
        m.segments = retain;
        persist_manifest_at(&self.dir, &inner.manifest)?;
        Ok(deleted)
    }

    fn rectype(b: &RecBody) -> RecType {
        match b {
            RecBody::Commit { .. } => RecType::Commit,
        }
    }
}

fn encode_record(seq: u64, ts: i64, body: &RecBody) -> io::Result<Vec<u8>> {
    let mut v = Vec::new();
    ser::into_writer(body, &mut v).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let len = v.len() as u32;
    let mut rec = Vec::with_capacity(HEADER_LEN + v.len() + 4);
    rec.extend_from_slice(&MAGIC);
    rec.push(VER);
    rec.push(WalWriter::rectype(body) as u8);
    rec.extend_from_slice(&seq.to_be_bytes());
    rec.extend_from_slice(&(ts as u64).to_be_bytes());
    rec.extend_from_slice(&len.to_be_bytes());
    rec.extend_from_slice(&v);
    let crc = crc32c(&rec);
    rec.extend_from_slice(&crc.to_be_bytes());
    Ok(rec)
}

impl WalHandle {
    async fn fsync_worker(self, rx: &mut mpsc::Receiver<Enq>) {
        while let Some(first) = rx.recv().await {
            let mut bytes = first.rec.len();
            let mut batch = vec![first];
            let deadline = tokio::time::sleep(Duration::from_millis(self.opts.batch_max_ms));
            tokio::pin!(deadline);
            while bytes < self.opts.batch_max_bytes {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(enq) => {
                            bytes += enq.rec.len();
                            batch.push(enq);
                        }
                        None => break,
                    },
                    _ = &mut deadline => break,
                }
            }

            let written = self.write_locked(&batch, bytes);
            if let Err(e) = &written {
                tracing::error!(error = %e, records = batch.len(), "wal write failed");
            }
            for enq in batch {
                let result = match &written {
                    Ok(()) => Ok(()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                };
                let _ = enq.ack.send(result);
            }
        }
    }

    fn write_locked(&self, batch: &[Enq], bytes: usize) -> io::Result<()> {
        let t0 = std::time::Instant::now();
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        write_batch(&mut inner.segment, batch)?;
        inner.segment.bytes += bytes as u64;
        let last_seq = batch
            .iter()
            .map(|e| e.seq)
            .max()
            .unwrap_or(inner.manifest.last_seq);
        inner.manifest.last_seq = inner.manifest.last_seq.max(last_seq);
        if let Some(meta) = inner.manifest.segments.last_mut() {
            meta.max_seq = meta.max_seq.max(last_seq);
        }
        WAL_FSYNC_TOTAL.inc();
        WAL_FSYNC_SECONDS.observe(t0.elapsed().as_secs_f64());
        WAL_BATCH_BYTES.observe(bytes as f64);
        if let Err(e) = persist_manifest_at(&self.dir, &inner.manifest) {
            tracing::warn!(error = %e, "failed to persist wal manifest");
        }
        if inner.segment.bytes >= self.opts.segment_bytes {
            if let Err(e) = self.rotate_locked(inner) {
                tracing::warn!(error = %e, "wal segment rotation failed");
            }
        }
        Ok(())
    }

    fn rotate_locked(&self, inner: &mut WalInner) -> io::Result<()> {
        let name = WalWriter::new_segment_name(inner.manifest.segments.last());
        let seg_path = self.dir.join("wal").join(&name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&seg_path)?;
        inner.segment = WalSegment {
            path: seg_path,
            file,
            bytes: 0,
        };
        inner.manifest.current_segment = name.clone();
        inner.manifest.segments.push(WalSegmentMeta {
            name,
            max_seq: inner.manifest.last_seq,
        });
        tracing::info!(segment = %inner.manifest.current_segment, "rotated wal segment");
        persist_manifest_at(&self.dir, &inner.manifest)
    }
}

fn write_batch(segment: &mut WalSegment, batch: &[Enq]) -> io::Result<()> {
    for enq in batch {
        segment.file.write_all(&enq.rec)?;
    }
    segment.file.flush()?;
    segment.file.sync_data()
}

fn persist_manifest_at(dir: &Path, m: &Manifest) -> io::Result<()> {
    let tmp = dir.join("manifest.json.tmp");
    let bytes = serde_json::to_vec_pretty(m)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(tmp, dir.join("manifest.json"))
}

pub fn read_manifest(dir: impl AsRef<Path>) -> io::Result<Option<Manifest>> {
    let manifest_path = dir.as_ref().join("manifest.json");
    if !manifest_path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&manifest_path)?;
    serde_json::from_str(&s)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn be_u64(b: &[u8]) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    u64::from_be_bytes(a)
}

fn be_u32(b: &[u8]) -> u32 {
    let mut a = [0u8; 4];
    a.copy_from_slice(&b[..4]);
    u32::from_be_bytes(a)
}

/// Decodes the intact prefix of one segment. Returns its records and the
/// byte length they cover; a torn or corrupt record ends the scan.
fn scan_segment(path: &Path) -> io::Result<(Vec<WalRecord>, u64)> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let mut f = io::BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    let mut valid = 0u64;
    loop {
        let mut hdr = [0u8; HEADER_LEN];
        if f.read_exact(&mut hdr).is_err() {
            break;
        }
        if hdr[0..4] != MAGIC {
            tracing::warn!(segment = %name, "bad wal magic; stopping segment replay");
            break;
        }
        let seq = be_u64(&hdr[6..14]);
        let ts = be_u64(&hdr[14..22]) as i64;
        let len = be_u32(&hdr[22..26]) as usize;
        let mut body = vec![0u8; len];
        let mut crcbuf = [0u8; 4];
        if f.read_exact(&mut body).is_err() || f.read_exact(&mut crcbuf).is_err() {
            tracing::warn!(segment = %name, seq, "torn wal record; stopping segment replay");
            break;
        }
        let mut rec = hdr.to_vec();
        rec.extend_from_slice(&body);
        if crc32c(&rec) != u32::from_be_bytes(crcbuf) {
            tracing::warn!(segment = %name, seq, "wal crc mismatch; stopping segment replay");
            break;
        }
        match ciborium::de::from_reader::<RecBody, _>(&body[..]) {
            Ok(body) => out.push(WalRecord { seq, ts, body }),
            Err(e) => {
                tracing::warn!(segment = %name, seq, error = %e, "undecodable wal record");
                break;
            }
        }
        valid += (rec.len() + 4) as u64;
    }
    Ok((out, valid))
}

/// Reads every intact record of every segment listed in the manifest, in
/// order. A torn or corrupt record ends its segment.
pub fn replay(dir: impl AsRef<Path>) -> io::Result<Vec<WalRecord>> {
    let dir = dir.as_ref();
    let manifest = read_manifest(dir)?.unwrap_or_default();
    let mut out = Vec::new();
    for meta in manifest.segments.iter() {
        let p = dir.join("wal").join(&meta.name);
        match scan_segment(&p) {
            Ok((records, _)) => out.extend(records),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use litesearch_core::Index;

    fn commit(id: &str) -> RecBody {
        RecBody::Commit {
            mutations: vec![Mutation::PutIndex(Index::new(id))],
        }
    }

    #[tokio::test]
    async fn appended_records_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalWriter::open(dir.path(), WalOptions::default()).unwrap();
        wal.append(1, 100, &commit("a")).await.unwrap();
        wal.append(2, 101, &commit("b")).await.unwrap();

        let recs = replay(dir.path()).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].seq, 1);
        assert_eq!(recs[1].body, commit("b"));
        assert_eq!(wal.manifest().last_seq, 2);
    }

    #[tokio::test]
    async fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalWriter::open(dir.path(), WalOptions::default()).unwrap();
        wal.append(1, 0, &commit("a")).await.unwrap();
        let seg = wal.manifest().current_segment;
        drop(wal);

        let path = dir.path().join("wal").join(seg);
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        let partial = encode_record(2, 0, &commit("b")).unwrap();
        f.write_all(&partial[..partial.len() / 2]).unwrap();

        let recs = replay(dir.path()).unwrap();
        assert_eq!(recs.len(), 1);

        let wal = WalWriter::open(dir.path(), WalOptions::default()).unwrap();
        wal.append(2, 0, &commit("c")).await.unwrap();
        let seqs: Vec<u64> = replay(dir.path()).unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, [1, 2]);
    }

    #[tokio::test]
    async fn segments_rotate_and_trim() {
        let dir = tempfile::tempdir().unwrap();
        let opts = WalOptions {
            segment_bytes: 1,
            ..WalOptions::default()
        };
        let wal = WalWriter::open(dir.path(), opts).unwrap();
        for seq in 1..=3 {
            wal.append(seq, 0, &commit("a")).await.unwrap();
        }
        assert_eq!(wal.manifest().segments.len(), 4);
        assert_eq!(replay(dir.path()).unwrap().len(), 3);

        assert!(wal.trim("nope").is_err());
        wal.set_snapshot("snap-1.zst", 2).unwrap();
        let deleted = wal.trim("snap-1.zst").unwrap();
        assert_eq!(deleted.len(), 2);
        let left: Vec<u64> = replay(dir.path()).unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(left, [3]);
    }
}
