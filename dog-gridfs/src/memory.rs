use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::{
    revision, CatalogRepository, ChunkRecord, FileCriteria, FileId, FileRecord, GridError,
    GridResult, DEFAULT_BUCKET_NAME,
};

/// Visible file plus its allocation sequence number
#[derive(Debug, Clone)]
struct VisibleFile {
    record: FileRecord,
    seq: u64,
}

/// Allocated but not finalized
#[derive(Debug, Clone)]
struct PendingFile {
    seq: u64,
    last_activity: DateTime<Utc>,
}

/// Collections of one bucket: `<bucket>.files` and `<bucket>.chunks`
#[derive(Debug, Default)]
struct BucketCollections {
    files: HashMap<FileId, VisibleFile>,
    pending: HashMap<FileId, PendingFile>,
    chunks: HashMap<FileId, BTreeMap<u32, Bytes>>,
}

impl BucketCollections {
    fn id_in_use(&self, id: &FileId) -> bool {
        self.files.contains_key(id) || self.pending.contains_key(id) || self.chunks.contains_key(id)
    }
}

#[derive(Debug, Default)]
struct Faults {
    offline: AtomicBool,
    chunk_write_budget: Mutex<Option<usize>>,
}

#[derive(Debug, Default)]
struct Shared {
    buckets: RwLock<HashMap<String, BucketCollections>>,
    sequence: AtomicU64,
    faults: Faults,
}

/// In-memory catalog for tests, development and embedding.
///
/// Clones share the same data. [`MemoryCatalog::bucket`] opens another
/// bucket namespace over the same data.
#[derive(Debug, Clone)]
pub struct MemoryCatalog {
    shared: Arc<Shared>,
    bucket: String,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    /// Empty catalog using the default `fs` bucket
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            bucket: DEFAULT_BUCKET_NAME.to_string(),
        }
    }

    /// Same underlying data, different bucket namespace
    pub fn bucket<S: Into<String>>(&self, bucket_name: S) -> Self {
        Self {
            shared: self.shared.clone(),
            bucket: bucket_name.into(),
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_offline(&self, offline: bool) {
        self.shared.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `n` more chunk writes succeed, then fail every following one
    pub fn fail_chunk_writes_after(&self, n: usize) {
        *self.shared.faults.chunk_write_budget.lock() = Some(n);
    }

    /// Remove any injected fault
    pub fn clear_faults(&self) {
        self.set_offline(false);
        *self.shared.faults.chunk_write_budget.lock() = None;
    }

    /// Raw number of chunks stored for an id, visible or not
    pub fn stored_chunk_count(&self, id: &FileId) -> usize {
        self.read(|bucket| bucket.chunks.get(id).map_or(0, BTreeMap::len))
    }

    /// Number of uploads allocated but never finalized
    pub fn pending_count(&self) -> usize {
        self.read(|bucket| bucket.pending.len())
    }

    /// Number of visible files
    pub fn file_count(&self) -> usize {
        self.read(|bucket| bucket.files.len())
    }

    fn next_seq(&self) -> u64 {
        self.shared.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn check_online(&self) -> GridResult<()> {
        if self.shared.faults.offline.load(Ordering::SeqCst) {
            return Err(GridError::unavailable(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("memory catalog for bucket {} is offline", self.bucket),
            )));
        }
        Ok(())
    }

    fn consume_chunk_write(&self) -> GridResult<()> {
        let mut budget = self.shared.faults.chunk_write_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(GridError::unavailable(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "chunk write timed out",
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&BucketCollections) -> R) -> R {
        let buckets = self.shared.buckets.read();
        match buckets.get(&self.bucket) {
            Some(bucket) => f(bucket),
            None => f(&BucketCollections::default()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut BucketCollections) -> R) -> R {
        let mut buckets = self.shared.buckets.write();
        f(buckets.entry(self.bucket.clone()).or_default())
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalog {
    async fn allocate_file_id(&self) -> GridResult<FileId> {
        self.check_online()?;
        let seq = self.next_seq();
        let now = Utc::now();

        Ok(self.write(|bucket| {
            let mut id = FileId::new();
            while bucket.id_in_use(&id) {
                id = FileId::new();
            }
            bucket.pending.insert(id.clone(), PendingFile { seq, last_activity: now });
            id
        }))
    }

    async fn reserve_file_id(&self, id: FileId) -> GridResult<FileId> {
        self.check_online()?;
        let seq = self.next_seq();
        let now = Utc::now();

        self.write(|bucket| {
            if bucket.id_in_use(&id) {
                return Err(GridError::already_finalized(id.as_str()));
            }
            bucket.pending.insert(id.clone(), PendingFile { seq, last_activity: now });
            Ok(id)
        })
    }

    async fn insert_chunk(&self, chunk: ChunkRecord) -> GridResult<()> {
        self.check_online()?;
        self.consume_chunk_write()?;
        let now = Utc::now();

        self.write(|bucket| {
            if bucket.files.contains_key(&chunk.files_id) {
                return Err(GridError::already_finalized(chunk.files_id.as_str()));
            }
            let Some(pending) = bucket.pending.get_mut(&chunk.files_id) else {
                return Err(GridError::not_found(format!("upload {}", chunk.files_id)));
            };
            pending.last_activity = now;
            bucket
                .chunks
                .entry(chunk.files_id)
                .or_default()
                .insert(chunk.n, chunk.data);
            Ok(())
        })
    }

    async fn finalize_file(&self, file: FileRecord) -> GridResult<FileRecord> {
        self.check_online()?;

        self.write(|bucket| {
            if bucket.files.contains_key(&file.id) {
                return Err(GridError::already_finalized(file.id.as_str()));
            }
            let Some(pending) = bucket.pending.remove(&file.id) else {
                return Err(GridError::not_found(format!("upload {}", file.id)));
            };
            let seq = pending.seq;
            bucket.files.insert(
                file.id.clone(),
                VisibleFile {
                    record: file.clone(),
                    seq,
                },
            );
            Ok(file)
        })
    }

    async fn find_one(&self, criteria: &FileCriteria) -> GridResult<FileRecord> {
        self.check_online()?;

        let found = self.read(|bucket| match criteria {
            FileCriteria::Id(id) => bucket.files.get(id).map(|stored| stored.record.clone()),
            FileCriteria::Filename { filename, revision: wanted } => {
                let candidates: Vec<VisibleFile> = bucket
                    .files
                    .values()
                    .filter(|stored| &stored.record.filename == filename)
                    .cloned()
                    .collect();
                revision::resolve(candidates, *wanted, |stored| {
                    (stored.record.upload_date, stored.seq)
                })
                .map(|stored| stored.record)
            }
        });

        found.ok_or_else(|| GridError::not_found(criteria.to_string()))
    }

    async fn list_chunks(&self, files_id: &FileId, from: u32, to: u32) -> GridResult<Vec<ChunkRecord>> {
        self.check_online()?;

        self.read(|bucket| {
            if !bucket.files.contains_key(files_id) {
                return Err(GridError::not_found(format!("file {}", files_id)));
            }
            if from >= to {
                return Ok(Vec::new());
            }
            Ok(bucket
                .chunks
                .get(files_id)
                .map(|chunks| {
                    chunks
                        .range(from..to)
                        .map(|(n, data)| ChunkRecord::new(files_id.clone(), *n, data.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn delete_chunks(&self, files_id: &FileId) -> GridResult<()> {
        self.check_online()?;
        self.write(|bucket| {
            bucket.chunks.remove(files_id);
        });
        Ok(())
    }

    async fn delete_file(&self, files_id: &FileId) -> GridResult<()> {
        self.check_online()?;
        self.write(|bucket| {
            bucket.files.remove(files_id);
            bucket.pending.remove(files_id);
        });
        Ok(())
    }

    async fn find_orphans(&self, older_than: DateTime<Utc>) -> GridResult<Vec<FileId>> {
        self.check_online()?;
        Ok(self.read(|bucket| {
            let mut orphans: Vec<(u64, FileId)> = bucket
                .pending
                .iter()
                .filter(|(_, pending)| pending.last_activity < older_than)
                .map(|(id, pending)| (pending.seq, id.clone()))
                .collect();
            orphans.sort();
            orphans.into_iter().map(|(_, id)| id).collect()
        }))
    }
}
