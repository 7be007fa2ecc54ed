use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{ChunkRecord, FileCriteria, FileId, FileRecord, GridResult};

/// Persistence for file records and chunk records.
///
/// Implementations sit on a document store with at least read-your-writes
/// consistency per document. Every method may suspend on I/O and fails with
/// `StorageUnavailable` when the store cannot be reached; implementations
/// never retry internally.
///
/// A file id handed out by [`allocate_file_id`](Self::allocate_file_id) or
/// [`reserve_file_id`](Self::reserve_file_id) stays pending, invisible to
/// [`find_one`](Self::find_one) and [`list_chunks`](Self::list_chunks), until
/// [`finalize_file`](Self::finalize_file) succeeds. Only pending ids accept
/// chunks, so one id never has two writers.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Reserve a fresh id that collides with no existing file
    async fn allocate_file_id(&self) -> GridResult<FileId>;

    /// Reserve a caller-chosen id as pending.
    ///
    /// Fails with `AlreadyFinalized` if the id is visible or another upload
    /// already holds it.
    async fn reserve_file_id(&self, id: FileId) -> GridResult<FileId>;

    /// Store chunk `n` of a pending file and record the write as activity.
    ///
    /// Writing the same `(files_id, n)` twice overwrites; it is not an error.
    /// Fails with `AlreadyFinalized` if the file is visible and `NotFound` if
    /// no upload holds the id.
    async fn insert_chunk(&self, chunk: ChunkRecord) -> GridResult<()>;

    /// Make a pending file visible. Fails with `AlreadyFinalized` if the id
    /// is already visible and `NotFound` if it is not pending.
    async fn finalize_file(&self, file: FileRecord) -> GridResult<FileRecord>;

    /// Find one visible file.
    ///
    /// Filename criteria are answered with the revision's sorted query
    /// (see [`crate::revision`]) rather than by loading every candidate.
    async fn find_one(&self, criteria: &FileCriteria) -> GridResult<FileRecord>;

    /// Chunks `from..to` of a visible file, ascending by index.
    ///
    /// Missing indexes are simply absent from the result; callers decide
    /// whether that is corruption.
    async fn list_chunks(&self, files_id: &FileId, from: u32, to: u32) -> GridResult<Vec<ChunkRecord>>;

    /// Remove every chunk of a file. Unknown ids are not an error.
    async fn delete_chunks(&self, files_id: &FileId) -> GridResult<()>;

    /// Remove a file record, pending or visible. Unknown ids are not an error.
    async fn delete_file(&self, files_id: &FileId) -> GridResult<()>;

    /// Pending uploads with no activity since `older_than`
    async fn find_orphans(&self, older_than: DateTime<Utc>) -> GridResult<Vec<FileId>>;
}

/// Convenience helpers over any repository
#[async_trait]
pub trait CatalogRepositoryExt: CatalogRepository {
    /// Insert chunk `n` from raw parts
    async fn put_chunk(&self, files_id: &FileId, n: u32, data: Bytes) -> GridResult<()> {
        self.insert_chunk(ChunkRecord::new(files_id.clone(), n, data)).await
    }

    async fn find_by_id(&self, id: &FileId) -> GridResult<FileRecord> {
        self.find_one(&FileCriteria::Id(id.clone())).await
    }
}

impl<T: CatalogRepository + ?Sized> CatalogRepositoryExt for T {}
