//! # dog-gridfs: Chunked blob storage over a document catalog
//!
//! `dog-gridfs` stores large files as fixed-size chunks next to a queryable
//! catalog entry per file (length, content hash, content type, aliases,
//! free-form metadata). Files are written and read incrementally, so a
//! multi-gigabyte upload never has to sit in memory.
//!
//! ## Key Features
//!
//! - **Streaming both ways**: uploads buffer at most one chunk, downloads hold
//!   at most one chunk
//! - **No partial reads**: a file becomes visible only when its upload finalizes
//! - **Revisions**: several uploads may share a filename; pick one by offset
//!   from the oldest (`0`, `1`, ...) or the newest (`-1`, `-2`, ...)
//! - **Range reads**: serve `[start, end)` windows without touching other chunks
//! - **Form ingestion**: a storage engine for multipart parsers, with rollback
//! - **Storage agnostic**: anything implementing [`CatalogRepository`]
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_gridfs::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> GridResult<()> {
//! let bucket = GridBucket::in_memory(&MemoryCatalog::new(), BucketConfig::default())?;
//!
//! let file = bucket
//!     .upload_bytes("hello.txt", UploadOptions::new().with_content_type("text/plain"), Bytes::from("Hello, world!"))
//!     .await?;
//!
//! let bytes = bucket.download_buffered(&DownloadRequest::by_id(file.id.clone()).with_range(0, 5)).await?;
//! assert_eq!(&bytes[..], b"Hello");
//!
//! bucket.remove(&file.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────┐
//! │ GridStorage / ingest_multipart │  ← form uploads
//! ├────────────────────────────────┤
//! │           GridBucket           │  ← engine API
//! ├────────────────┬───────────────┤
//! │  UploadStream  │ DownloadStream│  ← per-file state machines
//! ├────────────────┴───────────────┤
//! │       CatalogRepository        │  ← files + chunks persistence
//! └────────────────────────────────┘
//! ```
//!
//! Uploads that never finish leave their chunks behind. They are invisible to
//! every read path; run an [`OrphanReaper`] to collect them.

mod bucket;
pub mod catalog;
pub mod codec;
mod config;
pub mod deletion;
mod download;
mod error;
mod ingest;
mod memory;
mod multipart;
mod reaper;
mod record;
pub mod revision;
mod types;
mod upload;

pub use bucket::GridBucket;
pub use catalog::{CatalogRepository, CatalogRepositoryExt};
pub use codec::ContentDigest;
pub use config::{BucketConfig, DEFAULT_BUCKET_NAME, DEFAULT_CHUNK_SIZE, DEFAULT_MODEL_NAME};
pub use download::{DownloadState, DownloadStream};
pub use error::{GridError, GridResult};
pub use ingest::{FileField, GridStorage, IngestRequest, StorageEngine, StoredFile};
pub use memory::MemoryCatalog;
pub use multipart::{ingest_multipart, IngestedForm, MultipartLimits, DEFAULT_MAX_FIELD_SIZE};
pub use reaper::OrphanReaper;
pub use record::{ChunkRecord, FileRecord};
pub use revision::{Revision, RevisionQuery, SortOrder};
pub use types::{
    ByteRange, ByteStream, DownloadRequest, FileCriteria, FileId, ResolvedRange, UploadOptions,
};
pub use upload::{UploadState, UploadStream};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BucketConfig, ByteStream, CatalogRepository, DownloadRequest, FileCriteria, FileId,
        FileRecord, GridBucket, GridError, GridResult, MemoryCatalog, Revision, UploadOptions,
    };
}
