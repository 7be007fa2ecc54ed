use std::num::NonZeroU32;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::{
    codec::{self, ContentDigest},
    BucketConfig, ByteStream, CatalogRepository, ChunkRecord, FileId, FileRecord, GridError,
    GridResult, UploadOptions,
};

/// Where an upload is in its life.
///
/// `Open -> Writing -> Finalizing -> Done`, or `Failed` from any state
/// before `Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Open,
    Writing,
    Finalizing,
    Done,
    Failed,
}

/// Write side of one file.
///
/// Bytes pushed with [`write`](Self::write) are cut into chunks and stored as
/// soon as a whole chunk is available; at most one chunk's worth of bytes is
/// held between calls. [`finish`](Self::finish) stores the short tail and
/// makes the file visible. Dropping or aborting the stream before that leaves
/// the chunks already stored in place as orphans.
pub struct UploadStream {
    catalog: Arc<dyn CatalogRepository>,
    id: FileId,
    filename: String,
    content_type: Option<String>,
    aliases: Vec<String>,
    metadata: serde_json::Value,
    chunk_size: NonZeroU32,
    buffer: BytesMut,
    next_index: u32,
    length: u64,
    digest: Option<ContentDigest>,
    state: UploadState,
    failure: Option<GridError>,
}

impl UploadStream {
    /// Start an upload: validate arguments and reserve the file id
    pub async fn open(
        catalog: Arc<dyn CatalogRepository>,
        config: &BucketConfig,
        filename: impl Into<String>,
        options: UploadOptions,
    ) -> GridResult<Self> {
        let filename = filename.into();
        if filename.trim().is_empty() {
            return Err(GridError::invalid("Missing filename"));
        }

        let chunk_size = NonZeroU32::new(options.chunk_size.unwrap_or(config.chunk_size_bytes))
            .ok_or_else(|| GridError::invalid("Chunk size must be greater than zero"))?;

        let id = match options.id {
            Some(id) => catalog.reserve_file_id(id).await?,
            None => catalog.allocate_file_id().await?,
        };

        debug!("Opened upload {} for {:?} with chunk size {}", id, filename, chunk_size);

        Ok(Self {
            catalog,
            id,
            filename,
            content_type: options.content_type,
            aliases: options.aliases,
            metadata: options.metadata,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size.get() as usize),
            next_index: 0,
            length: 0,
            digest: config.content_hash.then(ContentDigest::new),
            state: UploadState::Open,
            failure: None,
        })
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size.get()
    }

    /// Chunks stored so far
    pub fn chunks_written(&self) -> u32 {
        self.next_index
    }

    /// Bytes accepted so far, stored or buffered
    pub fn bytes_accepted(&self) -> u64 {
        self.length + self.buffer.len() as u64
    }

    /// Bytes held back waiting for a chunk boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Accept more bytes, storing every chunk they complete.
    ///
    /// Returns once all complete chunks are stored, which is how the caller
    /// is held back when the catalog is slower than the source.
    pub async fn write(&mut self, data: Bytes) -> GridResult<()> {
        self.ensure_writable()?;
        self.state = UploadState::Writing;

        let size = self.chunk_size.get() as usize;
        let mut data = data;

        // top up a partial chunk first
        if !self.buffer.is_empty() {
            let take = (size - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data.split_to(take));
            if self.buffer.len() == size {
                let block = self.buffer.split().freeze();
                self.store_chunk(self.next_index, block).await?;
            }
        }

        let whole = data.len() - data.len() % size;
        if whole > 0 {
            for (n, block) in codec::split_from(data.split_to(whole), self.chunk_size, self.next_index) {
                self.store_chunk(n, block).await?;
            }
        }

        if !data.is_empty() {
            self.buffer.extend_from_slice(&data);
        }
        Ok(())
    }

    /// Drain a source stream into the upload.
    ///
    /// A source error aborts the upload with `AbortedByCaller`.
    pub async fn write_stream(&mut self, mut source: ByteStream) -> GridResult<()> {
        while let Some(item) = source.next().await {
            match item {
                Ok(bytes) => self.write(bytes).await?,
                Err(e) => return Err(self.abort(format!("source stream failed: {}", e))),
            }
        }
        Ok(())
    }

    /// Store the tail, then make the file visible.
    ///
    /// Fails with `NotFound` if the catalog no longer holds the upload, for
    /// instance after an orphan reaper collected it.
    #[instrument(skip(self), fields(file_id = %self.id, filename = %self.filename))]
    pub async fn finish(&mut self) -> GridResult<FileRecord> {
        self.ensure_writable()?;
        self.state = UploadState::Finalizing;

        if !self.buffer.is_empty() {
            let block = self.buffer.split().freeze();
            self.store_chunk(self.next_index, block).await?;
        }

        let file = FileRecord {
            id: self.id.clone(),
            filename: self.filename.clone(),
            length: self.length,
            chunk_size: self.chunk_size.get(),
            upload_date: Utc::now(),
            content_hash: self.digest.take().map(ContentDigest::finalize),
            content_type: self.content_type.take(),
            aliases: std::mem::take(&mut self.aliases),
            metadata: std::mem::take(&mut self.metadata),
        };

        match self.catalog.finalize_file(file).await {
            Ok(file) => {
                self.state = UploadState::Done;
                info!(
                    "Finalized file {} ({} bytes in {} chunks)",
                    file.id, file.length, self.next_index
                );
                Ok(file)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Stop the upload without finalizing it.
    ///
    /// Returns the `AbortedByCaller` error to hand to whoever is waiting on
    /// the upload. Chunks already stored stay behind as orphans.
    pub fn abort<S: Into<String>>(&mut self, reason: S) -> GridError {
        let reason = reason.into();
        self.state = UploadState::Failed;
        self.failure = Some(GridError::aborted(self.id.as_str(), reason.clone()));
        warn!(
            "Upload {} aborted after {} chunks: {}",
            self.id, self.next_index, reason
        );
        GridError::aborted(self.id.as_str(), reason)
    }

    async fn store_chunk(&mut self, n: u32, block: Bytes) -> GridResult<()> {
        let Some(next) = n.checked_add(1) else {
            let err = GridError::invalid(format!(
                "Upload {} needs more than {} chunks; use a larger chunk size",
                self.id,
                u32::MAX
            ));
            return Err(self.fail(err));
        };
        let len = block.len() as u64;
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&block);
        }

        if let Err(e) = self
            .catalog
            .insert_chunk(ChunkRecord::new(self.id.clone(), n, block))
            .await
        {
            return Err(self.fail(e));
        }

        self.length += len;
        self.next_index = next;
        debug!("Stored chunk {} of {} ({} bytes)", n, self.id, len);
        Ok(())
    }

    fn fail(&mut self, error: GridError) -> GridError {
        self.state = UploadState::Failed;
        warn!("Upload {} failed: {}", self.id, error);
        self.failure = Some(error.duplicate());
        error
    }

    /// Later calls on a failed upload report the error that failed it
    fn ensure_writable(&self) -> GridResult<()> {
        match self.state {
            UploadState::Open | UploadState::Writing => Ok(()),
            UploadState::Failed => Err(match &self.failure {
                Some(failure) => failure.duplicate(),
                None => GridError::aborted(self.id.as_str(), "upload failed"),
            }),
            UploadState::Finalizing | UploadState::Done => {
                Err(GridError::already_finalized(self.id.as_str()))
            }
        }
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        if matches!(self.state, UploadState::Open | UploadState::Writing) && self.next_index > 0 {
            warn!(
                "Upload {} dropped before finish, leaving {} orphaned chunks",
                self.id, self.next_index
            );
        }
    }
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("id", &self.id)
            .field("filename", &self.filename)
            .field("state", &self.state)
            .field("chunk_size", &self.chunk_size)
            .field("chunks_written", &self.next_index)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
