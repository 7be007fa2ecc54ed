use std::sync::Arc;

use bytes::Bytes;
use tracing::instrument;

use crate::{
    deletion, BucketConfig, ByteStream, CatalogRepository, DownloadRequest, DownloadStream,
    FileCriteria, FileId, FileRecord, GridResult, MemoryCatalog, OrphanReaper, UploadOptions,
    UploadStream,
};

/// The engine API for one bucket.
///
/// Cheap to clone; every clone talks to the same catalog. Uploads and
/// downloads started from a bucket are independent of each other and of
/// the bucket itself.
#[derive(Clone)]
pub struct GridBucket {
    catalog: Arc<dyn CatalogRepository>,
    config: Arc<BucketConfig>,
}

impl GridBucket {
    /// Create a bucket over a catalog already scoped to `config.bucket_name`
    pub fn new<C: CatalogRepository + 'static>(catalog: C, config: BucketConfig) -> GridResult<Self> {
        Self::with_catalog(Arc::new(catalog), config)
    }

    pub fn with_catalog(catalog: Arc<dyn CatalogRepository>, config: BucketConfig) -> GridResult<Self> {
        config.validate()?;
        Ok(Self {
            catalog,
            config: Arc::new(config),
        })
    }

    /// Bucket backed by the in-memory catalog, namespaced by the bucket name
    pub fn in_memory(store: &MemoryCatalog, config: BucketConfig) -> GridResult<Self> {
        let catalog = store.bucket(config.bucket_name.clone());
        Self::new(catalog, config)
    }

    pub fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogRepository> {
        &self.catalog
    }

    /// Open an upload the caller feeds with [`UploadStream::write`]
    #[instrument(skip(self, options), fields(bucket = %self.config.bucket_name))]
    pub async fn upload_stream(&self, filename: &str, options: UploadOptions) -> GridResult<UploadStream> {
        UploadStream::open(self.catalog.clone(), &self.config, filename, options).await
    }

    /// Upload a whole source stream and wait for the finalized record
    #[instrument(skip(self, options, body), fields(bucket = %self.config.bucket_name))]
    pub async fn upload_and_await(
        &self,
        filename: &str,
        options: UploadOptions,
        body: ByteStream,
    ) -> GridResult<FileRecord> {
        let mut upload = UploadStream::open(self.catalog.clone(), &self.config, filename, options).await?;
        upload.write_stream(body).await?;
        upload.finish().await
    }

    /// Upload bytes already in memory
    pub async fn upload_bytes(&self, filename: &str, options: UploadOptions, data: Bytes) -> GridResult<FileRecord> {
        let mut upload = UploadStream::open(self.catalog.clone(), &self.config, filename, options).await?;
        upload.write(data).await?;
        upload.finish().await
    }

    /// Resolve the file and position a chunk cursor on it
    #[instrument(skip(self), fields(bucket = %self.config.bucket_name))]
    pub async fn open_download(&self, request: &DownloadRequest) -> GridResult<DownloadStream> {
        DownloadStream::open(self.catalog.clone(), request).await
    }

    /// Resolve the file, then stream it.
    ///
    /// Resolution errors come back here; errors while streaming arrive on
    /// the stream.
    pub async fn download_stream(&self, request: &DownloadRequest) -> GridResult<ByteStream> {
        Ok(self.open_download(request).await?.into_stream())
    }

    /// Read the requested bytes into one buffer
    pub async fn download_buffered(&self, request: &DownloadRequest) -> GridResult<Bytes> {
        self.open_download(request).await?.read_all().await
    }

    /// Delete a file and its chunks, returning the removed record
    #[instrument(skip(self), fields(bucket = %self.config.bucket_name, file_id = %id))]
    pub async fn remove(&self, id: &FileId) -> GridResult<FileRecord> {
        deletion::delete_file(self.catalog.as_ref(), id).await
    }

    /// Same as [`remove`](Self::remove)
    pub async fn unlink(&self, id: &FileId) -> GridResult<FileRecord> {
        self.remove(id).await
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket_name))]
    pub async fn find_one(&self, criteria: &FileCriteria) -> GridResult<FileRecord> {
        self.catalog.find_one(criteria).await
    }

    pub async fn find_by_id(&self, id: &FileId) -> GridResult<FileRecord> {
        self.find_one(&FileCriteria::Id(id.clone())).await
    }

    /// Orphan reaper over this bucket using the configured grace period
    pub fn reaper(&self) -> OrphanReaper {
        OrphanReaper::new(self.catalog.clone(), self.config.orphan_grace)
    }
}

impl std::fmt::Debug for GridBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridBucket")
            .field("config", &self.config)
            .finish()
    }
}
