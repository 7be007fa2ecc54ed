//! Storage engine contract for multipart form parsers.
//!
//! A form parser hands each uploaded field to [`StorageEngine::handle_file`]
//! and, when a sibling field fails, rolls the accepted ones back with
//! [`StorageEngine::remove_file`]. [`GridStorage`] implements the contract
//! over a [`GridBucket`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{ByteStream, FileRecord, GridBucket, GridError, GridResult, UploadOptions};

/// Text fields of the request the files arrived with, in arrival order
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    fields: Vec<(String, String)>,
}

impl IngestRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn push_field<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.fields.push((name.into(), value.into()));
    }

    /// Last value sent for `name`
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value sent for `name`, in order
    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Aliases from `aliases` / `aliases[]` fields.
    ///
    /// A value holding a JSON array contributes each of its strings.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        let values = self.fields_named("aliases").chain(self.fields_named("aliases[]"));
        for value in values {
            match serde_json::from_str::<Vec<String>>(value) {
                Ok(list) => aliases.extend(list),
                Err(_) => aliases.push(value.to_string()),
            }
        }
        aliases
    }

    /// The `metadata` field, JSON-decoded when it parses, else the raw string
    pub fn metadata(&self) -> Value {
        match self.field("metadata") {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            None => Value::Null,
        }
    }
}

/// One uploaded file field as the parser sees it
pub struct FileField {
    pub field_name: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub stream: ByteStream,
}

impl FileField {
    pub fn new<S: Into<String>>(field_name: S, stream: ByteStream) -> Self {
        Self {
            field_name: field_name.into(),
            original_name: None,
            mime_type: None,
            stream,
        }
    }

    pub fn with_original_name<S: Into<String>>(mut self, name: S) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

impl std::fmt::Debug for FileField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileField")
            .field("field_name", &self.field_name)
            .field("original_name", &self.original_name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// What a form parser gets back for an accepted file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    #[serde(flatten)]
    pub record: FileRecord,
    /// Same as `record.length`
    pub size: u64,
    pub bucket_name: String,
    pub field_name: String,
}

impl StoredFile {
    pub fn new(record: FileRecord, bucket_name: String, field_name: String) -> Self {
        Self {
            size: record.length,
            record,
            bucket_name,
            field_name,
        }
    }
}

/// The two hooks a form parser calls per uploaded field
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store one file field and return its finalized record
    async fn handle_file(&self, request: &IngestRequest, file: FileField) -> GridResult<StoredFile>;

    /// Undo a file accepted earlier in the same request
    async fn remove_file(&self, request: &IngestRequest, file: &StoredFile) -> GridResult<()>;
}

/// [`StorageEngine`] writing into a bucket
#[derive(Debug, Clone)]
pub struct GridStorage {
    bucket: GridBucket,
}

impl GridStorage {
    pub fn new(bucket: GridBucket) -> Self {
        Self { bucket }
    }

    pub fn bucket(&self) -> &GridBucket {
        &self.bucket
    }

    fn upload_options(request: &IngestRequest, file: &FileField) -> UploadOptions {
        let mut options = UploadOptions::new()
            .with_aliases(request.aliases())
            .with_metadata(request.metadata());
        if let Some(mime_type) = &file.mime_type {
            options = options.with_content_type(mime_type.clone());
        }
        options
    }
}

#[async_trait]
impl StorageEngine for GridStorage {
    #[instrument(skip(self, request, file), fields(bucket = %self.bucket.bucket_name(), field = %file.field_name))]
    async fn handle_file(&self, request: &IngestRequest, file: FileField) -> GridResult<StoredFile> {
        let options = Self::upload_options(request, &file);
        let filename = file.original_name.clone().unwrap_or_default();
        let FileField { field_name, stream, .. } = file;

        let record = self.bucket.upload_and_await(&filename, options, stream).await?;
        Ok(StoredFile::new(record, self.bucket.bucket_name().to_string(), field_name))
    }

    async fn remove_file(&self, _request: &IngestRequest, file: &StoredFile) -> GridResult<()> {
        if file.record.id.as_str().is_empty() {
            return Ok(());
        }
        match self.bucket.remove(&file.record.id).await {
            Ok(_) => Ok(()),
            Err(GridError::NotFound { .. }) => {
                debug!("File {} already gone during rollback", file.record.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
