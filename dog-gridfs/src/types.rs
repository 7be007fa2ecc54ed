use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

use crate::{GridError, GridResult, Revision};

/// Stream of bytes for file content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Unique identifier for a stored file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    /// Generate a new random file ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// How to pick a single visible file out of the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileCriteria {
    /// Exact file id
    Id(FileId),
    /// Filename, disambiguated by revision
    Filename { filename: String, revision: Revision },
}

impl FileCriteria {
    pub fn id(id: FileId) -> Self {
        Self::Id(id)
    }

    /// Newest file with this name
    pub fn filename<S: Into<String>>(filename: S) -> Self {
        Self::Filename {
            filename: filename.into(),
            revision: Revision::latest(),
        }
    }

    pub fn filename_revision<S: Into<String>>(filename: S, revision: Revision) -> Self {
        Self::Filename {
            filename: filename.into(),
            revision,
        }
    }
}

impl std::fmt::Display for FileCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "file {}", id),
            Self::Filename { filename, revision } => {
                write!(f, "file {:?} at revision {}", filename, revision.value())
            }
        }
    }
}

/// Options for a new upload
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub id: Option<FileId>,
    pub content_type: Option<String>,
    pub aliases: Vec<String>,
    pub metadata: serde_json::Value,
    pub chunk_size: Option<u32>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen id instead of allocating one
    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add an alias; repeats are ignored so the list stays an ordered set
    pub fn with_alias<S: Into<String>>(mut self, alias: S) -> Self {
        let alias = alias.into();
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
        self
    }

    pub fn with_aliases<I, S>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        aliases.into_iter().fold(self, |opts, alias| opts.with_alias(alias))
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_field<K: Into<String>, V: Serialize>(mut self, key: K, value: V) -> Self {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let Some(obj) = self.metadata.as_object_mut() {
            obj.insert(key.into(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null));
        }
        self
    }

    /// Override the bucket's chunk size for this file
    pub fn with_chunk_size(mut self, bytes: u32) -> Self {
        self.chunk_size = Some(bytes);
        self
    }
}

/// Half-open byte window `[start, end)` for partial reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>, // None means "to end of file"
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Whole file
    pub fn full() -> Self {
        Self::default()
    }

    /// Bind the window to a file of `total_size` bytes
    pub fn resolve(&self, total_size: u64) -> GridResult<ResolvedRange> {
        let end = self.end.unwrap_or(total_size);
        if end > total_size {
            return Err(GridError::invalid(format!(
                "Range end ({}) must not be more than the length of the file ({})",
                end, total_size
            )));
        }
        if self.start > end {
            return Err(GridError::invalid(format!(
                "Range start ({}) must not be more than its end ({})",
                self.start, end
            )));
        }

        Ok(ResolvedRange {
            start: self.start,
            end,
            total_size,
        })
    }
}

/// Byte window bound to a concrete file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

impl ResolvedRange {
    pub fn content_length(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_full_content(&self) -> bool {
        self.start == 0 && self.end == self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// What to download: by id, or by filename and revision, plus a byte window
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub id: Option<FileId>,
    pub filename: Option<String>,
    pub revision: Revision,
    pub range: ByteRange,
}

impl DownloadRequest {
    pub fn by_id(id: FileId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_name<S: Into<String>>(filename: S) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Self::default()
        }
    }

    pub fn with_revision(mut self, revision: impl Into<Revision>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Read bytes `[start, end)`
    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = ByteRange::new(start, Some(end));
        self
    }

    pub fn starting_at(mut self, start: u64) -> Self {
        self.range = ByteRange::from_start(start);
        self
    }

    /// Catalog criteria for this request; an id wins over a filename
    pub fn criteria(&self) -> GridResult<FileCriteria> {
        if let Some(id) = &self.id {
            return Ok(FileCriteria::Id(id.clone()));
        }
        match &self.filename {
            Some(filename) if !filename.is_empty() => Ok(FileCriteria::Filename {
                filename: filename.clone(),
                revision: self.revision,
            }),
            _ => Err(GridError::invalid("Missing filename or file id")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_stay_an_ordered_set() {
        let opts = UploadOptions::new()
            .with_aliases(["b", "a", "b"])
            .with_alias("a")
            .with_alias("c");
        assert_eq!(opts.aliases, vec!["b", "a", "c"]);
    }

    #[test]
    fn range_resolution_bounds() {
        let full = ByteRange::full().resolve(1000).unwrap();
        assert!(full.is_full_content());
        assert_eq!(full.content_length(), 1000);

        let window = ByteRange::new(250, Some(260)).resolve(1000).unwrap();
        assert_eq!(window.content_length(), 10);
        assert!(!window.is_full_content());

        assert!(ByteRange::new(10, Some(10)).resolve(1000).unwrap().is_empty());
        assert!(ByteRange::new(0, Some(1001)).resolve(1000).is_err());
        assert!(ByteRange::new(20, Some(10)).resolve(1000).is_err());
        assert!(ByteRange::from_start(1001).resolve(1000).is_err());
    }

    #[test]
    fn id_wins_over_filename() {
        let mut request = DownloadRequest::by_name("a.txt");
        request.id = Some(FileId::from("abc"));
        assert_eq!(request.criteria().unwrap(), FileCriteria::Id(FileId::from("abc")));

        let err = DownloadRequest::default().criteria().unwrap_err();
        assert!(matches!(err, GridError::InvalidArgument { .. }));
    }
}
