use std::time::Duration;

use crate::{GridError, GridResult};

/// Bucket name used when none is configured
pub const DEFAULT_BUCKET_NAME: &str = "fs";

/// Model name whose bucket is [`DEFAULT_BUCKET_NAME`]
pub const DEFAULT_MODEL_NAME: &str = "File";

/// Default chunk size: 255 KiB
pub const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;

/// Configuration for a bucket
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Namespace for the files and chunks collections
    pub bucket_name: String,

    /// Model name this bucket backs
    pub model_name: String,

    /// Chunk size for new files, unless overridden per upload
    pub chunk_size_bytes: u32,

    /// Compute a content hash while uploading
    pub content_hash: bool,

    /// How old a pending upload must be before the reaper may remove it
    pub orphan_grace: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_BUCKET_NAME.to_string(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            content_hash: true,
            orphan_grace: Duration::from_secs(60 * 60),
        }
    }
}

impl BucketConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for a model, deriving the bucket name from it.
    ///
    /// The default model keeps the `fs` bucket; any other model uses its
    /// lower-cased plural (`Lyric` -> `lyrics`).
    pub fn for_model<S: Into<String>>(model_name: S) -> Self {
        let model_name = model_name.into();
        let bucket_name = if model_name.is_empty() || model_name == DEFAULT_MODEL_NAME {
            DEFAULT_BUCKET_NAME.to_string()
        } else {
            collection_name(&model_name)
        };

        Self {
            bucket_name,
            model_name: if model_name.is_empty() {
                DEFAULT_MODEL_NAME.to_string()
            } else {
                model_name
            },
            ..Self::default()
        }
    }

    /// Set bucket name
    pub fn with_bucket_name<S: Into<String>>(mut self, name: S) -> Self {
        self.bucket_name = name.into();
        self
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u32) -> Self {
        self.chunk_size_bytes = bytes;
        self
    }

    /// Skip content hashing for uploads
    pub fn disable_content_hash(mut self) -> Self {
        self.content_hash = false;
        self
    }

    /// Set reaper grace period
    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    /// Apply environment overrides.
    ///
    /// `<PREFIX>BUCKET_NAME`, `<PREFIX>CHUNK_SIZE_BYTES`,
    /// `<PREFIX>DISABLE_CONTENT_HASH` and `<PREFIX>ORPHAN_GRACE_SECS` are read
    /// when present; anything else is left as configured.
    pub fn from_env(mut self, prefix: &str) -> GridResult<Self> {
        fn get_env(prefix: &str, key: &str) -> Option<String> {
            std::env::var(format!("{}{}", prefix, key)).ok()
        }

        if let Some(name) = get_env(prefix, "BUCKET_NAME") {
            self.bucket_name = name;
        }
        if let Some(size) = get_env(prefix, "CHUNK_SIZE_BYTES") {
            self.chunk_size_bytes = size.parse().map_err(|_| {
                GridError::invalid(format!("{}CHUNK_SIZE_BYTES must be an integer, got {:?}", prefix, size))
            })?;
        }
        if let Some(flag) = get_env(prefix, "DISABLE_CONTENT_HASH") {
            self.content_hash = !matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(secs) = get_env(prefix, "ORPHAN_GRACE_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                GridError::invalid(format!("{}ORPHAN_GRACE_SECS must be an integer, got {:?}", prefix, secs))
            })?;
            self.orphan_grace = Duration::from_secs(secs);
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations no bucket can run with
    pub fn validate(&self) -> GridResult<()> {
        if self.bucket_name.trim().is_empty() {
            return Err(GridError::invalid("Bucket name must not be empty"));
        }
        if self.chunk_size_bytes == 0 {
            return Err(GridError::invalid("Chunk size must be greater than zero"));
        }
        Ok(())
    }

    /// Name of the files collection
    pub fn files_collection(&self) -> String {
        format!("{}.files", self.bucket_name)
    }

    /// Name of the chunks collection
    pub fn chunks_collection(&self) -> String {
        format!("{}.chunks", self.bucket_name)
    }
}

fn collection_name(model_name: &str) -> String {
    let lower = model_name.to_lowercase();
    if lower.ends_with('s') {
        lower
    } else {
        format!("{}s", lower)
    }
}
