use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FileId;

/// Catalog entry for one finalized file.
///
/// Field names follow the `<bucket>.files` collection layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(rename = "_id")]
    pub id: FileId,
    pub filename: String,
    pub length: u64,
    pub chunk_size: u32,
    pub upload_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl FileRecord {
    /// Number of chunks a file of this length and chunk size occupies.
    ///
    /// Not narrowed: a tiny chunk size on a large file can exceed the `u32`
    /// chunk index space, which readers report as corruption.
    pub fn chunk_count(&self) -> u64 {
        if self.length == 0 {
            return 0;
        }
        let size = u64::from(self.chunk_size.max(1));
        (self.length + size - 1) / size
    }

    /// Expected payload length of chunk `n`, or `None` past the last chunk
    pub fn expected_chunk_len(&self, n: u32) -> Option<u64> {
        let count = self.chunk_count();
        let n = u64::from(n);
        if n >= count {
            return None;
        }
        let size = u64::from(self.chunk_size);
        if n + 1 == count {
            Some(self.length - size * (count - 1))
        } else {
            Some(size)
        }
    }

    /// Creation timestamp; files are immutable so this is the upload date
    pub fn created_at(&self) -> DateTime<Utc> {
        self.upload_date
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.upload_date
    }
}

/// One stored slice of a file, addressed by `(files_id, n)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub files_id: FileId,
    pub n: u32,
    pub data: Bytes,
}

impl ChunkRecord {
    pub fn new(files_id: FileId, n: u32, data: Bytes) -> Self {
        Self { files_id, n, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(length: u64, chunk_size: u32) -> FileRecord {
        FileRecord {
            id: FileId::from("f1"),
            filename: "a.txt".to_string(),
            length,
            chunk_size,
            upload_date: Utc::now(),
            content_hash: None,
            content_type: None,
            aliases: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn chunk_geometry() {
        let file = record(1000, 100);
        assert_eq!(file.chunk_count(), 10);
        assert_eq!(file.expected_chunk_len(9), Some(100));
        assert_eq!(file.expected_chunk_len(10), None);

        let file = record(1001, 100);
        assert_eq!(file.chunk_count(), 11);
        assert_eq!(file.expected_chunk_len(10), Some(1));

        let wide = record(5_000_000_000, 1);
        assert_eq!(wide.chunk_count(), 5_000_000_000);
        assert_eq!(wide.expected_chunk_len(u32::MAX), Some(1));

        let empty = record(0, 100);
        assert_eq!(empty.chunk_count(), 0);
        assert_eq!(empty.expected_chunk_len(0), None);
    }

    #[test]
    fn serializes_with_catalog_field_names() {
        let mut file = record(5, 261_120);
        file.content_type = Some("text/plain".to_string());
        file.aliases = vec!["greeting".to_string()];
        file.metadata = json!({ "owner": "ada" });

        let doc = serde_json::to_value(&file).unwrap();
        assert_eq!(doc["_id"], "f1");
        assert_eq!(doc["chunkSize"], 261_120);
        assert_eq!(doc["contentType"], "text/plain");
        assert!(doc.get("uploadDate").is_some());
        assert!(doc.get("contentHash").is_none());

        let back: FileRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(back, file);
    }
}
