use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::{
    ByteRange, ByteStream, CatalogRepository, DownloadRequest, FileCriteria, FileRecord, GridError,
    GridResult, ResolvedRange,
};

/// Where a download is in its life.
///
/// `Resolving -> Streaming -> Done`, or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Resolving,
    Streaming,
    Done,
    Failed,
}

/// Resolved file plus the byte window being served
#[derive(Debug, Clone)]
struct Window {
    file: FileRecord,
    range: ResolvedRange,
}

/// Forward-only cursor over the chunks of one file.
///
/// Starts in `Resolving`; the file is looked up on [`resolve`](Self::resolve)
/// or on the first [`next_chunk`](Self::next_chunk). Fetches one chunk per
/// step and trims the first and last chunk to the requested byte window. A
/// chunk that is missing or has the wrong size ends the download with
/// `CorruptFile`.
pub struct DownloadStream {
    catalog: Arc<dyn CatalogRepository>,
    lookup: Option<(FileCriteria, ByteRange)>,
    window: Option<Window>,
    label: String,
    next_index: u32,
    end_index: u32,
    state: DownloadState,
}

impl DownloadStream {
    /// Cursor in `Resolving`; nothing is read until it is driven
    pub fn new(catalog: Arc<dyn CatalogRepository>, request: &DownloadRequest) -> GridResult<Self> {
        let criteria = request.criteria()?;
        Ok(Self {
            catalog,
            label: criteria.to_string(),
            lookup: Some((criteria, request.range)),
            window: None,
            next_index: 0,
            end_index: 0,
            state: DownloadState::Resolving,
        })
    }

    /// Resolve the requested file and position the cursor on its first chunk
    pub async fn open(catalog: Arc<dyn CatalogRepository>, request: &DownloadRequest) -> GridResult<Self> {
        let mut download = Self::new(catalog, request)?;
        download.resolve().await?;
        Ok(download)
    }

    /// Stream an already resolved file
    pub fn for_file(catalog: Arc<dyn CatalogRepository>, file: FileRecord, range: ByteRange) -> GridResult<Self> {
        let mut download = Self {
            catalog,
            label: file.id.to_string(),
            lookup: None,
            window: None,
            next_index: 0,
            end_index: 0,
            state: DownloadState::Resolving,
        };
        download.position(file, range)?;
        Ok(download)
    }

    /// Look the file up and validate the range; a no-op once resolved
    pub async fn resolve(&mut self) -> GridResult<()> {
        let Some((criteria, range)) = self.lookup.take() else {
            return Ok(());
        };
        let file = match self.catalog.find_one(&criteria).await {
            Ok(file) => file,
            Err(e) => return Err(self.fail(e)),
        };
        match self.position(file, range) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn position(&mut self, file: FileRecord, range: ByteRange) -> GridResult<()> {
        if file.chunk_size == 0 && file.length > 0 {
            return Err(GridError::corrupt(file.id.as_str(), "chunk size is zero"));
        }
        let range = range.resolve(file.length)?;

        let (first, end) = if range.is_empty() {
            (0, 0)
        } else {
            let size = u64::from(file.chunk_size);
            (range.start / size, (range.end + size - 1) / size)
        };
        let too_many = |_: std::num::TryFromIntError| {
            GridError::corrupt(file.id.as_str(), format!("chunk index {} does not fit in u32", end))
        };
        self.next_index = u32::try_from(first).map_err(&too_many)?;
        self.end_index = u32::try_from(end).map_err(&too_many)?;

        self.state = if self.next_index < self.end_index {
            DownloadState::Streaming
        } else {
            DownloadState::Done
        };
        self.label = file.id.to_string();
        self.window = Some(Window { file, range });
        Ok(())
    }

    /// The resolved file; `None` while resolving
    pub fn file(&self) -> Option<&FileRecord> {
        self.window.as_ref().map(|w| &w.file)
    }

    pub fn range(&self) -> Option<ResolvedRange> {
        self.window.as_ref().map(|w| w.range)
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Bytes this download will produce in total, once resolved
    pub fn content_length(&self) -> Option<u64> {
        self.range().map(|range| range.content_length())
    }

    /// Next payload, already trimmed to the byte window; `None` when done
    pub async fn next_chunk(&mut self) -> GridResult<Option<Bytes>> {
        match self.state {
            DownloadState::Resolving => self.resolve().await?,
            DownloadState::Streaming => {}
            DownloadState::Done => return Ok(None),
            DownloadState::Failed => {
                return Err(GridError::invalid(format!("Download of {} has failed", self.label)))
            }
        }
        if self.state == DownloadState::Done {
            return Ok(None);
        }
        let Some(Window { file, range }) = self.window.clone() else {
            return Ok(None);
        };

        let n = self.next_index;
        let chunk = match self.catalog.list_chunks(&file.id, n, n + 1).await {
            Ok(mut chunks) => chunks.pop().filter(|chunk| chunk.n == n),
            Err(e) => return Err(self.fail(e)),
        };
        let chunk = match chunk {
            Some(chunk) => chunk,
            None => {
                let err = GridError::corrupt(file.id.as_str(), format!("chunk {} is missing", n));
                return Err(self.fail(err));
            }
        };

        let expected = file.expected_chunk_len(n).unwrap_or(0);
        if chunk.data.len() as u64 != expected {
            let err = GridError::corrupt(
                file.id.as_str(),
                format!("chunk {} has {} bytes, expected {}", n, chunk.data.len(), expected),
            );
            return Err(self.fail(err));
        }

        let chunk_start = u64::from(n) * u64::from(file.chunk_size);
        let from = range.start.saturating_sub(chunk_start) as usize;
        let to = (range.end - chunk_start).min(expected) as usize;
        let payload = chunk.data.slice(from..to);

        self.next_index += 1;
        if self.next_index >= self.end_index {
            self.state = DownloadState::Done;
        }
        debug!("Read chunk {} of {} ({} bytes)", n, file.id, payload.len());
        Ok(Some(payload))
    }

    /// Collect the whole window into one buffer
    pub async fn read_all(mut self) -> GridResult<Bytes> {
        self.resolve().await?;
        let mut out = BytesMut::with_capacity(self.content_length().unwrap_or(0) as usize);
        while let Some(payload) = self.next_chunk().await? {
            out.extend_from_slice(&payload);
        }
        Ok(out.freeze())
    }

    /// Turn the cursor into a byte stream; errors arrive as `io::Error`
    /// wrapping the `GridError`
    pub fn into_stream(self) -> ByteStream {
        let stream = async_stream::stream! {
            let mut download = self;
            loop {
                match download.next_chunk().await {
                    Ok(Some(payload)) => yield Ok(payload),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e.into_io());
                        break;
                    }
                }
            }
        };
        Box::pin(stream)
    }

    fn fail(&mut self, error: GridError) -> GridError {
        self.state = DownloadState::Failed;
        warn!("Download of {} failed: {}", self.label, error);
        error
    }
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("target", &self.label)
            .field("range", &self.range())
            .field("next_index", &self.next_index)
            .field("end_index", &self.end_index)
            .field("state", &self.state)
            .finish()
    }
}
