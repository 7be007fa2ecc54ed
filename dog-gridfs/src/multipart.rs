use std::collections::HashSet;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::{ByteStream, FileField, GridError, GridResult, IngestRequest, StorageEngine, StoredFile};

/// Default cap on one text field
pub const DEFAULT_MAX_FIELD_SIZE: u64 = 1024 * 1024;

/// Limits applied while ingesting a form
#[derive(Debug, Clone)]
pub struct MultipartLimits {
    /// Maximum bytes per file field (None = unlimited)
    pub max_file_size: Option<u64>,
    /// Maximum bytes per text field (None = unlimited)
    pub max_field_size: Option<u64>,
    /// Allowed content types for file fields (empty = all allowed)
    pub allowed_content_types: HashSet<String>,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_file_size: None,
            max_field_size: Some(DEFAULT_MAX_FIELD_SIZE),
            allowed_content_types: HashSet::new(),
        }
    }
}

impl MultipartLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn max_field_size(mut self, bytes: u64) -> Self {
        self.max_field_size = Some(bytes);
        self
    }

    /// Lift the text field cap
    pub fn unlimited_fields(mut self) -> Self {
        self.max_field_size = None;
        self
    }

    pub fn allow_content_type(mut self, content_type: &str) -> Self {
        self.allowed_content_types.insert(content_type.to_string());
        self
    }

    fn check_content_type(&self, field: &str, content_type: Option<&str>) -> GridResult<()> {
        if self.allowed_content_types.is_empty() {
            return Ok(());
        }
        match content_type {
            Some(ct) if self.allowed_content_types.contains(ct) => Ok(()),
            other => Err(GridError::invalid(format!(
                "Content type {:?} not allowed for field '{}'",
                other, field
            ))),
        }
    }
}

/// Everything a form produced: its text fields and the files stored from it
#[derive(Debug, Clone, Default)]
pub struct IngestedForm {
    pub request: IngestRequest,
    pub files: Vec<StoredFile>,
}

/// Drive a whole multipart form through a storage engine.
///
/// Text fields are collected into the request as they arrive; a file field
/// sees only the text fields sent before it. A field with a file name is a
/// file field. If any field fails, every file already stored for the form is
/// removed again before the error is returned.
pub async fn ingest_multipart<S>(
    storage: &S,
    multipart: multer::Multipart<'static>,
    limits: &MultipartLimits,
) -> GridResult<IngestedForm>
where
    S: StorageEngine + ?Sized,
{
    let mut form = IngestedForm::default();

    match read_fields(storage, multipart, limits, &mut form).await {
        Ok(()) => {
            debug!(
                "Ingested form with {} files and {} text fields",
                form.files.len(),
                form.request.len()
            );
            Ok(form)
        }
        Err(e) => {
            warn!("Form ingestion failed, rolling back {} files: {}", form.files.len(), e);
            for stored in &form.files {
                if let Err(rollback) = storage.remove_file(&form.request, stored).await {
                    warn!("Rollback of {} failed: {}", stored.record.id, rollback);
                }
            }
            Err(e)
        }
    }
}

async fn read_fields<S>(
    storage: &S,
    mut multipart: multer::Multipart<'static>,
    limits: &MultipartLimits,
    form: &mut IngestedForm,
) -> GridResult<()>
where
    S: StorageEngine + ?Sized,
{
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or("unknown").to_string();
        let filename = field.file_name().map(|f| f.to_string());
        let content_type = field.content_type().map(|ct| ct.to_string());

        let Some(filename) = filename else {
            let value = read_text(field, &name, limits.max_field_size).await?;
            form.request.push_field(name, value);
            continue;
        };

        limits.check_content_type(&name, content_type.as_deref())?;

        let mut file = FileField::new(name, limited(field, limits.max_file_size)).with_original_name(filename);
        if let Some(ct) = content_type {
            file = file.with_mime_type(ct);
        }

        let stored = storage.handle_file(&form.request, file).await?;
        form.files.push(stored);
    }
    Ok(())
}

/// Text field body, failing as soon as it passes `max_bytes`
async fn read_text(mut field: multer::Field<'static>, name: &str, max_bytes: Option<u64>) -> GridResult<String> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(form_error)? {
        if let Some(max) = max_bytes {
            if (buf.len() + chunk.len()) as u64 > max {
                return Err(GridError::invalid(format!(
                    "Field '{}' exceeds maximum size of {} bytes",
                    name, max
                )));
            }
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf.to_vec())
        .map_err(|e| GridError::invalid(format!("Field '{}' is not valid UTF-8: {}", name, e)))
}

/// Field body as a byte stream, failing once it passes `max_bytes`
fn limited(field: multer::Field<'static>, max_bytes: Option<u64>) -> ByteStream {
    let stream = async_stream::stream! {
        let mut field = field;
        let mut seen = 0u64;
        while let Some(item) = field.next().await {
            match item {
                Ok(bytes) => {
                    seen += bytes.len() as u64;
                    if let Some(max) = max_bytes {
                        if seen > max {
                            yield Err(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                format!("file exceeds maximum size of {} bytes", max),
                            ));
                            break;
                        }
                    }
                    yield Ok::<Bytes, std::io::Error>(bytes);
                }
                Err(e) => {
                    yield Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

fn form_error(error: multer::Error) -> GridError {
    GridError::invalid(format!("Failed to parse multipart data: {}", error))
}
