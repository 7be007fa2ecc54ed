use thiserror::Error;

/// Result type for bucket operations
pub type GridResult<T> = Result<T, GridError>;

/// Errors that can occur during bucket operations
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("File already finalized: {id}")]
    AlreadyFinalized { id: String },

    #[error("Corrupt file {id}: {reason}")]
    CorruptFile { id: String, reason: String },

    #[error("Storage unavailable: {source}")]
    StorageUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload {id} aborted by caller: {reason}")]
    AbortedByCaller { id: String, reason: String },
}

impl GridError {
    /// Create an invalid argument error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an already finalized error
    pub fn already_finalized<S: Into<String>>(id: S) -> Self {
        Self::AlreadyFinalized { id: id.into() }
    }

    /// Create a corrupt file error
    pub fn corrupt<I: Into<String>, R: Into<String>>(id: I, reason: R) -> Self {
        Self::CorruptFile {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage unavailable error from any backend error type
    pub fn unavailable<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StorageUnavailable {
            source: Box::new(error),
        }
    }

    /// Create an aborted-by-caller error
    pub fn aborted<I: Into<String>, R: Into<String>>(id: I, reason: R) -> Self {
        Self::AbortedByCaller {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Same kind and message, for reporting one failure more than once.
    ///
    /// A backend source is carried over as its message.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::InvalidArgument { message } => Self::invalid(message.clone()),
            Self::NotFound { what } => Self::not_found(what.clone()),
            Self::AlreadyFinalized { id } => Self::already_finalized(id.clone()),
            Self::CorruptFile { id, reason } => Self::corrupt(id.clone(), reason.clone()),
            Self::StorageUnavailable { source } => {
                Self::unavailable(std::io::Error::other(source.to_string()))
            }
            Self::AbortedByCaller { id, reason } => Self::aborted(id.clone(), reason.clone()),
        }
    }

    /// Whether this error means nothing matched the request
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Wrap into an I/O error for delivery on a byte stream's error channel.
    ///
    /// The original error stays reachable through `get_ref()` / `into_inner()`.
    pub fn into_io(self) -> std::io::Error {
        let kind = match &self {
            Self::NotFound { .. } => std::io::ErrorKind::NotFound,
            Self::InvalidArgument { .. } => std::io::ErrorKind::InvalidInput,
            Self::CorruptFile { .. } => std::io::ErrorKind::InvalidData,
            Self::AbortedByCaller { .. } => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, self)
    }

    /// Recover a `GridError` carried by an I/O error, or wrap a foreign one
    pub fn from_io(error: std::io::Error) -> Self {
        match error.downcast::<GridError>() {
            Ok(grid) => grid,
            Err(error) => Self::unavailable(error),
        }
    }
}
