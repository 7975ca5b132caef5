use backtrace::Backtrace;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Error kinds for docstore operations.
///
/// Each kind names one failure category so callers can branch on it without
/// parsing messages.
///
/// # Examples
///
/// ```rust,ignore
/// use docstore::errors::{DocStoreError, ErrorKind, DocStoreResult};
///
/// fn example() -> DocStoreResult<()> {
///     Err(DocStoreError::new("name is required", ErrorKind::ValidationError))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// A document violated the collection schema.
    ValidationError,
    /// Criteria used an unknown operator or a malformed operator argument.
    PredicateError,
    /// The underlying SQLite engine rejected a statement.
    StorageError,
    /// A result set was too large to materialize without pagination.
    CapacityError,
    /// A before-hook cancelled the operation.
    OperationCancelled,
    /// Error serializing or deserializing a document.
    EncodingError,
    /// Weak or missing encryption key, or cipher failure on write.
    SecurityError,
    /// The document id is missing or has the wrong shape.
    InvalidId,
    /// The operation is not valid in the current context.
    InvalidOperation,
    /// The requested resource was not found.
    NotFound,
    /// IO failure outside the storage engine.
    IOError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::PredicateError => write!(f, "Predicate error"),
            ErrorKind::StorageError => write!(f, "Storage error"),
            ErrorKind::CapacityError => write!(f, "Capacity error"),
            ErrorKind::OperationCancelled => write!(f, "Operation cancelled"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::SecurityError => write!(f, "Security error"),
            ErrorKind::InvalidId => write!(f, "Invalid ID"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom docstore error type.
///
/// `DocStoreError` carries a message, a kind and an optional cause. The
/// backtrace is captured unresolved and only symbolized when the error is
/// printed with `{:?}`.
#[derive(Clone)]
pub struct DocStoreError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<DocStoreError>>,
    backtrace: Arc<Mutex<Backtrace>>,
}

impl DocStoreError {
    /// Creates a new `DocStoreError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        DocStoreError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    /// Creates a new `DocStoreError` chained to the error that caused it.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: DocStoreError) -> Self {
        DocStoreError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&DocStoreError> {
        self.cause.as_deref()
    }
}

impl Display for DocStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for DocStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = self.backtrace.lock();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, backtrace)
            }
        }
    }
}

impl Error for DocStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for docstore operations.
pub type DocStoreResult<T> = Result<T, DocStoreError>;

impl From<rusqlite::Error> for DocStoreError {
    fn from(err: rusqlite::Error) -> Self {
        DocStoreError::new(&format!("SQLite error: {}", err), ErrorKind::StorageError)
    }
}

impl From<serde_json::Error> for DocStoreError {
    fn from(err: serde_json::Error) -> Self {
        DocStoreError::new(&format!("JSON error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<regex::Error> for DocStoreError {
    fn from(err: regex::Error) -> Self {
        DocStoreError::new(&format!("Invalid pattern: {}", err), ErrorKind::PredicateError)
    }
}

impl From<std::io::Error> for DocStoreError {
    fn from(err: std::io::Error) -> Self {
        DocStoreError::new(&format!("IO error: {}", err), ErrorKind::IOError)
    }
}

impl From<std::string::FromUtf8Error> for DocStoreError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DocStoreError::new(
            &format!("UTF-8 encoding error: {}", err),
            ErrorKind::EncodingError,
        )
    }
}

impl From<String> for DocStoreError {
    fn from(msg: String) -> Self {
        DocStoreError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for DocStoreError {
    fn from(msg: &str) -> Self {
        DocStoreError::new(msg, ErrorKind::InternalError)
    }
}
