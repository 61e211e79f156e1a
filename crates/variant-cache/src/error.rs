//! Error types for the variant cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    /// Blob write or delete failure
    Io(Box<std::io::Error>),
    /// A journal uniqueness invariant was violated
    Corruption(String),
    /// Invalid configuration, rejected at construction
    Config(String),
    /// Relational journal backend failure
    Database(Box<sqlx::Error>),
    /// Object-store journal encode/decode failure
    Serialization(String),
    /// The external codec refused the pixel data
    Encode(String),
    /// The background worker pool is gone
    WorkerStopped,
}

impl CacheError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::Corruption(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Corruption(msg) => write!(f, "Journal corruption: {}", msg),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CacheError::Database(err) => write!(f, "Database error: {}", err),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::Encode(msg) => write!(f, "Encode error: {}", msg),
            CacheError::WorkerStopped => write!(f, "Worker pool stopped"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Database(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_corruption_error_display() {
        let err = CacheError::Corruption("2 rows for identity 42".to_string());
        assert_eq!(
            format!("{}", err),
            "Journal corruption: 2 rows for identity 42"
        );
        assert!(err.is_corruption());
    }

    #[test]
    fn test_config_error_display() {
        let err = CacheError::Config("capacity must be positive".to_string());
        assert_eq!(
            format!("{}", err),
            "Configuration error: capacity must be positive"
        );
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_io_error_has_source() {
        let err: CacheError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into();
        assert!(format!("{}", err).contains("read-only"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_serde_error_converts() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CacheError = parse.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
