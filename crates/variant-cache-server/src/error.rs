//! Error types for the variant cache server

use std::fmt;

#[derive(Debug)]
pub enum ServerError {
    Cache(variant_cache::CacheError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Cache(err) => write!(f, "Cache error: {}", err),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Cache(err) => Some(err),
            ServerError::Io(err) => Some(err.as_ref()),
            ServerError::Config(_) => None,
        }
    }
}

impl From<variant_cache::CacheError> for ServerError {
    fn from(err: variant_cache::CacheError) -> Self {
        ServerError::Cache(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_cache_error_display() {
        let err = ServerError::from(variant_cache::CacheError::Corruption(
            "row 7 missing".to_string(),
        ));
        assert_eq!(
            format!("{}", err),
            "Cache error: Journal corruption: row 7 missing"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = ServerError::Config("invalid PORT".to_string());
        assert_eq!(format!("{}", err), "Configuration error: invalid PORT");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_serve_io_error_stays_io() {
        let served: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            "port taken",
        ));
        let err = served.map_err(ServerError::from).unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
        assert_eq!(format!("{}", err), "IO error: port taken");
    }
}
