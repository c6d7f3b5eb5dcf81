use std::{io, path::PathBuf};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use url::ParseError as UrlParseError;

#[cfg(feature = "cache")]
use sqlx::{migrate::MigrateError, Error as SqlxError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum NotedirError {
    #[error("Cache/Database error: {0}")]
    Cache(String),
    /// An accessor could not interpret the bytes of a document.
    #[error("Could not parse {path:?}: {message}")]
    Parse {
        message: String,
        path: PathBuf,
        cause: Option<String>,
    },
    /// An accessor could not perform an edit it otherwise supports.
    #[error("Could not change {path:?}: {message}")]
    Change { message: String, path: PathBuf },
    #[error("Unsupported change: {0}")]
    UnsupportedChange(String),
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl NotedirError {
    pub fn parse<P: Into<PathBuf>, M: Into<String>>(
        path: P,
        message: M,
        cause: Option<String>,
    ) -> NotedirError {
        NotedirError::Parse {
            message: message.into(),
            path: path.into(),
            cause,
        }
    }

    pub fn change<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> NotedirError {
        NotedirError::Change {
            message: message.into(),
            path: path.into(),
        }
    }

    /// True for the error kinds raised by accessors while reading a document.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, NotedirError::Parse { .. })
    }
}

impl From<toml::de::Error> for NotedirError {
    fn from(src: toml::de::Error) -> NotedirError {
        NotedirError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for NotedirError {
    fn from(src: toml::ser::Error) -> NotedirError {
        NotedirError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<serde_yaml::Error> for NotedirError {
    fn from(src: serde_yaml::Error) -> NotedirError {
        NotedirError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<JsonError> for NotedirError {
    fn from(src: JsonError) -> NotedirError {
        NotedirError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<chrono::ParseError> for NotedirError {
    fn from(src: chrono::ParseError) -> NotedirError {
        NotedirError::Serialization(format!("Invalid timestamp: {src}"))
    }
}

impl From<UrlParseError> for NotedirError {
    fn from(src: UrlParseError) -> NotedirError {
        NotedirError::Serialization(format!("Invalid URL: {src}"))
    }
}

impl From<io::Error> for NotedirError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => NotedirError::NotFound(format!("{x}")),
            _ => NotedirError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<walkdir::Error> for NotedirError {
    fn from(x: walkdir::Error) -> Self {
        match x.into_io_error() {
            Some(io_error) => NotedirError::from(io_error),
            None => NotedirError::Io("directory walk hit a symlink loop".to_string()),
        }
    }
}

impl From<RegexError> for NotedirError {
    fn from(x: RegexError) -> Self {
        NotedirError::Serialization(format!("Regex parse failed: {x}"))
    }
}

#[cfg(feature = "cache")]
impl From<SqlxError> for NotedirError {
    fn from(db_error: SqlxError) -> Self {
        NotedirError::Cache(format!("database error: {db_error:?}"))
    }
}

#[cfg(feature = "cache")]
impl From<MigrateError> for NotedirError {
    fn from(db_error: MigrateError) -> Self {
        NotedirError::Cache(format!("migration error: {db_error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_io_error_kinds() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(NotedirError::from(missing), NotedirError::NotFound(_)));
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        match NotedirError::from(denied) {
            NotedirError::Io(message) => assert!(message.contains("nope"), "{message}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
