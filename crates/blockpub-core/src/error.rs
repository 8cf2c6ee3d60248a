//! Error types for the block publisher.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// `publish` / `close_and_migrate` failed or timed out.
    #[error("Catalog registration error: {0}")]
    CatalogRegistration(String),

    /// The local entity store failed mid-transaction.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data integrity warning: {0}")]
    DataIntegrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Coarse classification used in cycle summaries.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CatalogRegistration(_) => ErrorKind::CatalogRegistration,
            Self::Persistence(_) | Self::NotFound(_) | Self::Io(_) => ErrorKind::Persistence,
            Self::Config(_) => ErrorKind::Configuration,
            Self::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Self::Json(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error kind reported per DAS group / sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CatalogRegistration,
    Persistence,
    Configuration,
    DataIntegrity,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CatalogRegistration => write!(f, "catalog_registration"),
            Self::Persistence => write!(f, "persistence"),
            Self::Configuration => write!(f, "configuration"),
            Self::DataIntegrity => write!(f, "data_integrity"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::CatalogRegistration("timeout".into()).kind(),
            ErrorKind::CatalogRegistration
        );
        assert_eq!(Error::Persistence("disk".into()).kind(), ErrorKind::Persistence);
        assert_eq!(Error::Config("bad".into()).kind(), ErrorKind::Configuration);
        assert_eq!(ErrorKind::DataIntegrity.to_string(), "data_integrity");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CatalogRegistration).unwrap();
        assert_eq!(json, "\"catalog_registration\"");
    }
}
