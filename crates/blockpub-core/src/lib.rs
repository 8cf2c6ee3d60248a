//! Blockpub Core: error kinds and publisher configuration.

pub mod config;
pub mod error;

pub use config::{CatalogConfig, PublisherConfig};
pub use error::{Error, ErrorKind, Result};
