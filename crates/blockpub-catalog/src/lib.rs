//! Blockpub Catalog: client side of the remote dataset catalog.
//!
//! The `CatalogClient` trait abstracts the two remote operations the
//! publisher needs. Implementations:
//! - `HttpCatalogClient`: JSON over HTTP against a catalog endpoint
//! - `MemoryCatalog`: in-process catalog for tests and dry runs

pub mod client;
pub mod http;
pub mod memory;

pub use client::{
    BoxFuture, CatalogClient, ClosedBlock, PublishOutcome, PublishRequest, PublishedBlock,
};
pub use http::HttpCatalogClient;
pub use memory::MemoryCatalog;
