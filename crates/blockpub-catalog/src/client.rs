//! Catalog client trait and wire types.

use serde::{Deserialize, Serialize};

use blockpub_core::Result;
use blockpub_store::{Algorithm, BufferFile, Dataset, Pairing};

pub use futures::future::BoxFuture;

/// Everything the catalog needs to register one DAS group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub algorithm: Algorithm,
    pub dataset: Dataset,
    pub pairing: Pairing,
    pub files: Vec<BufferFile>,
}

/// A block touched by a publish call, with the input files placed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedBlock {
    pub name: String,
    pub locations: Vec<String>,
    pub is_open: bool,
    pub created_at: i64,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// The algorithm was newly registered by this call.
    #[serde(default)]
    pub algorithm_registered: bool,
    /// The dataset/algorithm pairing was newly registered by this call.
    #[serde(default)]
    pub pairing_registered: bool,
    #[serde(default)]
    pub blocks: Vec<PublishedBlock>,
}

/// A block the catalog confirmed closed and migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedBlock {
    pub name: String,
    pub created_at: i64,
}

/// Remote catalog operations.
///
/// Both calls must tolerate being repeated for entities the catalog
/// already holds; the caller re-issues them after any local rollback.
pub trait CatalogClient: Send + Sync {
    /// Register algorithm, dataset and pairing as needed, then commit
    /// the files and report the blocks they landed in.
    fn publish(&self, request: PublishRequest) -> BoxFuture<'_, Result<PublishOutcome>>;

    /// Close the named blocks and migrate them to the global scope.
    /// Returns only the blocks that closed; the rest stay open.
    fn close_and_migrate(&self, block_names: Vec<String>) -> BoxFuture<'_, Result<Vec<ClosedBlock>>>;
}
