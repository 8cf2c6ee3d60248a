//! Blockpub Store: SQLite entity store for algorithms, datasets,
//! pairings, files and blocks, plus the buffer operations the publisher
//! runs against it.

pub mod schema;
pub mod sqlite;
pub mod status;
pub mod tx;
pub mod types;

pub use sqlite::BufferStore;
pub use tx::StoreTx;
pub use types::*;
