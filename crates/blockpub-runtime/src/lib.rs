//! Publication runtime: one cycle drains pending files into the
//! catalog, then closes blocks that stayed open too long.

pub mod cycle;
pub mod sweeper;
pub mod types;
pub mod uploader;

pub use cycle::PublishCycle;
pub use sweeper::BlockSweeper;
pub use types::*;
pub use uploader::Uploader;
