//! Read-only counters used by the drain-readiness monitor.

use rusqlite::{params, Connection};

use crate::sqlite::{db_err, BufferStore};
use crate::types::{FileStatus, StatusSnapshot};
use blockpub_core::Result;

impl BufferStore {
    pub fn count_open_blocks(&self) -> Result<i64> {
        self.read(open_blocks)
    }

    pub fn count_files_by_status(&self, status: FileStatus) -> Result<i64> {
        self.read(|conn| files_by_status(conn, status))
    }

    /// Blocks the placement system has not picked up yet.
    pub fn count_not_yet_published_downstream(&self) -> Result<i64> {
        self.read(not_published_downstream)
    }

    /// True when no file is pending and no block is open.
    pub fn is_fully_drained(&self) -> Result<bool> {
        self.read(|conn| Ok(files_by_status(conn, FileStatus::Pending)? == 0 && open_blocks(conn)? == 0))
    }

    /// All counters, read under one lock so they agree with each other.
    pub fn status_snapshot(&self) -> Result<StatusSnapshot> {
        self.read(|conn| {
            let open = open_blocks(conn)?;
            let pending = files_by_status(conn, FileStatus::Pending)?;
            Ok(StatusSnapshot {
                open_blocks: open,
                pending_files: pending,
                in_catalog_files: files_by_status(conn, FileStatus::InCatalog)?,
                not_published_downstream: not_published_downstream(conn)?,
                drained: open == 0 && pending == 0,
            })
        })
    }
}

fn open_blocks(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM blocks WHERE is_open = 1", [], |row| row.get(0))
        .map_err(db_err)
}

fn files_by_status(conn: &Connection, status: FileStatus) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM files WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )
    .map_err(db_err)
}

fn not_published_downstream(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM blocks WHERE published_downstream = 0",
        [],
        |row| row.get(0),
    )
    .map_err(db_err)
}
