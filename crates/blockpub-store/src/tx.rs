//! Explicit write scope over one SQLite transaction.
//!
//! Every buffer mutation is a method on [`StoreTx`]; nothing writes
//! outside a scope obtained from [`crate::BufferStore::write`].

use rusqlite::{params, OptionalExtension, Transaction};
use tracing::debug;

use crate::sqlite::{db_err, now_secs};
use crate::types::*;
use blockpub_core::{Error, Result};

pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> StoreTx<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self { tx }
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit().map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Publication writes
    // ---------------------------------------------------------------

    /// Upsert a block by name. Returns the block id.
    ///
    /// `created_at` is kept from the first write, `is_open` can only go
    /// false, `is_published_downstream` can only go true, and locations
    /// accumulate.
    pub fn persist_block(&self, block: &Block) -> Result<i64> {
        self.tx
            .prepare_cached(
                "INSERT INTO blocks (name, is_open, published_downstream, created_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(name) DO UPDATE SET \
                 is_open = MIN(blocks.is_open, excluded.is_open), \
                 published_downstream = MAX(blocks.published_downstream, excluded.published_downstream)",
            )
            .map_err(db_err)?
            .execute(params![
                block.name,
                block.is_open,
                block.is_published_downstream,
                block.created_at
            ])
            .map_err(db_err)?;

        let block_id = self.block_id(&block.name)?;
        for se_name in &block.locations {
            let location_id = self.ensure_location(se_name)?;
            self.tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO block_locations (block_id, location_id) VALUES (?1, ?2)",
                )
                .map_err(db_err)?
                .execute(params![block_id, location_id])
                .map_err(db_err)?;
        }
        debug!(
            "Persisted block {} (open={}, locations={})",
            block.name,
            block.is_open,
            block.locations.len()
        );
        Ok(block_id)
    }

    /// Record block membership. Re-attaching is a no-op; a file already
    /// in another block is left where it is.
    pub fn attach_files_to_block(&self, block_name: &str, logical_names: &[String]) -> Result<usize> {
        let block_id = self.block_id(block_name)?;
        let mut stmt = self
            .tx
            .prepare_cached(
                "UPDATE files SET block_id = ?1 \
                 WHERE lfn = ?2 AND (block_id IS NULL OR block_id = ?1)",
            )
            .map_err(db_err)?;
        let mut attached = 0;
        for lfn in logical_names {
            attached += stmt.execute(params![block_id, lfn]).map_err(db_err)?;
        }
        Ok(attached)
    }

    /// Move files Pending → InCatalog. Returns how many actually moved.
    pub fn mark_files_in_catalog(&self, logical_names: &[String]) -> Result<usize> {
        let now = now_secs();
        let mut stmt = self
            .tx
            .prepare_cached(
                "UPDATE files SET status = 'in_catalog', last_modified = ?1 \
                 WHERE lfn = ?2 AND status = 'pending'",
            )
            .map_err(db_err)?;
        let mut moved = 0;
        for lfn in logical_names {
            moved += stmt.execute(params![now, lfn]).map_err(db_err)?;
        }
        Ok(moved)
    }

    pub fn mark_algorithm_registered(&self, algorithm_id: i64) -> Result<bool> {
        let count = self
            .tx
            .execute(
                "UPDATE algorithms SET in_catalog = 1 WHERE id = ?1 AND in_catalog = 0",
                params![algorithm_id],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Flag the pairing, and its dataset, as registered.
    pub fn mark_dataset_pairing_registered(&self, das_id: i64) -> Result<bool> {
        let count = self
            .tx
            .execute(
                "UPDATE dataset_algorithms SET in_catalog = 1 WHERE id = ?1 AND in_catalog = 0",
                params![das_id],
            )
            .map_err(db_err)?;
        self.tx
            .execute(
                "UPDATE datasets SET pairing_in_catalog = 1 \
                 WHERE id = (SELECT dataset_id FROM dataset_algorithms WHERE id = ?1)",
                params![das_id],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Record that the placement system has injected the block downstream.
    pub fn mark_block_published_downstream(&self, block_name: &str) -> Result<bool> {
        let count = self
            .tx
            .execute(
                "UPDATE blocks SET published_downstream = 1 WHERE name = ?1 AND published_downstream = 0",
                params![block_name],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    // ---------------------------------------------------------------
    // Append path
    // ---------------------------------------------------------------

    pub fn insert_algorithm(&self, algo: &NewAlgorithm) -> Result<i64> {
        self.tx
            .prepare_cached(
                "INSERT OR IGNORE INTO algorithms \
                 (app_name, app_family, app_version, pset_hash, pset_content) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_err)?
            .execute(params![
                algo.application_name,
                algo.application_family,
                algo.application_version,
                algo.param_set_hash,
                algo.param_set_content
            ])
            .map_err(db_err)?;
        self.tx
            .prepare_cached(
                "SELECT id FROM algorithms \
                 WHERE app_name = ?1 AND app_version = ?2 AND app_family = ?3 AND pset_hash = ?4",
            )
            .map_err(db_err)?
            .query_row(
                params![
                    algo.application_name,
                    algo.application_version,
                    algo.application_family,
                    algo.param_set_hash
                ],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    pub fn insert_dataset(&self, dataset: &NewDataset) -> Result<i64> {
        self.tx
            .prepare_cached(
                "INSERT OR IGNORE INTO datasets (path, primary_dataset, processed_dataset, data_tier) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err)?
            .execute(params![
                dataset.path,
                dataset.primary_dataset,
                dataset.processed_dataset,
                dataset.data_tier
            ])
            .map_err(db_err)?;
        self.tx
            .prepare_cached("SELECT id FROM datasets WHERE path = ?1")
            .map_err(db_err)?
            .query_row(params![dataset.path], |row| row.get(0))
            .map_err(db_err)
    }

    pub fn insert_pairing(&self, algorithm_id: i64, dataset_id: i64) -> Result<i64> {
        self.tx
            .execute(
                "INSERT OR IGNORE INTO dataset_algorithms (algorithm_id, dataset_id) VALUES (?1, ?2)",
                params![algorithm_id, dataset_id],
            )
            .map_err(db_err)?;
        self.tx
            .execute(
                "UPDATE datasets SET algorithm_id = ?1 WHERE id = ?2 AND algorithm_id IS NULL",
                params![algorithm_id, dataset_id],
            )
            .map_err(db_err)?;
        self.tx
            .query_row(
                "SELECT id FROM dataset_algorithms WHERE algorithm_id = ?1 AND dataset_id = ?2",
                params![algorithm_id, dataset_id],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    pub fn insert_pending_file(&self, file: &NewFile) -> Result<i64> {
        let file_id = self
            .tx
            .prepare_cached(
                "INSERT INTO files (lfn, size_bytes, event_count, checksum, das_id, status, last_modified) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
            )
            .map_err(db_err)?
            .insert(params![
                file.logical_name,
                file.size_bytes,
                file.event_count,
                file.checksum,
                file.das_id,
                now_secs()
            ])
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    Error::Persistence(format!("duplicate logical name {}", file.logical_name))
                } else {
                    db_err(e)
                }
            })?;

        let mut stmt = self
            .tx
            .prepare_cached("INSERT OR IGNORE INTO file_parents (child_id, parent_lfn) VALUES (?1, ?2)")
            .map_err(db_err)?;
        for parent in &file.parents {
            stmt.execute(params![file_id, parent]).map_err(db_err)?;
        }

        let mut stmt = self
            .tx
            .prepare_cached("INSERT INTO file_runlumis (file_id, run, lumi) VALUES (?1, ?2, ?3)")
            .map_err(db_err)?;
        for rl in &file.run_lumis {
            stmt.execute(params![file_id, rl.run, rl.lumi]).map_err(db_err)?;
        }

        for se_name in &file.locations {
            let location_id = self.ensure_location(se_name)?;
            self.tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO file_locations (file_id, location_id) VALUES (?1, ?2)",
                )
                .map_err(db_err)?
                .execute(params![file_id, location_id])
                .map_err(db_err)?;
        }
        Ok(file_id)
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn ensure_location(&self, se_name: &str) -> Result<i64> {
        self.tx
            .prepare_cached("INSERT OR IGNORE INTO locations (se_name) VALUES (?1)")
            .map_err(db_err)?
            .execute(params![se_name])
            .map_err(db_err)?;
        self.tx
            .prepare_cached("SELECT id FROM locations WHERE se_name = ?1")
            .map_err(db_err)?
            .query_row(params![se_name], |row| row.get(0))
            .map_err(db_err)
    }

    fn block_id(&self, name: &str) -> Result<i64> {
        self.tx
            .prepare_cached("SELECT id FROM blocks WHERE name = ?1")
            .map_err(db_err)?
            .query_row(params![name], |row| row.get(0))
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("block {}", name)))
    }
}
