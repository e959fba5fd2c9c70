//! Snapshot persistence for the in-memory native store

use crate::core::{DbError, Result};
use crate::storage::engine::RowStore;
use crate::storage::memory::InMemoryStore;
use crate::storage::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, event};

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub schema_version: u64,
    pub tables: BTreeMap<String, Table>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: i64,
    pub row_count: usize,
    pub table_count: usize,
}

impl StoreSnapshot {
    pub fn capture(store: &InMemoryStore) -> Self {
        let tables = store.tables().clone();
        let row_count = tables.values().map(|t| t.row_count()).sum();
        let table_count = tables.len();

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            schema_version: store.schema_version(),
            tables,
            metadata: SnapshotMetadata {
                created_at: chrono::Utc::now().timestamp_millis(),
                row_count,
                table_count,
            },
        }
    }

    pub fn into_store(self) -> InMemoryStore {
        InMemoryStore::from_tables(self.tables, self.schema_version)
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Writes to a temp file first, then renames over the previous snapshot.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| DbError::IoError(format!("Failed to create snapshot directory: {}", e)))?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file =
            File::create(&temp_path).map_err(|e| DbError::IoError(format!("Failed to create temp file: {}", e)))?;
        let mut writer = BufWriter::new(temp_file);
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| DbError::IoError(format!("Failed to serialize snapshot: {}", e)))?;
        writer
            .write_all(&serialized)
            .map_err(|e| DbError::IoError(format!("Failed to write snapshot: {}", e)))?;
        writer
            .flush()
            .map_err(|e| DbError::IoError(format!("Failed to flush snapshot: {}", e)))?;
        writer
            .get_mut()
            .sync_all()
            .map_err(|e| DbError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        fs::rename(&temp_path, &self.snapshot_path)
            .map_err(|e| DbError::IoError(format!("Failed to rename snapshot: {}", e)))?;

        event!(
            Level::DEBUG,
            path = %self.snapshot_path.display(),
            tables = snapshot.metadata.table_count,
            rows = snapshot.metadata.row_count,
            "saved snapshot"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&self.snapshot_path).map_err(|e| DbError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| DbError::IoError(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| DbError::IoError(format!("Failed to deserialize snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(DbError::IoError(format!(
                "Unsupported snapshot format version {}",
                snapshot.version
            )));
        }

        event!(
            Level::DEBUG,
            path = %self.snapshot_path.display(),
            tables = snapshot.metadata.table_count,
            schema_version = snapshot.schema_version,
            "loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    pub fn delete(&self) -> Result<()> {
        if self.snapshot_path.exists() {
            fs::remove_file(&self.snapshot_path)
                .map_err(|e| DbError::IoError(format!("Failed to delete snapshot: {}", e)))?;
        }
        Ok(())
    }
}
