//! Optional read-only protected disk tier (spec §4.3).
//!
//! Consulted on a miss in the mutable tier; never written to by the SDK.
//! Pre-seeded offline (e.g. shipped alongside an application bundle).

use catalog_core::{ApiError, ErrorKind};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

fn io_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::new(ErrorKind::Unknown, -1, format!("protected cache I/O error: {err}"))
}

/// Read-only on-disk tier.
pub struct ProtectedCache {
    db: Arc<Database>,
}

impl ProtectedCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let db = Database::open(path).map_err(io_error)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let data = match txn.open_table(DATA_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(io_error(err)),
        };
        Ok(data.get(key).map_err(io_error)?.map(|g| g.value().to_vec()))
    }

    pub fn contains(&self, key: &str) -> Result<bool, ApiError> {
        Ok(self.get(key)?.is_some())
    }

    /// `Σ len(key) + len(value)` over every pre-seeded entry; the
    /// protected tier has no expiry table, so there is no per-key
    /// overhead to add beyond the key and value bytes themselves.
    pub fn size(&self) -> Result<u64, ApiError> {
        let txn = self.db.begin_read().map_err(io_error)?;
        let data = match txn.open_table(DATA_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(err) => return Err(io_error(err)),
        };
        let mut total = 0u64;
        for entry in data.iter().map_err(io_error)? {
            let (k, v) = entry.map_err(io_error)?;
            total += k.value().len() as u64 + v.value().len() as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database as RwDatabase;
    use tempfile::tempdir;

    #[test]
    fn reads_pre_seeded_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protected.redb");
        {
            let db = RwDatabase::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut table = txn.open_table(DATA_TABLE).unwrap();
                table.insert("seed", b"payload".as_slice()).unwrap();
            }
            txn.commit().unwrap();
        }
        let cache = ProtectedCache::open(&path).unwrap();
        assert_eq!(cache.get("seed").unwrap(), Some(b"payload".to_vec()));
        assert!(!cache.contains("missing").unwrap());
    }
}
