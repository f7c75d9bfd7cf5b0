use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, params};
use sha2::{Digest, Sha256};

use crate::error::DriftError;
use crate::model::{FeatureRecord, Snapshot, SnapshotLabel};
use crate::util::now_utc_string;

pub const CACHE_DB_FILENAME: &str = "feature_cache.sqlite";

/// Keyed snapshot storage shared by the analysis and drift stages.
///
/// `get` returns an empty snapshot when nothing was stored under the label.
/// `put` replaces the label's content as a whole.
pub trait CacheStore {
    fn get(&self, dataset_id: &str, label: SnapshotLabel) -> Result<Snapshot, DriftError>;

    fn put(
        &mut self,
        dataset_id: &str,
        label: SnapshotLabel,
        snapshot: &Snapshot,
    ) -> Result<(), DriftError>;
}

/// Stable cache identity for a dataset root. Trailing separators and `.`
/// segments are normalized away; the path is not canonicalized.
pub fn dataset_id(root: &Path) -> String {
    let normalized = root.components().collect::<PathBuf>();
    let mut hasher = Sha256::new();
    hasher.update(normalized.display().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct SqliteCacheStore {
    connection: Connection,
}

impl SqliteCacheStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(parent) = db_path.parent() {
            crate::util::ensure_directory(parent)?;
        }

        let connection = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open feature cache: {}", db_path.display()))?;

        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to set journal_mode=WAL for feature cache")?;
        connection
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous=NORMAL for feature cache")?;

        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let connection = Connection::open_in_memory()?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }
}

fn ensure_schema(connection: &Connection) -> anyhow::Result<()> {
    use anyhow::Context;

    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshot_entries (
              dataset_id TEXT NOT NULL,
              label TEXT NOT NULL,
              file_key TEXT NOT NULL,
              record_json TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              PRIMARY KEY (dataset_id, label, file_key)
            );
            ",
        )
        .context("failed to create feature cache schema")
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, dataset_id: &str, label: SnapshotLabel) -> Result<Snapshot, DriftError> {
        let read_err = |err: rusqlite::Error| DriftError::cache_read(label.as_str(), err);

        let mut statement = self
            .connection
            .prepare(
                "
                SELECT file_key, record_json
                FROM snapshot_entries
                WHERE dataset_id = ?1 AND label = ?2
                ORDER BY file_key ASC
                ",
            )
            .map_err(read_err)?;

        let mut rows = statement
            .query(params![dataset_id, label.as_str()])
            .map_err(read_err)?;
        let mut snapshot = Snapshot::new();

        while let Some(row) = rows.next().map_err(read_err)? {
            let file_key: String = row.get(0).map_err(read_err)?;
            let raw: String = row.get(1).map_err(read_err)?;
            let record: FeatureRecord = serde_json::from_str(&raw).map_err(|err| {
                DriftError::cache_read(label.as_str(), format!("record {file_key}: {err}"))
            })?;
            snapshot.insert(file_key, record);
        }

        Ok(snapshot)
    }

    fn put(
        &mut self,
        dataset_id: &str,
        label: SnapshotLabel,
        snapshot: &Snapshot,
    ) -> Result<(), DriftError> {
        let write_err = |err: rusqlite::Error| DriftError::cache_write(label.as_str(), err);
        let updated_at = now_utc_string();

        let transaction = self.connection.transaction().map_err(write_err)?;
        transaction
            .execute(
                "DELETE FROM snapshot_entries WHERE dataset_id = ?1 AND label = ?2",
                params![dataset_id, label.as_str()],
            )
            .map_err(write_err)?;

        {
            let mut insert = transaction
                .prepare(
                    "
                    INSERT INTO snapshot_entries(dataset_id, label, file_key, record_json, updated_at)
                    VALUES(?1, ?2, ?3, ?4, ?5)
                    ",
                )
                .map_err(write_err)?;

            for (file_key, record) in snapshot {
                let record_json = serde_json::to_string(record).map_err(|err| {
                    DriftError::cache_write(label.as_str(), format!("record {file_key}: {err}"))
                })?;
                insert
                    .execute(params![
                        dataset_id,
                        label.as_str(),
                        file_key,
                        record_json,
                        updated_at
                    ])
                    .map_err(write_err)?;
            }
        }

        transaction.commit().map_err(write_err)
    }
}

#[cfg(test)]
pub use memory::MemoryCacheStore;


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(entries: &[(&str, f64)]) -> Snapshot {
        entries
            .iter()
            .map(|(key, size)| {
                (
                    key.to_string(),
                    FeatureRecord::from_iter([("size", json!(size))]),
                )
            })
            .collect()
    }

    #[test]
    fn missing_label_reads_as_empty_snapshot() {
        let store = SqliteCacheStore::open_in_memory().unwrap();
        let loaded = store.get("ds", SnapshotLabel::Attributes).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn put_replaces_previous_content() {
        let mut store = SqliteCacheStore::open_in_memory().unwrap();
        store
            .put("ds", SnapshotLabel::Attributes, &snapshot(&[("a.jpg", 1.0), ("b.jpg", 2.0)]))
            .unwrap();
        store
            .put("ds", SnapshotLabel::Attributes, &snapshot(&[("c.jpg", 3.0)]))
            .unwrap();

        let loaded = store.get("ds", SnapshotLabel::Attributes).unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["c.jpg"]);
        assert_eq!(loaded["c.jpg"].scalar("size"), Some(3.0));
    }

    #[test]
    fn labels_and_datasets_are_isolated() {
        let mut store = SqliteCacheStore::open_in_memory().unwrap();
        store
            .put("ds", SnapshotLabel::Attributes, &snapshot(&[("a.jpg", 1.0)]))
            .unwrap();

        assert!(store.get("ds", SnapshotLabel::AttributesBaseline).unwrap().is_empty());
        assert!(store.get("other", SnapshotLabel::Attributes).unwrap().is_empty());
    }

    #[test]
    fn snapshots_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache").join(CACHE_DB_FILENAME);
        let stored = snapshot(&[("a.jpg", 1.0), ("b.jpg", 2.5)]);

        {
            let mut store = SqliteCacheStore::open(&db_path).unwrap();
            store.put("ds", SnapshotLabel::Embeddings, &stored).unwrap();
        }

        let store = SqliteCacheStore::open(&db_path).unwrap();
        assert_eq!(store.get("ds", SnapshotLabel::Embeddings).unwrap(), stored);
    }

    #[test]
    fn dataset_id_is_stable_hex() {
        let first = dataset_id(Path::new("datasets/main"));
        assert_eq!(first, dataset_id(Path::new("datasets/main")));
        assert_ne!(first, dataset_id(Path::new("datasets/other")));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn dataset_id_ignores_trailing_separator() {
        let plain = dataset_id(Path::new("datasets/main"));
        assert_eq!(plain, dataset_id(Path::new("datasets/main/")));
        assert_eq!(plain, dataset_id(Path::new("datasets/./main")));
    }
}
