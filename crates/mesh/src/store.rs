//! Durable entry store.
//!
//! One row per `(origin_domain, entry_type)`, enforced by a UNIQUE
//! constraint. All access goes through a single connection mutex, which also
//! makes the reconciler's lookup-then-write atomic.

use crate::error::{MeshError, MeshResult};
use crate::message::{Entry, Payload};
use crate::reconcile::{reconcile, EntryTable, Outcome};
use mapmesh_core::DomainId;
use mapmesh_crypto::SignedEnvelope;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An entry together with the origin-signed envelope it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: Entry,
    /// Origin-signed envelope whose blob decodes to `entry`
    pub signed: SignedEnvelope,
}

impl StoredEntry {
    /// Decode `signed` and pair it with the contained entry.
    pub fn from_envelope(signed: SignedEnvelope) -> MeshResult<Self> {
        let entry = Payload::open(&signed)?.into_entry()?;
        Ok(Self { entry, signed })
    }
}

/// `*`, `%` and the empty string match any value.
pub fn is_wildcard(pattern: &str) -> bool {
    matches!(pattern, "" | "*" | "%")
}

fn pattern_param(pattern: &str) -> Option<&str> {
    (!is_wildcard(pattern)).then_some(pattern)
}

pub(crate) fn open_connection<P: AsRef<Path>>(path: P) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> MeshResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| MeshError::Internal("store connection lock poisoned".to_string()))
}

fn encode_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn decode_err<E: std::error::Error + Send + Sync + 'static>(column: usize, e: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Blob, Box::new(e))
}

/// SQLite-backed entry table.
#[derive(Debug)]
pub struct EntryStore {
    conn: Mutex<Connection>,
}

impl EntryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        Self::init(open_connection(path)?)
    }

    pub fn open_in_memory() -> MeshResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> MeshResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                blob BLOB NOT NULL,
                commit_id TEXT NOT NULL,
                origin_domain TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                entry_type TEXT NOT NULL,
                signed_blob BLOB NOT NULL,
                UNIQUE (origin_domain, entry_type)
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Reconcile `candidate` against the held row for its key.
    pub fn upsert(&self, candidate: &StoredEntry) -> MeshResult<Outcome> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let outcome = reconcile(&mut SqliteEntries { conn: &tx }, candidate)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn lookup(&self, origin: DomainId, entry_type: &str) -> MeshResult<Option<StoredEntry>> {
        let conn = lock(&self.conn)?;
        let row = conn
            .query_row(
                "SELECT signed_blob FROM entries WHERE origin_domain = ?1 AND entry_type = ?2",
                params![origin.to_string(), entry_type],
                read_entry,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_all(&self) -> MeshResult<Vec<StoredEntry>> {
        self.get_by_filter("*", "*")
    }

    /// Entries matching both patterns, in unspecified order.
    ///
    /// Rows whose stored envelope no longer decodes are logged and skipped.
    pub fn get_by_filter(
        &self,
        entry_type_pattern: &str,
        origin_pattern: &str,
    ) -> MeshResult<Vec<StoredEntry>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, signed_blob FROM entries
             WHERE (?1 IS NULL OR entry_type = ?1) AND (?2 IS NULL OR origin_domain = ?2)",
        )?;
        let rows = stmt
            .query_map(
                params![pattern_param(entry_type_pattern), pattern_param(origin_pattern)],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, bytes) in rows {
            match decode_entry(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(row = id, error = %e, "skipping undecodable entry row"),
            }
        }
        Ok(entries)
    }

    pub fn len(&self) -> MeshResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> MeshResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn decode_entry(bytes: &[u8]) -> MeshResult<StoredEntry> {
    StoredEntry::from_envelope(SignedEnvelope::from_bytes(bytes)?)
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<StoredEntry> {
    let bytes: Vec<u8> = row.get(0)?;
    decode_entry(&bytes).map_err(|e| decode_err(0, e))
}

struct SqliteEntries<'a> {
    conn: &'a Connection,
}

impl EntryTable for SqliteEntries<'_> {
    type Row = StoredEntry;
    type Error = rusqlite::Error;

    fn lookup_timestamp(&mut self, candidate: &StoredEntry) -> rusqlite::Result<Option<u64>> {
        self.conn
            .query_row(
                "SELECT timestamp FROM entries WHERE origin_domain = ?1 AND entry_type = ?2",
                params![
                    candidate.entry.origin_domain.to_string(),
                    candidate.entry.entry_type
                ],
                |row| row.get(0),
            )
            .optional()
    }

    fn insert(&mut self, candidate: &StoredEntry) -> rusqlite::Result<()> {
        let (blob, signed_blob) = encode_row(candidate)?;
        let entry = &candidate.entry;
        self.conn.execute(
            "INSERT INTO entries (blob, commit_id, origin_domain, timestamp, entry_type, signed_blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                blob,
                entry.commit_id,
                entry.origin_domain.to_string(),
                entry.timestamp,
                entry.entry_type,
                signed_blob
            ],
        )?;
        Ok(())
    }

    fn update(&mut self, candidate: &StoredEntry) -> rusqlite::Result<()> {
        let (blob, signed_blob) = encode_row(candidate)?;
        let entry = &candidate.entry;
        self.conn.execute(
            "UPDATE entries SET blob = ?1, commit_id = ?2, timestamp = ?3, signed_blob = ?4
             WHERE origin_domain = ?5 AND entry_type = ?6",
            params![
                blob,
                entry.commit_id,
                entry.timestamp,
                signed_blob,
                entry.origin_domain.to_string(),
                entry.entry_type
            ],
        )?;
        Ok(())
    }

    fn timestamp_of(candidate: &StoredEntry) -> u64 {
        candidate.entry.timestamp
    }
}

fn encode_row(candidate: &StoredEntry) -> rusqlite::Result<(Vec<u8>, Vec<u8>)> {
    let blob = candidate.entry.payload.to_bytes().map_err(encode_err)?;
    let signed_blob = candidate.signed.to_bytes().map_err(encode_err)?;
    Ok((blob, signed_blob))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mapmesh_crypto::{PrivateKeyHandle, Signature};

    /// Entry signed with a throwaway key; the store does not verify.
    pub(crate) fn stored(origin: &str, entry_type: &str, timestamp: u64, commit: &str) -> StoredEntry {
        let key = PrivateKeyHandle::from_seed(&[9u8; 32]).unwrap();
        let origin: DomainId = origin.parse().unwrap();
        let inner_blob = b"{}".to_vec();
        let inner = SignedEnvelope::new(
            inner_blob.clone(),
            Signature::create(&key, origin, 1, timestamp, &inner_blob),
        );
        let entry = Entry {
            origin_domain: origin,
            entry_type: entry_type.to_string(),
            timestamp,
            commit_id: commit.to_string(),
            payload: inner,
        };
        let blob = Payload::Entry(entry.clone()).encode().unwrap();
        let signed = SignedEnvelope::new(
            blob.clone(),
            Signature::create(&key, origin, 1, timestamp, &blob),
        );
        StoredEntry { entry, signed }
    }

    #[test]
    fn test_upsert_outcomes() {
        let store = EntryStore::open_in_memory().unwrap();
        let first = stored("1-ff00:0:1", "MAP", 100, "c1");
        assert_eq!(store.upsert(&first).unwrap(), Outcome::Inserted);
        assert_eq!(store.upsert(&first).unwrap(), Outcome::Discarded);

        let newer = stored("1-ff00:0:1", "MAP", 110, "c2");
        assert_eq!(store.upsert(&newer).unwrap(), Outcome::Updated);
        let older = stored("1-ff00:0:1", "MAP", 105, "c3");
        assert_eq!(store.upsert(&older).unwrap(), Outcome::Discarded);

        let held = store
            .lookup("1-ff00:0:1".parse().unwrap(), "MAP")
            .unwrap()
            .unwrap();
        assert_eq!(held.entry.commit_id, "c2");
        assert_eq!(held, newer);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_filters() {
        let store = EntryStore::open_in_memory().unwrap();
        store.upsert(&stored("1-ff00:0:1", "MAP", 1, "a")).unwrap();
        store.upsert(&stored("1-ff00:0:2", "MAP", 1, "b")).unwrap();
        store.upsert(&stored("1-ff00:0:2", "POLICY", 1, "c")).unwrap();

        assert_eq!(store.get_all().unwrap().len(), 3);
        assert_eq!(store.get_by_filter("MAP", "*").unwrap().len(), 2);
        assert_eq!(store.get_by_filter("%", "1-ff00:0:2").unwrap().len(), 2);
        let only = store.get_by_filter("POLICY", "1-ff00:0:2").unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].entry.commit_id, "c");
        assert!(store.get_by_filter("MAP", "1-ff00:0:9").unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let store = EntryStore::open_in_memory().unwrap();
        store.upsert(&stored("1-ff00:0:1", "MAP", 1, "a")).unwrap();
        store.upsert(&stored("1-ff00:0:2", "MAP", 1, "b")).unwrap();
        lock(&store.conn)
            .unwrap()
            .execute(
                "INSERT INTO entries (blob, commit_id, origin_domain, timestamp, entry_type, signed_blob)
                 VALUES (x'00', 'bad', '1-ff00:0:3', 1, 'MAP', x'deadbeef')",
                [],
            )
            .unwrap();

        assert_eq!(store.len().unwrap(), 3);
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|held| held.entry.commit_id != "bad"));
        assert_eq!(store.get_by_filter("MAP", "*").unwrap().len(), 2);
        assert!(store.get_by_filter("*", "1-ff00:0:3").unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        {
            let store = EntryStore::open(&path).unwrap();
            store.upsert(&stored("1-ff00:0:1", "MAP", 7, "c1")).unwrap();
        }
        let store = EntryStore::open(&path).unwrap();
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entry.timestamp, 7);
    }

    #[test]
    fn test_concurrent_upserts_keep_newest() {
        let store = std::sync::Arc::new(EntryStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .upsert(&stored("1-ff00:0:1", "MAP", 100 + i, "c"))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let held = store.get_all().unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].entry.timestamp, 107);
    }
}
