//! Durable membership table held by registries.

use crate::error::MeshResult;
use crate::message::MembershipRecord;
use crate::store::{is_wildcard, lock, open_connection};
use mapmesh_core::DomainId;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Membership records keyed by node ID.
#[derive(Debug)]
pub struct MembershipStore {
    conn: Mutex<Connection>,
}

impl MembershipStore {
    pub fn open<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        Self::init(open_connection(path)?)
    }

    pub fn open_in_memory() -> MeshResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> MeshResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS membership (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL UNIQUE,
                domain TEXT NOT NULL,
                raw BLOB
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// First write wins: returns false and leaves the row untouched when the
    /// node ID is already registered.
    pub fn register(&self, record: &MembershipRecord) -> MeshResult<bool> {
        let conn = lock(&self.conn)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO membership (node_id, domain, raw) VALUES (?1, ?2, ?3)",
            params![record.node_id, record.domain.to_string(), record.raw],
        )?;
        Ok(changed == 1)
    }

    /// Records whose domain matches `domain_pattern`, one per node ID.
    pub fn list(&self, domain_pattern: &str) -> MeshResult<Vec<MembershipRecord>> {
        let conn = lock(&self.conn)?;
        let filter = (!is_wildcard(domain_pattern)).then_some(domain_pattern);
        let mut stmt = conn.prepare(
            "SELECT node_id, domain, raw FROM membership
             WHERE (?1 IS NULL OR domain = ?1) ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![filter], |row| {
                let domain: String = row.get(1)?;
                let domain = domain.parse::<DomainId>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(MembershipRecord {
                    node_id: row.get(0)?,
                    domain,
                    raw: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn get_all(&self) -> MeshResult<Vec<MembershipRecord>> {
        self.list("*")
    }
}
