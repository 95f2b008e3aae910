//! Insert / update / discard decision for incoming entries.

use serde::{Deserialize, Serialize};

/// What happened to a candidate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Inserted,
    Updated,
    /// An entry with a newer or equal timestamp is already held
    Discarded,
}

/// Row operations the reconciler needs, keyed by `(origin_domain, entry_type)`.
pub trait EntryTable {
    type Row;
    type Error;

    /// Timestamp of the row currently held for the candidate's key.
    fn lookup_timestamp(&mut self, candidate: &Self::Row) -> Result<Option<u64>, Self::Error>;
    fn insert(&mut self, candidate: &Self::Row) -> Result<(), Self::Error>;
    fn update(&mut self, candidate: &Self::Row) -> Result<(), Self::Error>;
    fn timestamp_of(candidate: &Self::Row) -> u64;
}

/// Newest timestamp wins; equal timestamps keep the held row.
///
/// Callers must hold whatever lock makes lookup-then-write atomic for the key.
pub fn reconcile<T: EntryTable>(table: &mut T, candidate: &T::Row) -> Result<Outcome, T::Error> {
    match table.lookup_timestamp(candidate)? {
        None => {
            table.insert(candidate)?;
            Ok(Outcome::Inserted)
        }
        Some(existing) if existing >= T::timestamp_of(candidate) => Ok(Outcome::Discarded),
        Some(_) => {
            table.update(candidate)?;
            Ok(Outcome::Updated)
        }
    }
}
