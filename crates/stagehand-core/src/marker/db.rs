//! Marker store backed by a redb database file.
//!
//! # Table design
//!
//! Two tables keyed by instance name, values JSON-encoded:
//! ```text
//! markers: instance -> MarkerRecord
//! leases:  instance -> Lease
//! ```
//!
//! Every lease operation reads and writes inside one write transaction, and
//! redb admits a single writer at a time, so check-then-take is atomic.

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::time::Duration;

use super::{Lease, MarkerRecord, MarkerStore};
use crate::error::{Result, StagehandError};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const MARKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("markers");
const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

fn db_err(e: impl std::fmt::Display) -> StagehandError {
    StagehandError::Marker(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbMarkerStore
// ---------------------------------------------------------------------------

pub struct RedbMarkerStore {
    db: Database,
}

impl RedbMarkerStore {
    /// Open or create the database at `path`, creating both tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(MARKERS).map_err(db_err)?;
        wt.open_table(LEASES).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn read_lease(&self, instance: &str) -> Result<Option<Lease>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(LEASES).map_err(db_err)?;
        let value = table.get(instance).map_err(db_err)?;
        match value {
            Some(v) => Ok(serde_json::from_slice(v.value()).ok()),
            None => Ok(None),
        }
    }

    /// Run `f` against the current lease inside one write transaction. `f`
    /// returns the lease to store (`None` removes it) and the call's result.
    fn update_lease<F>(&self, instance: &str, f: F) -> Result<bool>
    where
        F: FnOnce(Option<Lease>) -> (Option<Lease>, bool),
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut table = wt.open_table(LEASES).map_err(db_err)?;
            let current: Option<Lease> = table
                .get(instance)
                .map_err(db_err)?
                .and_then(|v| serde_json::from_slice(v.value()).ok());
            let (next, outcome) = f(current);
            match next {
                Some(lease) => {
                    let data = serde_json::to_vec(&lease)?;
                    table
                        .insert(instance, data.as_slice())
                        .map_err(db_err)?;
                }
                None => {
                    table.remove(instance).map_err(db_err)?;
                }
            }
            outcome
        };
        wt.commit().map_err(db_err)?;
        Ok(outcome)
    }
}

impl MarkerStore for RedbMarkerStore {
    fn get(&self, instance: &str) -> Result<Option<MarkerRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(MARKERS).map_err(db_err)?;
        let value = table.get(instance).map_err(db_err)?;
        match value {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, record: &MarkerRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(MARKERS).map_err(db_err)?;
            table
                .insert(record.instance.as_str(), data.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn clear(&self, instance: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut table = wt.open_table(MARKERS).map_err(db_err)?;
            let removed = table.remove(instance).map_err(db_err)?;
            removed.is_some()
        };
        wt.commit().map_err(db_err)?;
        Ok(existed)
    }

    fn try_acquire_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        self.update_lease(instance, |current| match current {
            Some(l) if l.holder != holder && !l.is_expired(now) => (Some(l), false),
            _ => (Some(Lease::new(holder, ttl)), true),
        })
    }

    fn renew_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        self.update_lease(instance, |current| match current {
            Some(l) if l.holder == holder => (Some(Lease::new(holder, ttl)), true),
            other => (other, false),
        })
    }

    fn release_lease(&self, instance: &str, holder: &str) -> Result<()> {
        self.update_lease(instance, |current| match current {
            Some(l) if l.holder == holder => (None, true),
            other => (other, false),
        })?;
        Ok(())
    }

    fn lease(&self, instance: &str) -> Result<Option<Lease>> {
        self.read_lease(instance)
    }

    fn kind(&self) -> &'static str {
        "redb"
    }
}
