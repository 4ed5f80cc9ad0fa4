//! Durable initialization marker and the expiring lease that guards writing it.
//!
//! The marker is keyed by deployment instance and written exactly once, after
//! every bootstrap step has succeeded. The lease serialises initializers that
//! race on the same instance; a crashed holder's lease simply expires.

mod db;
mod file;
mod memory;

pub use db::RedbMarkerStore;
pub use file::FileMarkerStore;
pub use memory::MemoryMarkerStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::MarkerStoreConfig;
use crate::error::Result;

/// Proof that an instance finished its bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub instance: String,
    pub completed_at: DateTime<Utc>,
    /// Lease holder that wrote the marker.
    pub holder: String,
}

impl MarkerRecord {
    pub fn new(instance: &str, holder: &str) -> Self {
        Self {
            instance: instance.to_string(),
            completed_at: Utc::now(),
            holder: holder.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(holder: &str, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            holder: holder.to_string(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub trait MarkerStore: Send + Sync {
    fn get(&self, instance: &str) -> Result<Option<MarkerRecord>>;

    fn is_set(&self, instance: &str) -> Result<bool> {
        Ok(self.get(instance)?.is_some())
    }

    fn set(&self, record: &MarkerRecord) -> Result<()>;

    /// Remove the marker. Returns whether one existed.
    fn clear(&self, instance: &str) -> Result<bool>;

    /// Take the lease unless another holder has an unexpired one. Re-acquiring
    /// one's own lease extends it.
    fn try_acquire_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Extend the lease. Returns `false` if `holder` no longer owns it.
    fn renew_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `holder` owns it. No-op otherwise.
    fn release_lease(&self, instance: &str, holder: &str) -> Result<()>;

    fn lease(&self, instance: &str) -> Result<Option<Lease>>;

    fn kind(&self) -> &'static str;
}

/// Marker key for one init unit of a deployment instance.
pub fn marker_key(instance: &str, unit: &str) -> String {
    format!("{instance}.{unit}")
}

/// Open the store described by `config`.
pub fn open_store(config: &MarkerStoreConfig) -> Result<Arc<dyn MarkerStore>> {
    Ok(match config {
        MarkerStoreConfig::Memory => Arc::new(MemoryMarkerStore::new()),
        MarkerStoreConfig::File { dir } => Arc::new(FileMarkerStore::open(dir)?),
        MarkerStoreConfig::Redb { path } => Arc::new(RedbMarkerStore::open(path)?),
    })
}
