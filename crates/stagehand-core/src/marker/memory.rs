use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{Lease, MarkerRecord, MarkerStore};
use crate::error::{Result, StagehandError};

#[derive(Debug, Default)]
struct Slot {
    marker: Option<MarkerRecord>,
    lease: Option<Lease>,
}

/// Process-local store. Markers vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| StagehandError::Marker("memory store lock poisoned".into()))
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn get(&self, instance: &str) -> Result<Option<MarkerRecord>> {
        Ok(self
            .slots()?
            .get(instance)
            .and_then(|s| s.marker.clone()))
    }

    fn set(&self, record: &MarkerRecord) -> Result<()> {
        self.slots()?
            .entry(record.instance.clone())
            .or_default()
            .marker = Some(record.clone());
        Ok(())
    }

    fn clear(&self, instance: &str) -> Result<bool> {
        Ok(self
            .slots()?
            .get_mut(instance)
            .and_then(|s| s.marker.take())
            .is_some())
    }

    fn try_acquire_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut slots = self.slots()?;
        let slot = slots.entry(instance.to_string()).or_default();
        if let Some(current) = &slot.lease {
            if current.holder != holder && !current.is_expired(Utc::now()) {
                return Ok(false);
            }
        }
        slot.lease = Some(Lease::new(holder, ttl));
        Ok(true)
    }

    fn renew_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut slots = self.slots()?;
        match slots.get_mut(instance).and_then(|s| s.lease.as_mut()) {
            Some(lease) if lease.holder == holder => {
                *lease = Lease::new(holder, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release_lease(&self, instance: &str, holder: &str) -> Result<()> {
        let mut slots = self.slots()?;
        if let Some(slot) = slots.get_mut(instance) {
            if slot.lease.as_ref().is_some_and(|l| l.holder == holder) {
                slot.lease = None;
            }
        }
        Ok(())
    }

    fn lease(&self, instance: &str) -> Result<Option<Lease>> {
        Ok(self.slots()?.get(instance).and_then(|s| s.lease.clone()))
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
