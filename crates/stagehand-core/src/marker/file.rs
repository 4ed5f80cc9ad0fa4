//! Marker files in a directory, one pair per instance:
//!
//! ```text
//! <dir>/<instance>.done   MarkerRecord as JSON
//! <dir>/<instance>.lock   Lease as JSON, created exclusively
//! ```
//!
//! With `dir` on a tmpfs the marker lives exactly as long as the host's
//! deployment does.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{Lease, MarkerRecord, MarkerStore};
use crate::error::{Result, StagehandError};
use crate::io;

#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    dir: PathBuf,
}

impl FileMarkerStore {
    pub fn open(dir: &Path) -> Result<Self> {
        io::ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn done_path(&self, instance: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.done", file_stem(instance)?)))
    }

    fn lock_path(&self, instance: &str) -> Result<PathBuf> {
        Ok(self.dir.join(format!("{}.lock", file_stem(instance)?)))
    }
}

/// Instance names become file names; reject anything that could escape `dir`.
fn file_stem(instance: &str) -> Result<&str> {
    let ok = !instance.is_empty()
        && instance
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !instance.starts_with('.');
    if ok {
        Ok(instance)
    } else {
        Err(StagehandError::Marker(format!(
            "instance name '{instance}' is not usable as a file name"
        )))
    }
}

/// A missing or unreadable lock file reads as "no lease". A lock torn by a
/// crash mid-write is therefore reclaimable.
fn read_lease(path: &Path) -> Result<Option<Lease>> {
    match std::fs::read(path) {
        Ok(data) => Ok(serde_json::from_slice(&data).ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Put a live lease that was moved aside back at `lock`. If a third
/// contender created `lock` in the meantime, its lease stands. On any other
/// failure `aside` is kept so the lease is not lost silently.
fn restore_lease(aside: &Path, lock: &Path) -> Result<()> {
    match std::fs::hard_link(aside, lock) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            debug!(lock = %lock.display(), "lock re-created while restoring a live lease");
        }
        Err(e) => return Err(e.into()),
    }
    io::remove_if_exists(aside)?;
    Ok(())
}

impl MarkerStore for FileMarkerStore {
    fn get(&self, instance: &str) -> Result<Option<MarkerRecord>> {
        let path = self.done_path(instance)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, record: &MarkerRecord) -> Result<()> {
        let path = self.done_path(&record.instance)?;
        io::atomic_write(&path, &serde_json::to_vec_pretty(record)?)
    }

    fn clear(&self, instance: &str) -> Result<bool> {
        io::remove_if_exists(&self.done_path(instance)?)
    }

    fn try_acquire_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let lock = self.lock_path(instance)?;
        let lease = Lease::new(holder, ttl);
        let data = serde_json::to_vec(&lease)?;
        if io::create_exclusive(&lock, &data)? {
            return Ok(true);
        }

        let now = Utc::now();
        match read_lease(&lock)? {
            Some(current) if current.holder == holder => {
                io::atomic_write(&lock, &data)?;
                return Ok(true);
            }
            Some(current) if !current.is_expired(now) => return Ok(false),
            _ => {}
        }

        // Stale: move it aside atomically so only one contender reclaims it.
        let aside = self
            .dir
            .join(format!("{}.lock.{}", file_stem(instance)?, Uuid::new_v4()));
        match std::fs::rename(&lock, &aside) {
            Ok(()) => {
                let moved = read_lease(&aside)?;
                if moved.as_ref().is_some_and(|m| !m.is_expired(now)) {
                    // Another contender reclaimed it between our read and the
                    // rename; put its lease back.
                    restore_lease(&aside, &lock)?;
                    return Ok(false);
                }
                io::remove_if_exists(&aside)?;
                debug!(instance, holder, "reclaimed expired lease");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        io::create_exclusive(&lock, &data)
    }

    fn renew_lease(&self, instance: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let lock = self.lock_path(instance)?;
        match read_lease(&lock)? {
            Some(current) if current.holder == holder => {
                let data = serde_json::to_vec(&Lease::new(holder, ttl))?;
                io::atomic_write(&lock, &data)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release_lease(&self, instance: &str, holder: &str) -> Result<()> {
        let lock = self.lock_path(instance)?;
        if read_lease(&lock)?.is_some_and(|l| l.holder == holder) {
            io::remove_if_exists(&lock)?;
        }
        Ok(())
    }

    fn lease(&self, instance: &str) -> Result<Option<Lease>> {
        read_lease(&self.lock_path(instance)?)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}
