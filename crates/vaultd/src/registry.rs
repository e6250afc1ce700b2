// Copyright (c) 2025-2026 Zensical and contributors

// SPDX-License-Identifier: MIT
// All contributions are certified under the DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! The worker registry: owns every active and ended `(source, target)` pair,
//! spawning, cancelling and restoring the workers that back them.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ahash::HashMap;
use vaultd_core::path::{
    canonicalize_existing_dir, canonicalize_target_path, has_prefix_path, is_dir_empty,
};
use vaultd_core::{restore, Worker};

use crate::error::{Error, Result};

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// A record of one `(source, target)` pair, active or ended.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    /// Canonical source root.
    pub src: PathBuf,
    /// Canonical target root.
    pub dst: PathBuf,
    /// When the worker for this pair was started.
    pub created_at: SystemTime,
    /// True while the worker is running.
    pub active: bool,
}

/// One registry entry: a record plus the worker backing it, while active.
struct Slot {
    record: BackupRecord,
    worker: Option<Worker>,
}

/// Owns every `(source, target)` pair the operator has added, across the
/// daemon's lifetime.
#[derive(Default)]
pub struct Registry {
    slots: HashMap<(PathBuf, PathBuf), Slot>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and adds a single `(source, target)` pair, spawning its
    /// worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the source does not exist or is not a directory,
    /// the target is inside or equal to the source, a worker for this pair
    /// already exists, the target exists and is non-empty, or the worker
    /// thread cannot be spawned.
    pub fn add(&mut self, source: &Path, target: &Path) -> Result {
        self.reap();

        let src = canonicalize_existing_dir(source)?;
        let dst = canonicalize_target_path(target)?;

        if dst == src || has_prefix_path(&dst, &src) {
            return Err(Error::TargetInsideSource {
                source: src.display().to_string(),
                target: dst.display().to_string(),
            });
        }

        let key = (src.clone(), dst.clone());
        if self.slots.contains_key(&key) {
            return Err(Error::PairExists(
                src.display().to_string(),
                dst.display().to_string(),
            ));
        }

        if std::fs::symlink_metadata(&dst).is_ok() && !is_dir_empty(&dst)? {
            return Err(Error::TargetNotEmpty(dst.display().to_string()));
        }

        let worker = Worker::spawn(src.clone(), dst.clone())?;
        self.slots.insert(
            key,
            Slot {
                record: BackupRecord {
                    src,
                    dst,
                    created_at: SystemTime::now(),
                    active: true,
                },
                worker: Some(worker),
            },
        );
        Ok(())
    }

    /// Stops the worker for a matching active pair, leaving its mirror in
    /// place for a future `restore`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchPair`] if no record matches, or the worker's
    /// own error if its mirror loop exited abnormally.
    pub fn end(&mut self, source: &Path, target: &Path) -> Result {
        let key = self.resolve(source, target)?;
        let slot = self.slots.get_mut(&key).expect("resolve() found this key");
        if let Some(worker) = slot.worker.take() {
            worker.join()?;
        }
        slot.record.active = false;
        Ok(())
    }

    /// Stops the worker for a matching active pair (if any), then runs the
    /// restore engine against its mirror.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchPair`] if no record matches, or any error from
    /// stopping the worker or from the restore engine itself.
    pub fn restore(&mut self, source: &Path, target: &Path) -> Result {
        let key = self.resolve(source, target)?;
        if self.slots[&key].record.active {
            self.end(source, target)?;
        }
        let record = &self.slots[&key].record;
        restore::restore(&record.src, &record.dst, record.created_at)?;
        Ok(())
    }

    /// Returns every record, most recently added last.
    pub fn list(&mut self) -> impl Iterator<Item = &BackupRecord> {
        self.reap();
        self.slots.values().map(|slot| &slot.record)
    }

    /// Stops every active worker and clears the table.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered joining an active worker; all
    /// workers are still requested to stop even if one join fails.
    pub fn shutdown(&mut self) -> Result {
        let mut first_err = None;
        for slot in self.slots.values_mut() {
            if let Some(worker) = slot.worker.take() {
                if let Err(err) = worker.join() {
                    first_err.get_or_insert(err);
                }
            }
            slot.record.active = false;
        }
        self.slots.clear();
        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Opportunistically marks active records whose worker has stopped on
    /// its own (e.g. root-deletion shutdown, `SPEC_FULL.md` §4.6) as ended,
    /// without blocking. Mirrors the reference implementation's
    /// `reap_children` called at the top of the REPL loop.
    fn reap(&mut self) {
        for slot in self.slots.values_mut() {
            let Some(worker) = &slot.worker else { continue };
            if let Some(result) = worker.try_result() {
                if let Err(err) = result {
                    tracing::error!(
                        source = %slot.record.src.display(),
                        target = %slot.record.dst.display(),
                        error = %err,
                        "worker exited with an error"
                    );
                }
                slot.worker = None;
                slot.record.active = false;
            }
        }
    }

    /// Canonicalises `source`/`target` and looks up the matching key.
    fn resolve(&self, source: &Path, target: &Path) -> Result<(PathBuf, PathBuf)> {
        let src = canonicalize_existing_dir(source)?;
        let dst = canonicalize_target_path(target)?;
        let key = (src, dst);
        if self.slots.contains_key(&key) {
            Ok(key)
        } else {
            Err(Error::NoSuchPair(
                key.0.display().to_string(),
                key.1.display().to_string(),
            ))
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_target_inside_source() {
        let src = tempfile::tempdir().unwrap();
        let dst = src.path().join("nested");
        std::fs::create_dir(&dst).unwrap();

        let mut registry = Registry::new();
        let err = registry.add(src.path(), &dst).unwrap_err();
        assert!(matches!(err, Error::TargetInsideSource { .. }));
    }

    #[test]
    fn add_rejects_nonempty_target() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join("f"), b"x").unwrap();

        let mut registry = Registry::new();
        let err = registry.add(src.path(), dst.path()).unwrap_err();
        assert!(matches!(err, Error::TargetNotEmpty(_)));
    }

    #[test]
    fn end_on_unknown_pair_errors() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let mut registry = Registry::new();
        let err = registry.end(src.path(), dst.path()).unwrap_err();
        assert!(matches!(err, Error::NoSuchPair(_, _)));
    }

    #[test]
    fn add_then_end_marks_record_inactive() {
        let src = tempfile::tempdir().unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        let mut registry = Registry::new();
        registry.add(src.path(), &dst).unwrap();
        registry.end(src.path(), &dst).unwrap();

        let records: Vec<_> = registry.list().cloned().collect();
        assert_eq!(records.len(), 1);
        assert!(!records[0].active);
    }
}
