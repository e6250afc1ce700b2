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

//! The bidirectional watch registry: `watch descriptor <-> canonical path`.
//!
//! Every directory under a worker's source root (but no symlink, and no
//! regular file) has exactly one [`Watch`]. The registry is consulted on
//! every inotify event to recover the path an event fired against, and is
//! kept in lockstep with directory creation, rename and deletion so that
//! later events keep translating to correct target paths.

use std::path::{Path, PathBuf};
use std::result;

use inotify::{Inotify, WatchDescriptor, WatchMask};
use thiserror::Error;
use walkdir::WalkDir;

use crate::path::has_prefix_path;

/// Initial capacity of the watch table, doubled by `Vec`'s own amortised
/// growth thereafter.
const INITIAL_CAPACITY: usize = 64;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Watch registry error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error, including a failed `inotify_add_watch`/`inotify_rm_watch`.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Walk directory error while recursing into subdirectories.
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
}

/// Watch registry result.
pub type Result<T = ()> = result::Result<T, Error>;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// A single watched directory.
#[derive(Debug, Clone)]
pub struct Watch {
    /// The kernel-assigned watch descriptor.
    pub wd: WatchDescriptor,
    /// The canonical path this descriptor watches.
    pub path: PathBuf,
}

/// The bidirectional `wd <-> path` map for one worker's source tree.
#[derive(Debug)]
pub struct WatchMap {
    entries: Vec<Watch>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl WatchMap {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Appends a watch, taking ownership of `path`.
    pub fn add(&mut self, wd: WatchDescriptor, path: PathBuf) {
        self.entries.push(Watch { wd, path });
    }

    /// Finds the path registered for `wd`, by linear scan.
    #[must_use]
    pub fn find(&self, wd: &WatchDescriptor) -> Option<&Path> {
        self.entries
            .iter()
            .find(|w| &w.wd == wd)
            .map(|w| w.path.as_path())
    }

    /// Removes the entry for `wd`, if present, via swap-with-last.
    pub fn remove(&mut self, wd: &WatchDescriptor) -> Option<Watch> {
        let idx = self.entries.iter().position(|w| &w.wd == wd)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Subscribes to `base` and every subdirectory beneath it (following no
    /// symlinks), recording a [`Watch`] for each. Stops and returns the
    /// first error encountered; already-registered watches are left in
    /// place, per the spec's tolerance for partial registration.
    pub fn add_watch_tree(&mut self, inotify: &mut Inotify, base: &Path) -> Result {
        let wd = inotify.watches().add(base, dir_watch_mask())?;
        self.add(wd, base.to_path_buf());

        for entry in WalkDir::new(base)
            .min_depth(1)
            .follow_root_links(false)
            .follow_links(false)
            .into_iter()
        {
            let entry = entry?;
            if entry.file_type().is_dir() {
                let wd = inotify.watches().add(entry.path(), dir_watch_mask())?;
                self.add(wd, entry.path().to_path_buf());
            }
        }
        Ok(())
    }

    /// Rewrites the `old` prefix to `new` on every entry rooted under `old`,
    /// following a directory rename within the source tree.
    pub fn update_prefix(&mut self, old: &Path, new: &Path) {
        for entry in &mut self.entries {
            if has_prefix_path(&entry.path, old) {
                if let Ok(suffix) = entry.path.strip_prefix(old) {
                    entry.path = new.join(suffix);
                }
            }
        }
    }

    /// Releases the kernel watch and removes every entry rooted under
    /// `prefix`, following a subtree deletion or detach.
    pub fn remove_subtree(&mut self, inotify: &mut Inotify, prefix: &Path) {
        let mut i = 0;
        while i < self.entries.len() {
            if has_prefix_path(&self.entries[i].path, prefix) {
                let watch = self.entries.swap_remove(i);
                let _ = inotify.watches().remove(watch.wd);
            } else {
                i += 1;
            }
        }
    }

    /// Iterates over every registered watch.
    pub fn iter(&self) -> impl Iterator<Item = &Watch> {
        self.entries.iter()
    }

    /// Number of registered watches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff no watches are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for WatchMap {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// The event mask every directory watch is registered with.
#[must_use]
pub fn dir_watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::CLOSE_WRITE
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_watch_tree_registers_every_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();

        let mut inotify = Inotify::init().unwrap();
        let mut map = WatchMap::new();
        map.add_watch_tree(&mut inotify, dir.path()).unwrap();

        assert_eq!(map.len(), 3); // root, a, a/b
        assert!(map.iter().any(|w| w.path == dir.path()));
        assert!(map.iter().any(|w| w.path == dir.path().join("a")));
        assert!(map.iter().any(|w| w.path == dir.path().join("a/b")));
    }

    #[test]
    fn update_prefix_rewrites_rooted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("x")).unwrap();

        let mut inotify = Inotify::init().unwrap();
        let mut map = WatchMap::new();
        map.add_watch_tree(&mut inotify, &dir.path().join("x")).unwrap();

        let old = dir.path().join("x");
        let new = dir.path().join("y");
        map.update_prefix(&old, &new);

        assert!(map.iter().any(|w| w.path == new));
    }

    #[test]
    fn remove_subtree_releases_watches_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();

        let mut inotify = Inotify::init().unwrap();
        let mut map = WatchMap::new();
        map.add_watch_tree(&mut inotify, dir.path()).unwrap();

        map.remove_subtree(&mut inotify, &dir.path().join("a"));
        assert_eq!(map.len(), 1);
        assert!(map.iter().any(|w| w.path == dir.path()));
    }
}
