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

//! The pending-move correlation table.
//!
//! A kernel rename is delivered as two events sharing a 32-bit cookie: a
//! move-out (`MOVED_FROM`) on the old parent's watch, and a move-in
//! (`MOVED_TO`) on the new parent's watch, which may be the same watch for
//! an intra-directory rename. This table holds move-outs until their pair
//! arrives, or until they expire and are treated as plain deletes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Maximum number of outstanding move-outs tracked at once.
pub const CAPACITY: usize = 128;

/// Window after which an unpaired move-out is treated as a delete.
pub const EXPIRY: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// A move-out event awaiting its paired move-in.
#[derive(Debug, Clone)]
pub struct PendingMove {
    /// The kernel-assigned correlation id shared by the paired move-in.
    pub cookie: u32,
    /// Whether the moved entry is a directory.
    pub is_dir: bool,
    /// When this move-out was recorded.
    pub at: Instant,
    /// The entry's canonical path under the source root before the move.
    pub src_old: PathBuf,
    /// The entry's corresponding canonical path under the target root.
    pub dst_old: PathBuf,
}

/// A bounded, cookie-indexed set of outstanding [`PendingMove`]s.
#[derive(Debug, Default)]
pub struct PendingMoveTable {
    entries: Vec<PendingMove>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl PendingMoveTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(CAPACITY),
        }
    }

    /// Records a move-out. If the table is at [`CAPACITY`], the oldest
    /// entry is evicted first and returned so the caller can reclaim its
    /// `dst_old` subtree immediately rather than leaking it until a later
    /// expiry sweep (see the pending-move eviction resolution in
    /// `SPEC_FULL.md` §9).
    pub fn insert(&mut self, mv: PendingMove) -> Option<PendingMove> {
        let evicted = if self.entries.len() >= CAPACITY {
            Some(self.evict_oldest())
        } else {
            None
        };
        self.entries.push(mv);
        evicted
    }

    /// Removes and returns the first pending move matching `cookie`, if any.
    pub fn take(&mut self, cookie: u32) -> Option<PendingMove> {
        let idx = self.entries.iter().position(|mv| mv.cookie == cookie)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Removes and returns every entry older than [`EXPIRY`].
    pub fn expire(&mut self) -> Vec<PendingMove> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].at.elapsed() >= EXPIRY {
                expired.push(self.entries.swap_remove(i));
            } else {
                i += 1;
            }
        }
        expired
    }

    /// Number of outstanding move-outs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff there are no outstanding move-outs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns the entry with the earliest `at` timestamp.
    ///
    /// # Panics
    ///
    /// Panics if the table is empty; callers only reach this path when
    /// `len() >= CAPACITY`.
    fn evict_oldest(&mut self) -> PendingMove {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, mv)| mv.at)
            .map(|(idx, _)| idx)
            .expect("table is non-empty when eviction is triggered");
        self.entries.swap_remove(idx)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn mv(cookie: u32) -> PendingMove {
        PendingMove {
            cookie,
            is_dir: false,
            at: Instant::now(),
            src_old: Path::new("/src/a").to_path_buf(),
            dst_old: Path::new("/dst/a").to_path_buf(),
        }
    }

    #[test]
    fn take_returns_matching_cookie() {
        let mut table = PendingMoveTable::new();
        table.insert(mv(1));
        table.insert(mv(2));

        let taken = table.take(1).unwrap();
        assert_eq!(taken.cookie, 1);
        assert!(table.take(1).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_evicts_oldest_on_overflow() {
        let mut table = PendingMoveTable::new();
        for cookie in 0..CAPACITY as u32 {
            assert!(table.insert(mv(cookie)).is_none());
        }
        // The table is now full; the next insert must evict exactly one
        // entry and report it so the caller can reclaim its mirror.
        let evicted = table.insert(mv(CAPACITY as u32)).unwrap();
        assert_eq!(table.len(), CAPACITY);
        assert!(table.take(evicted.cookie).is_none());
    }

    #[test]
    fn expire_removes_entries_older_than_window() {
        let mut table = PendingMoveTable::new();
        table.entries.push(PendingMove {
            at: Instant::now() - EXPIRY - Duration::from_millis(1),
            ..mv(7)
        });
        table.insert(mv(8));

        let expired = table.expire();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].cookie, 7);
        assert_eq!(table.len(), 1);
    }
}
