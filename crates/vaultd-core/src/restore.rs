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

//! Timestamp-aware restore: reconcile a live source against a mirror that
//! was captured at `created_at`.
//!
//! Two passes. Pass A ([`check_src_against_mirror`]) deletes anything under
//! the source whose mirror counterpart vanished or changed type, clearing
//! the way for pass B ([`apply_backup`]) to recreate from the mirror
//! wherever the source is missing or stale. Neither pass is cancellable;
//! a failure partway through is surfaced to the caller as a partial
//! restore, per `SPEC_FULL.md` §4.7.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::SystemTime;

use crate::entry::{self, Entry};
use crate::path::{ensure_parent_dir, mkdir_p};
use crate::tree::{copy_file, copy_symlink_rewrite, rm_tree};
use crate::Result;

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Restores `src` from `mirror`, treating `created_at` as the moment the
/// mirror was captured (the worker's start time). Runs pass A then pass B
/// at the roots themselves.
///
/// # Errors
///
/// Returns an error from either pass; the caller should treat the source
/// as possibly partially restored when this returns an error.
pub fn restore(src: &Path, mirror: &Path, created_at: SystemTime) -> Result {
    check_src_against_mirror(src, mirror)?;
    apply_backup(mirror, src, mirror, src, created_at)
}

/// Pass A: removes from `s` anything whose counterpart in `m` either
/// vanished or changed kind, so pass B can write into a clean slate.
/// Children present in `m` but absent from `s` are left for pass B.
///
/// # Errors
///
/// Returns an error if a filesystem operation fails.
pub fn check_src_against_mirror(s: &Path, m: &Path) -> Result {
    let m_entry = entry::of_if_exists(m)?;
    let s_entry = entry::of_if_exists(s)?;

    let Some(m_entry) = m_entry else {
        // Mirror counterpart is gone: the source's copy is now orphaned.
        return rm_tree(s);
    };

    let Some(s_entry) = s_entry else {
        // Source entry absent: nothing to delete; pass B may recreate it.
        return Ok(());
    };

    if !s_entry.same_kind(m_entry) {
        return rm_tree(s);
    }

    if let Entry::Dir(_) = s_entry {
        for child in std::fs::read_dir(s)? {
            let child = child?;
            let m_child = m.join(child.file_name());
            check_src_against_mirror(&child.path(), &m_child)?;
        }
    }
    Ok(())
}

/// Pass B: recreates `s` from `m` wherever `s` is absent or stale
/// (`mtime(s) > created_at`, meaning the live source was touched after the
/// backup was taken and is authoritative).
///
/// `mirror_root`/`src_root` are the overall roots of the restore, held
/// constant across the recursion; `m`/`s` are the current entry within
/// each tree. They are needed separately from `m`/`s` so that a symlink's
/// rewrite can swap the whole mirror-root prefix for the source-root
/// prefix, mirroring `copy_symlink_rewrite`'s own forward rewrite.
///
/// # Errors
///
/// Returns an error if a filesystem operation fails.
pub fn apply_backup(
    m: &Path,
    s: &Path,
    mirror_root: &Path,
    src_root: &Path,
    created_at: SystemTime,
) -> Result {
    let Some(m_entry) = entry::of_if_exists(m)? else {
        return Ok(());
    };

    if let Entry::Dir(mode) = m_entry {
        mkdir_p(s, mode)?;
        for child in std::fs::read_dir(m)? {
            let child = child?;
            let s_child = s.join(child.file_name());
            apply_backup(&child.path(), &s_child, mirror_root, src_root, created_at)?;
        }
        return Ok(());
    }

    let s_entry = entry::of_if_exists(s)?;
    let to_write = match s_entry {
        None => true,
        Some(_) => mtime(s)? > created_at,
    };
    if !to_write {
        return Ok(());
    }

    if let Some(existing) = s_entry {
        if !existing.same_kind(m_entry) {
            rm_tree(s)?;
        }
    }
    ensure_parent_dir(s)?;

    match m_entry {
        // Restore is not cancellable mid-operation (SPEC_FULL.md §4.7), so
        // there is no shared stop flag here; pass one that never trips.
        Entry::Reg(mode) => copy_file(m, s, mode, &AtomicBool::new(false))?,
        // Forward mirroring rewrites an absolute src-rooted link to
        // dst-rooted; restoring reverses it, rewriting an absolute
        // mirror-rooted link back to source-rooted.
        Entry::Lnk => copy_symlink_rewrite(m, s, mirror_root, src_root)?,
        Entry::Dir(_) | Entry::Other => {}
    }
    Ok(())
}

/// Reads `mtime` via `std::fs::symlink_metadata` (not following a trailing
/// symlink), matching the reference implementation's `lstat`-based check
/// and this module's own existence checks in [`entry::of_if_exists`]. Using
/// a following `stat` here would error on a dangling symlink instead of
/// reconciling it like any other stale entry.
fn mtime(p: &Path) -> Result<SystemTime> {
    Ok(std::fs::symlink_metadata(p)?.modified()?)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn restore_recreates_missing_source_entries() {
        let mirror = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(mirror.path().join("a.txt"), b"backup").unwrap();

        let created_at = SystemTime::now();
        restore(src.path(), mirror.path(), created_at).unwrap();

        assert_eq!(
            std::fs::read(src.path().join("a.txt")).unwrap(),
            b"backup"
        );
    }

    #[test]
    fn restore_leaves_newer_source_entries_untouched() {
        let mirror = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(mirror.path().join("b.txt"), b"backup").unwrap();

        let created_at = SystemTime::now();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(src.path().join("b.txt"), b"live, newer").unwrap();

        restore(src.path(), mirror.path(), created_at).unwrap();

        assert_eq!(
            std::fs::read(src.path().join("b.txt")).unwrap(),
            b"live, newer"
        );
    }

    #[test]
    fn restore_deletes_source_entries_absent_from_mirror() {
        let mirror = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("stale.txt"), b"orphaned").unwrap();

        let created_at = SystemTime::now();
        restore(src.path(), mirror.path(), created_at).unwrap();

        assert!(!src.path().join("stale.txt").exists());
    }

    #[test]
    fn restore_reconciles_mismatched_types() {
        let mirror = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        // Mirror has a directory where the source has a plain file.
        std::fs::create_dir(mirror.path().join("x")).unwrap();
        std::fs::write(mirror.path().join("x/inner.txt"), b"nested").unwrap();
        std::fs::write(src.path().join("x"), b"not a directory").unwrap();

        let created_at = SystemTime::now();
        restore(src.path(), mirror.path(), created_at).unwrap();

        assert!(src.path().join("x").is_dir());
        assert_eq!(
            std::fs::read(src.path().join("x/inner.txt")).unwrap(),
            b"nested"
        );
    }

    #[test]
    fn restore_reconciles_dangling_symlink_without_erroring() {
        let mirror = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(mirror.path().join("a.txt"), b"hi").unwrap();
        std::os::unix::fs::symlink(mirror.path().join("a.txt"), mirror.path().join("link"))
            .unwrap();

        let created_at = SystemTime::now();
        std::thread::sleep(Duration::from_millis(20));

        // The live source has a dangling symlink (newer than the backup, so
        // it is stale and must be reconciled). The staleness check must use
        // the link's own mtime (lstat), not the mtime of whatever it points
        // to — following the link here would fail with `NotFound` and abort
        // the whole restore instead of just overwriting this one entry.
        std::os::unix::fs::symlink("nowhere", src.path().join("link")).unwrap();

        restore(src.path(), mirror.path(), created_at).unwrap();

        assert_eq!(
            std::fs::read_link(src.path().join("link")).unwrap(),
            src.path().join("a.txt")
        );
    }
}
