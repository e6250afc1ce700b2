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

//! Recursive tree copy and delete, with symlink rewriting across the
//! source-to-target path mapping.

use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{io, result};

use thiserror::Error;

use crate::entry::Entry;
use crate::path::{ensure_parent_dir, has_prefix_path, map_src_to_dst};

/// Bytes moved per `read`/`write` call in [`copy_file`].
const BUF_SIZE: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Tree copy or delete error.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The operation was cancelled via the cooperative stop flag.
    #[error("cancelled")]
    Cancelled,
}

/// Tree copy or delete result.
pub type Result<T = ()> = result::Result<T, Error>;

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Recursively replicates `src_dir` into `dst_dir`, rewriting absolute
/// intra-source symlinks to point inside the target.
///
/// `src_real`/`dst_real` are the canonical roots of the pair being mirrored;
/// they need not equal `src_dir`/`dst_dir` since this function recurses.
/// `stop` is polled before each directory entry is processed.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if `stop` was observed set, or an I/O error
/// from any filesystem operation.
pub fn copy_tree(
    src_dir: &Path,
    dst_dir: &Path,
    src_real: &Path,
    dst_real: &Path,
    stop: &AtomicBool,
) -> Result {
    mkdir_tolerant(dst_dir, entry_mode(src_dir)?)?;

    for child in std::fs::read_dir(src_dir)? {
        if stop.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let child = child?;
        let src_path = child.path();
        let dst_path = dst_dir.join(child.file_name());
        let metadata = std::fs::symlink_metadata(&src_path)?;

        match Entry::from_metadata(&metadata) {
            Entry::Dir(_) => {
                copy_tree(&src_path, &dst_path, src_real, dst_real, stop)?;
            }
            Entry::Reg(mode) => copy_file(&src_path, &dst_path, mode, stop)?,
            Entry::Lnk => copy_symlink_rewrite(&src_path, &dst_path, src_real, dst_real)?,
            Entry::Other => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %src_path.display(), "skipping unsupported entry type");
            }
        }
    }
    Ok(())
}

/// Streams `src` into a freshly created `dst` (`O_CREAT|O_TRUNC`) with the
/// given mode, retrying short reads/writes until EOF. `stop` is checked
/// between buffer iterations.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if `stop` was observed set between buffer
/// iterations, or an I/O error from opening, reading, or writing either
/// side.
pub fn copy_file(src: &Path, dst: &Path, mode: u32, stop: &AtomicBool) -> Result {
    ensure_parent_dir(dst).map_err(|err| Error::Io(io::Error::other(err.to_string())))?;

    let mut reader = std::fs::File::open(src)?;
    let mut writer = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(dst)?;

    let mut buf = [0_u8; BUF_SIZE];
    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        writer.write_all(&buf[..n])?;
    }
    writer.set_permissions(std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Recreates a symlink at `dst_link` matching `src_link`.
///
/// If the link target is an absolute path rooted inside `src_real`, the
/// `src_real` prefix is rewritten to `dst_real` so the mirror is
/// self-contained. Any other target (relative, or absolute outside the
/// source root) is preserved byte-for-byte.
///
/// # Errors
///
/// Returns an I/O error reading the link or (re)creating it at `dst_link`.
pub fn copy_symlink_rewrite(
    src_link: &Path,
    dst_link: &Path,
    src_real: &Path,
    dst_real: &Path,
) -> Result {
    ensure_parent_dir(dst_link).map_err(|err| Error::Io(io::Error::other(err.to_string())))?;

    let target = std::fs::read_link(src_link)?;
    let rewritten = if target.is_absolute() && has_prefix_path(&target, src_real) {
        map_src_to_dst(src_real, dst_real, &target)
            .map_err(|err| Error::Io(io::Error::other(err.to_string())))?
    } else {
        target
    };

    let _ = std::fs::remove_file(dst_link);
    std::os::unix::fs::symlink(&rewritten, dst_link)?;
    Ok(())
}

/// Recursively removes `p`. Succeeds immediately if `p` does not exist
/// (tolerates a race with a concurrent deletion). Does not follow symlinks:
/// a symlink is unlinked, never traversed.
///
/// # Errors
///
/// Returns an I/O error other than the path already being absent.
pub fn rm_tree(p: &Path) -> Result {
    let metadata = match std::fs::symlink_metadata(p) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    match Entry::from_metadata(&metadata) {
        Entry::Dir(_) => {
            for child in std::fs::read_dir(p)? {
                let child = child?;
                rm_tree(&child.path())?;
            }
            match std::fs::remove_dir(p) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        }
        Entry::Reg(_) | Entry::Lnk | Entry::Other => match std::fs::remove_file(p) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        },
    }
}

/// Creates `dir` with `mode`, tolerating pre-existence.
fn mkdir_tolerant(dir: &Path, mode: u32) -> Result {
    use std::os::unix::fs::DirBuilderExt;
    match std::fs::DirBuilder::new().mode(mode).create(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Reads the lower nine permission bits of `path` without following a
/// trailing symlink.
fn entry_mode(path: &Path) -> Result<u32> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(meta.permissions().mode() & 0o777)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_replicates_files_and_permissions() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/a.txt"), b"hello").unwrap();

        let stop = AtomicBool::new(false);
        copy_tree(src.path(), dst.path(), src.path(), dst.path(), &stop).unwrap();

        let copied = dst.path().join("sub/a.txt");
        assert_eq!(std::fs::read(&copied).unwrap(), b"hello");
    }

    #[test]
    fn copy_symlink_rewrite_rewrites_absolute_intra_source_links() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"hi").unwrap();
        let link = src.path().join("link");
        std::os::unix::fs::symlink(src.path().join("a.txt"), &link).unwrap();

        let dst_link = dst.path().join("link");
        copy_symlink_rewrite(&link, &dst_link, src.path(), dst.path()).unwrap();

        let target = std::fs::read_link(&dst_link).unwrap();
        assert_eq!(target, dst.path().join("a.txt"));
    }

    #[test]
    fn copy_symlink_rewrite_preserves_relative_and_external_links() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let relative_link = src.path().join("rel");
        std::os::unix::fs::symlink("a.txt", &relative_link).unwrap();
        let dst_rel = dst.path().join("rel");
        copy_symlink_rewrite(&relative_link, &dst_rel, src.path(), dst.path()).unwrap();
        assert_eq!(std::fs::read_link(&dst_rel).unwrap(), Path::new("a.txt"));

        let external_link = src.path().join("ext");
        std::os::unix::fs::symlink("/etc/hosts", &external_link).unwrap();
        let dst_ext = dst.path().join("ext");
        copy_symlink_rewrite(&external_link, &dst_ext, src.path(), dst.path()).unwrap();
        assert_eq!(
            std::fs::read_link(&dst_ext).unwrap(),
            Path::new("/etc/hosts")
        );
    }

    #[test]
    fn rm_tree_removes_directories_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("f.txt"), b"x").unwrap();

        rm_tree(&dir.path().join("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn rm_tree_tolerates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        rm_tree(&dir.path().join("missing")).unwrap();
    }

    #[test]
    fn copy_tree_observes_cancellation() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"x").unwrap();

        let stop = AtomicBool::new(true);
        let err = copy_tree(src.path(), dst.path(), src.path(), dst.path(), &stop)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn copy_file_observes_cancellation() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let src_file = src.path().join("a.txt");
        std::fs::write(&src_file, b"x").unwrap();

        let stop = AtomicBool::new(true);
        let err = copy_file(&src_file, &dst.path().join("a.txt"), 0o644, &stop).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
