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

//! Path canonicalisation and source-to-target path mapping.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Canonicalises a path that must already exist and be a directory.
///
/// # Errors
///
/// Returns an error if the path does not exist, cannot be canonicalised, or
/// is not a directory.
pub fn canonicalize_existing_dir(path: &Path) -> Result<PathBuf> {
    let real = std::fs::canonicalize(path)?;
    if !real.is_dir() {
        return Err(Error::InvalidPath(format!(
            "{} is not a directory",
            real.display()
        )));
    }
    Ok(real)
}

/// Canonicalises a path that is the destination of a mirror or a restore.
///
/// The path need not exist yet: only its parent directory is canonicalised,
/// and the basename is appended verbatim. The parent directory must exist.
///
/// # Errors
///
/// Returns an error if the parent directory does not exist or has no
/// basename component (e.g. `/`).
pub fn canonicalize_target_path(path: &Path) -> Result<PathBuf> {
    let (dir, base) = split_dir_base(path)?;
    let real_dir = std::fs::canonicalize(dir)?;
    Ok(real_dir.join(base))
}

/// Splits a path into its parent directory and basename.
///
/// # Errors
///
/// Returns an error if `path` has no basename (e.g. it is `/` or `.`).
pub fn split_dir_base(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let base = path.file_name().ok_or_else(|| {
        Error::InvalidPath(format!("{} has no basename", path.display()))
    })?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    Ok((dir, base))
}

/// True iff `s` begins with `prefix` and either ends there or the next
/// character after the shared prefix is a path separator.
///
/// Guards against false matches such as `/a/bc` against prefix `/a/b`.
#[must_use]
pub fn has_prefix_path(s: &Path, prefix: &Path) -> bool {
    let s = s.as_os_str().as_encoded_bytes();
    let prefix = prefix.as_os_str().as_encoded_bytes();
    if !s.starts_with(prefix) {
        return false;
    }
    s.len() == prefix.len() || s[prefix.len()] == b'/'
}

/// Maps a path under `src_real` to its corresponding path under `dst_real`.
///
/// # Errors
///
/// Returns an error if `p` is not `src_real` itself and is not rooted under
/// it.
pub fn map_src_to_dst(src_real: &Path, dst_real: &Path, p: &Path) -> Result<PathBuf> {
    if p == src_real {
        return Ok(dst_real.to_path_buf());
    }
    if has_prefix_path(p, src_real) {
        let suffix = p
            .strip_prefix(src_real)
            .expect("has_prefix_path implies strip_prefix succeeds");
        return Ok(dst_real.join(suffix));
    }
    Err(Error::InvalidPath(format!(
        "{} is not rooted under {}",
        p.display(),
        src_real.display()
    )))
}

/// Creates the parent directory of `p` (and all missing ancestors) with
/// mode `0755`, tolerating pre-existence.
///
/// # Errors
///
/// Returns an error if directory creation fails for a reason other than
/// the directory already existing.
pub fn ensure_parent_dir(p: &Path) -> Result<()> {
    let Some(dir) = p.parent() else {
        return Ok(());
    };
    if dir.as_os_str().is_empty() || dir == Path::new(".") || dir == Path::new("/") {
        return Ok(());
    }
    mkdir_p(dir, 0o755)
}

/// Creates `dir` and all missing ancestors with the given mode, tolerating
/// pre-existence at any level.
///
/// # Errors
///
/// Returns an error if an ancestor exists but is not a directory, or if
/// directory creation fails for any other reason.
pub fn mkdir_p(dir: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(Error::InvalidPath(format!(
                "{} exists and is not a directory",
                dir.display()
            )));
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(dir)?;
    Ok(())
}

/// True iff `dir` exists, is a directory, and has no entries (ignoring
/// `.`/`..`, which `read_dir` never yields).
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub fn is_dir_empty(dir: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(dir)?;
    Ok(entries.next().is_none())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_safety() {
        assert!(!has_prefix_path(Path::new("/a/bc"), Path::new("/a/b")));
        assert!(has_prefix_path(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(has_prefix_path(Path::new("/a/b"), Path::new("/a/b")));
    }

    #[test]
    fn map_round_trips_under_src_root() {
        let src = Path::new("/src");
        let dst = Path::new("/dst");

        let mapped = map_src_to_dst(src, dst, Path::new("/src/a/b.txt")).unwrap();
        assert_eq!(mapped, Path::new("/dst/a/b.txt"));

        let mapped_root = map_src_to_dst(src, dst, Path::new("/src")).unwrap();
        assert_eq!(mapped_root, Path::new("/dst"));
    }

    #[test]
    fn map_rejects_paths_outside_src_root() {
        let src = Path::new("/src");
        let dst = Path::new("/dst");
        assert!(map_src_to_dst(src, dst, Path::new("/srcX/a")).is_err());
        assert!(map_src_to_dst(src, dst, Path::new("/other")).is_err());
    }

    #[test]
    fn split_dir_base_rejects_rootlike_paths() {
        assert!(split_dir_base(Path::new("/")).is_err());
    }

    #[test]
    fn ensure_parent_dir_creates_missing_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a/b/c.txt");
        ensure_parent_dir(&target).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn is_dir_empty_detects_emptiness() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_dir_empty(dir.path()).unwrap());
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        assert!(!is_dir_empty(dir.path()).unwrap());
    }
}
