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

//! Filesystem entry kind, as seen by `lstat`.
//!
//! Copy, delete and restore all dispatch on the same four-way split between
//! directories, regular files, symlinks and everything else (sockets, fifos,
//! device nodes). Building the tag once from a single `symlink_metadata` call
//! and matching on it downstream avoids re-statting the same path in each
//! consumer.

use std::fs::Metadata;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use crate::Result;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// The kind of a filesystem entry, tagged with the permission bits that
/// matter for directories and regular files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// A directory, with its lower nine permission bits.
    Dir(u32),
    /// A regular file, with its lower nine permission bits.
    Reg(u32),
    /// A symbolic link.
    Lnk,
    /// Anything else (socket, fifo, device node, ...).
    Other,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Entry {
    /// Classifies a path without following a trailing symlink.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be `lstat`-ed, e.g. because an
    /// intermediate component was removed concurrently.
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Classifies an already-fetched `lstat`-equivalent result.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mode = metadata.permissions().mode() & 0o777;
        if metadata.is_dir() {
            Entry::Dir(mode)
        } else if metadata.file_type().is_symlink() {
            Entry::Lnk
        } else if metadata.is_file() {
            Entry::Reg(mode)
        } else {
            Entry::Other
        }
    }

    /// True if this and `other` name the same broad kind (directory, regular
    /// file or symlink), ignoring permission bits.
    #[must_use]
    pub fn same_kind(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Entry::Dir(_), Entry::Dir(_))
                | (Entry::Reg(_), Entry::Reg(_))
                | (Entry::Lnk, Entry::Lnk)
                | (Entry::Other, Entry::Other)
        )
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Classifies a path the same way [`Entry::of`] does, returning `None` if
/// the path does not exist rather than an error.
///
/// # Errors
///
/// Returns an error for failures other than the path being absent.
pub fn of_if_exists(path: &Path) -> Result<Option<Entry>> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(Entry::from_metadata(&metadata))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_path_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(of_if_exists(&missing).unwrap(), None);
    }

    #[test]
    fn classifies_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hi").unwrap();

        assert!(matches!(Entry::of(dir.path()).unwrap(), Entry::Dir(_)));
        assert!(matches!(Entry::of(&file).unwrap(), Entry::Reg(_)));
    }

    #[test]
    fn same_kind_ignores_permission_bits() {
        assert!(Entry::Dir(0o755).same_kind(Entry::Dir(0o700)));
        assert!(!Entry::Dir(0o755).same_kind(Entry::Reg(0o755)));
    }
}
