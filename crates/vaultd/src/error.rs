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

//! Binary-level error, composing the mirroring engine's error with the
//! shell's parse errors and the registry's own path/lookup failures.

use std::{io, result};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Enums
// ----------------------------------------------------------------------------

/// Top-level daemon error.
#[derive(Debug, Error)]
pub enum Error {
    /// Mirroring or restore engine error.
    #[error(transparent)]
    Core(#[from] vaultd_core::Error),

    /// I/O error outside the engine (e.g. reading a line of input).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A command line could not be tokenised.
    #[error("parse error: {0}")]
    Parse(String),

    /// `add`: the target is inside or equal to the source.
    #[error("target {target} is inside or equal to source {source}")]
    TargetInsideSource {
        /// The offending source path.
        source: String,
        /// The offending target path.
        target: String,
    },

    /// `add`: a worker for this (source, target) pair already exists.
    #[error("a worker for {0} -> {1} already exists")]
    PairExists(String, String),

    /// `add`: the target exists and is non-empty.
    #[error("target {0} exists and is not empty")]
    TargetNotEmpty(String),

    /// `end`/`restore`: no record matches the given (source, target) pair.
    #[error("no backup for {0} -> {1}")]
    NoSuchPair(String, String),
}

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// Top-level daemon result.
pub type Result<T = ()> = result::Result<T, Error>;
