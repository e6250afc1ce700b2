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

//! Per-pair directory mirroring engine.
//!
//! A [`worker::Worker`] mirrors one source directory tree into one target
//! directory tree: an initial recursive copy, then a live inotify-driven
//! event loop that keeps the target synchronised with the source. A
//! [`restore::restore`] call later reconstructs the source from the mirror,
//! honouring modification timestamps.
//!
//! This crate is the mirroring core only; the interactive shell and the
//! worker registry that owns `Worker` handles across the daemon's lifetime
//! live in the `vaultd` binary crate.

pub mod entry;
mod error;
pub mod path;
pub mod pending;
pub mod restore;
pub mod tree;
pub mod watch;
pub mod worker;

pub use error::{Error, Result};
pub use worker::{StopFlag, Worker, WorkerContext};
