// Copyright (c) Zensical LLC <https://zensical.org>

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under CLA

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

//! Interactive directory backup daemon.
//!
//! Parses a handful of startup flags, installs logging, wires `SIGINT`/
//! `SIGTERM` into a shared flag, then runs the command shell on standard
//! input until `exit` is issued, input is exhausted, or that flag is
//! observed set.

mod cli;
mod error;
mod logging;
mod registry;
mod shell;

use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use cli::Cli;
use error::Result;
use registry::Registry;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "vaultd exited with an error");
            ExitCode::FAILURE
        }
    }
}

/// Installs the process-level signal handlers, then runs the shell to
/// completion.
fn run() -> Result {
    let mut registry = Registry::new();

    // A SIGINT/SIGTERM only needs to stand in for an `exit` typed at the
    // prompt: set a flag, and the REPL's own blocking read on stdin (which
    // a signal interrupts with EINTR, since `signal_hook::flag::register`
    // installs the handler without `SA_RESTART`) checks it before retrying,
    // driving the shutdown through the same path `exit` does.
    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&terminate))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&terminate))?;

    let stdin = io::stdin();
    let result = shell::run(&mut registry, stdin.lock(), io::stdout(), &terminate);

    if terminate.load(Ordering::Relaxed) {
        tracing::info!("received termination signal, shutting down");
    }
    result
}
