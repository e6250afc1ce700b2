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

//! The per-pair mirroring worker: initial tree copy, then an inotify-driven
//! event loop that keeps the target in lockstep with the source.
//!
//! A worker owns its notifier, its watch registry and its pending-move
//! table for its whole lifetime; nothing about it is shared with any other
//! worker. Each worker runs on its own named thread, started by
//! [`Worker::spawn`] and cooperatively stopped via its [`StopFlag`].

use std::ffi::OsStr;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{bounded, Receiver};
use inotify::{EventMask, Inotify};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::entry::{self, Entry};
use crate::path;
use crate::pending::{PendingMove, PendingMoveTable};
use crate::tree;
use crate::watch::WatchMap;
use crate::{Error, Result};

/// How long one `poll` call waits for the notifier to become readable
/// before looping back to re-check the stop flag.
const POLL_TIMEOUT_MS: u16 = 100;

/// Upper bound on the number of bytes read per inotify batch.
const EVENT_BUFFER_SIZE: usize = 4096;

// ----------------------------------------------------------------------------
// Type aliases
// ----------------------------------------------------------------------------

/// The cooperative cancellation flag shared between a registry and a
/// worker. Setting it asks the worker to stop at its next poll.
pub type StopFlag = Arc<AtomicBool>;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Everything one worker needs for its whole lifetime.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Canonical, real (symlink-resolved) source root.
    pub src_real: PathBuf,
    /// Canonical, real target root.
    pub dst_real: PathBuf,
    /// Shared cooperative stop flag.
    pub stop: StopFlag,
}

/// A handle to a running (or finished) mirroring worker.
///
/// Besides the join handle, a worker carries the receiving end of a
/// one-shot completion channel: the thread sends its own result just
/// before returning, which lets a registry opportunistically reap a
/// worker that stopped on its own (e.g. root-deletion shutdown, see
/// `SPEC_FULL.md` §10.2.1) without blocking on [`Worker::join`].
pub struct Worker {
    stop: StopFlag,
    thread: JoinHandle<()>,
    done: Receiver<Result>,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

impl Worker {
    /// Spawns a worker thread that mirrors `src_real` into `dst_real`.
    ///
    /// The caller is responsible for having already canonicalised and
    /// validated both paths (not equal, target not inside source, no
    /// existing worker for the pair) — see `SPEC_FULL.md` §6.1, which
    /// assigns that validation to the shell/registry, not the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn spawn(src_real: PathBuf, dst_real: PathBuf) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            src_real,
            dst_real,
            stop: Arc::clone(&stop),
        };

        let (tx, rx) = bounded(1);
        let thread = std::thread::Builder::new()
            .name("vaultd/worker".into())
            .spawn(move || {
                let result = run(&ctx);
                let _ = tx.send(result);
            })?;

        Ok(Self { stop, thread, done: rx })
    }

    /// Requests that the worker stop at its next cooperative check point.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// True if the worker thread has finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.thread.is_finished()
    }

    /// Returns the worker's result without blocking, if it has already
    /// finished (whether asked to stop or not). Returns `None` while the
    /// worker is still running.
    pub fn try_result(&self) -> Option<Result> {
        self.done.try_recv().ok()
    }

    /// Requests a stop and blocks until the worker thread has exited,
    /// returning whatever the mirror loop returned.
    ///
    /// # Errors
    ///
    /// Returns the worker's own error if the mirror loop exited abnormally,
    /// or [`Error::Disconnected`] if the thread panicked before reporting
    /// a result.
    pub fn join(self) -> Result {
        self.request_stop();
        let result = self.done.recv().map_err(|_| Error::Disconnected);
        let _ = self.thread.join();
        result?
    }
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// The worker thread's entry point: initial copy, then the event loop.
fn run(ctx: &WorkerContext) -> Result {
    ensure_empty_dir(&ctx.dst_real)?;
    tree::copy_tree(
        &ctx.src_real,
        &ctx.dst_real,
        &ctx.src_real,
        &ctx.dst_real,
        &ctx.stop,
    )?;

    let mut inotify = Inotify::init()?;
    let mut watches = WatchMap::new();
    watches.add_watch_tree(&mut inotify, &ctx.src_real)?;

    mirror_loop(ctx, &mut inotify, &mut watches)
}

/// Creates `dir` if absent; errors if it exists and is non-empty.
fn ensure_empty_dir(dir: &Path) -> Result {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            if path::is_dir_empty(dir)? {
                Ok(())
            } else {
                Err(Error::InvalidPath(format!(
                    "{} is not empty",
                    dir.display()
                )))
            }
        }
        Ok(_) => Err(Error::InvalidPath(format!(
            "{} exists and is not a directory",
            dir.display()
        ))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            path::mkdir_p(dir, 0o755)
        }
        Err(err) => Err(err.into()),
    }
}

/// The event loop proper: expire pending moves, poll, read and dispatch.
fn mirror_loop(ctx: &WorkerContext, inotify: &mut Inotify, watches: &mut WatchMap) -> Result {
    let mut pending = PendingMoveTable::new();
    let mut buffer = [0_u8; EVENT_BUFFER_SIZE];
    let raw_fd = inotify.as_raw_fd();

    while !ctx.stop.load(Ordering::Relaxed) {
        for orphan in pending.expire() {
            reclaim(watches, inotify, &orphan)?;
        }

        if !poll_readable(raw_fd, POLL_TIMEOUT_MS)? {
            continue;
        }

        let events = match inotify.read_events(&mut buffer) {
            Ok(events) => events,
            Err(err) if would_block_or_interrupted(&err) => continue,
            Err(err) => return Err(err.into()),
        };

        for event in events {
            if ctx.stop.load(Ordering::Relaxed) {
                break;
            }
            dispatch(ctx, watches, &mut pending, inotify, &event)?;
        }
    }
    Ok(())
}

fn would_block_or_interrupted(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}

/// Polls `fd` for readability, waiting at most `timeout_ms`. Returns
/// `false` on timeout or `EINTR`, both of which simply loop back to let
/// the caller re-check the stop flag.
fn poll_readable(fd: RawFd, timeout_ms: u16) -> Result<bool> {
    // SAFETY: `fd` is the inotify instance's own descriptor, kept open by
    // the `Inotify` value for the duration of this call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(n) => Ok(n > 0),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Dispatches a single inotify event per the mirror engine's dispatch
/// table (`SPEC_FULL.md` §4.6), in the same priority order the table
/// lists: ignored, self-delete/move of the root, move-from, move-to,
/// create, close-write, delete.
fn dispatch(
    ctx: &WorkerContext,
    watches: &mut WatchMap,
    pending: &mut PendingMoveTable,
    inotify: &mut Inotify,
    event: &inotify::Event<&OsStr>,
) -> Result {
    if event.mask.contains(EventMask::IGNORED) {
        watches.remove(&event.wd);
        return Ok(());
    }

    let Some(watch_path) = watches.find(&event.wd).map(Path::to_path_buf) else {
        return Ok(());
    };
    let src_path = match event.name {
        Some(name) => watch_path.join(name),
        None => watch_path.clone(),
    };

    let self_event = event.mask.intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF);
    if self_event && src_path == ctx.src_real {
        ctx.stop.store(true, Ordering::Relaxed);
        return Ok(());
    }

    let Ok(dst_path) = path::map_src_to_dst(&ctx.src_real, &ctx.dst_real, &src_path) else {
        return Ok(());
    };
    let is_dir = event.mask.contains(EventMask::ISDIR);

    if event.mask.contains(EventMask::MOVED_FROM) {
        let mv = PendingMove {
            cookie: event.cookie,
            is_dir,
            at: Instant::now(),
            src_old: src_path,
            dst_old: dst_path,
        };
        if let Some(evicted) = pending.insert(mv) {
            reclaim(watches, inotify, &evicted)?;
        }
        return Ok(());
    }

    if event.mask.contains(EventMask::MOVED_TO) {
        if let Some(mv) = pending.take(event.cookie) {
            path::ensure_parent_dir(&dst_path)?;
            std::fs::rename(&mv.dst_old, &dst_path)?;
            if mv.is_dir {
                watches.update_prefix(&mv.src_old, &src_path);
            }
        } else {
            create_or_mirror(ctx, watches, inotify, &src_path, &dst_path, is_dir)?;
        }
        return Ok(());
    }

    if event.mask.contains(EventMask::CREATE) {
        if is_dir {
            create_or_mirror(ctx, watches, inotify, &src_path, &dst_path, true)?;
        } else if matches!(entry::of_if_exists(&src_path)?, Some(Entry::Lnk)) {
            mirror_create_or_update(ctx, &src_path, &dst_path)?;
        }
        return Ok(());
    }

    if event.mask.contains(EventMask::CLOSE_WRITE) && !is_dir {
        mirror_create_or_update(ctx, &src_path, &dst_path)?;
        return Ok(());
    }

    if event.mask.contains(EventMask::DELETE) {
        tree::rm_tree(&dst_path)?;
        if is_dir {
            watches.remove_subtree(inotify, &src_path);
        }
    }

    Ok(())
}

/// Handles a directory appearing at `src_path`/`dst_path`: mirrors the
/// directory itself, starts watching it and its descendants, then copies
/// any children that raced ahead of watch registration.
fn create_or_mirror(
    ctx: &WorkerContext,
    watches: &mut WatchMap,
    inotify: &mut Inotify,
    src_path: &Path,
    dst_path: &Path,
    is_dir: bool,
) -> Result {
    if is_dir {
        mirror_create_or_update(ctx, src_path, dst_path)?;
        watches.add_watch_tree(inotify, src_path)?;
        tree::copy_tree(src_path, dst_path, &ctx.src_real, &ctx.dst_real, &ctx.stop)?;
    } else {
        mirror_create_or_update(ctx, src_path, dst_path)?;
    }
    Ok(())
}

/// `mirror_create_or_update`: classifies the live source entry and
/// replicates it at the target, creating the parent directory first.
fn mirror_create_or_update(ctx: &WorkerContext, src_path: &Path, dst_path: &Path) -> Result {
    let Some(entry) = entry::of_if_exists(src_path)? else {
        return Ok(());
    };
    path::ensure_parent_dir(dst_path)?;
    match entry {
        Entry::Dir(mode) => path::mkdir_p(dst_path, mode)?,
        Entry::Reg(mode) => tree::copy_file(src_path, dst_path, mode, &ctx.stop)?,
        Entry::Lnk => {
            tree::copy_symlink_rewrite(src_path, dst_path, &ctx.src_real, &ctx.dst_real)?;
        }
        Entry::Other => {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %src_path.display(), "skipping unsupported entry type");
        }
    }
    Ok(())
}

/// Reclaims an orphaned pending move, whether it arrived here via the 1 s
/// expiry sweep or via eviction on table overflow: deletes the mirror's
/// stale copy and, for a directory, detaches its watched subtree.
fn reclaim(watches: &mut WatchMap, inotify: &mut Inotify, mv: &PendingMove) -> Result {
    tree::rm_tree(&mv.dst_old)?;
    if mv.is_dir {
        watches.remove_subtree(inotify, &mv.src_old);
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn create_then_write_is_mirrored() {
        let src = tempfile::tempdir().unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        let worker = Worker::spawn(src.path().to_path_buf(), dst.clone()).unwrap();

        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();

        let mirrored = dst.join("a.txt");
        assert!(wait_for(
            || std::fs::read(&mirrored).ok().as_deref() == Some(b"hello".as_slice()),
            Duration::from_secs(5)
        ));

        worker.join().unwrap();
    }

    #[test]
    fn root_deletion_stops_the_worker() {
        let src = tempfile::tempdir().unwrap();
        let src_path = src.path().to_path_buf();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        let worker = Worker::spawn(src_path.clone(), dst).unwrap();
        drop(src); // removes the source directory

        assert!(wait_for(|| worker.is_terminated(), Duration::from_secs(5)));
    }

    #[test]
    fn intra_directory_rename_is_mirrored_as_a_rename() {
        let src = tempfile::tempdir().unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        let worker = Worker::spawn(src.path().to_path_buf(), dst.clone()).unwrap();

        // Wait for the initial copy to land before racing the rename in.
        assert!(wait_for(|| dst.join("a.txt").exists(), Duration::from_secs(5)));
        std::fs::rename(src.path().join("a.txt"), src.path().join("b.txt")).unwrap();

        assert!(wait_for(
            || dst.join("b.txt").exists() && !dst.join("a.txt").exists(),
            Duration::from_secs(5)
        ));
        assert_eq!(std::fs::read(dst.join("b.txt")).unwrap(), b"hello");

        worker.join().unwrap();
    }

    #[test]
    fn cross_directory_subtree_move_relocates_the_mirror_and_keeps_watching_it() {
        let src = tempfile::tempdir().unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        std::fs::create_dir(src.path().join("x")).unwrap();
        std::fs::write(src.path().join("x/a.txt"), b"one").unwrap();
        let worker = Worker::spawn(src.path().to_path_buf(), dst.clone()).unwrap();

        assert!(wait_for(
            || dst.join("x/a.txt").exists(),
            Duration::from_secs(5)
        ));
        std::fs::rename(src.path().join("x"), src.path().join("y")).unwrap();

        assert!(wait_for(
            || dst.join("y/a.txt").exists() && !dst.join("x").exists(),
            Duration::from_secs(5)
        ));

        // The moved subtree must still be watched under its new path: a
        // creation inside it should keep mirroring.
        std::fs::write(src.path().join("y/d.txt"), b"two").unwrap();
        assert!(wait_for(
            || std::fs::read(dst.join("y/d.txt")).ok().as_deref() == Some(b"two".as_slice()),
            Duration::from_secs(5)
        ));

        worker.join().unwrap();
    }

    #[test]
    fn symlink_creation_is_mirrored_with_rewrite() {
        let src = tempfile::tempdir().unwrap();
        let dst_parent = tempfile::tempdir().unwrap();
        let dst = dst_parent.path().join("mirror");

        std::fs::write(src.path().join("a.txt"), b"hello").unwrap();
        let worker = Worker::spawn(src.path().to_path_buf(), dst.clone()).unwrap();
        assert!(wait_for(|| dst.join("a.txt").exists(), Duration::from_secs(5)));

        std::os::unix::fs::symlink(src.path().join("a.txt"), src.path().join("link")).unwrap();

        let mirrored_link = dst.join("link");
        assert!(wait_for(|| mirrored_link.symlink_metadata().is_ok(), Duration::from_secs(5)));
        assert_eq!(
            std::fs::read_link(&mirrored_link).unwrap(),
            dst.join("a.txt")
        );

        worker.join().unwrap();
    }
}
