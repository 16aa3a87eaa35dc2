//! Allocator wrapper: sized allocation, a used-bytes counter,
//! usable-size queries, and an installable OOM policy.
//!
//! Every byte-exact blob in this workspace (sds, ziplist, listpack, intset)
//! goes through an `Allocator` instead of calling `Vec::with_capacity`
//! directly, so memory accounting stays centralized: all heap traffic
//! routes through the allocator wrapper. The real
//! allocation is still done by `Vec<u8>` / the global Rust allocator; this
//! wrapper adds the counter, the rounding convention, and the OOM policy on
//! top, the same division of labor `kvengine_base::Error` draws between
//! "a thing that really does the work" (`DynBacktraceError`) and "the
//! bookkeeping wrapper we want everywhere" (`Error`).

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, trace};

const WORD: usize = 8;

fn round_up_to_word(n: usize) -> usize {
    (n + (WORD - 1)) & !(WORD - 1)
}

/// Pluggable out-of-memory policy: non-try calls invoke a user-installable
/// OOM handler, typically logging and aborting the process; try-variants
/// return null instead.
pub trait OomHandler: Send + Sync {
    fn handle(&self, requested: usize) -> !;
}

pub struct AbortingOomHandler;
impl OomHandler for AbortingOomHandler {
    fn handle(&self, requested: usize) -> ! {
        error!(target: "kvengine", requested, "allocator out of memory, aborting");
        std::process::abort();
    }
}

/// A `(buffer, usable_size)` pair, returned by the `*_usable` variants so
/// callers can exploit allocator slack without asking again.
pub struct Usable {
    pub buf: Vec<u8>,
    pub usable: usize,
}

pub struct Allocator {
    used_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    oom: Box<dyn OomHandler>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    pub fn new() -> Self {
        Allocator {
            used_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            oom: Box::new(AbortingOomHandler),
        }
    }

    pub fn with_oom_handler(oom: Box<dyn OomHandler>) -> Self {
        Allocator {
            used_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            oom,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    fn note_grow(&self, added: usize) {
        let used = self.used_bytes.fetch_add(added, Ordering::Relaxed) + added;
        self.peak_bytes.fetch_max(used, Ordering::Relaxed);
    }

    fn note_shrink(&self, removed: usize) {
        self.used_bytes.fetch_sub(removed, Ordering::Relaxed);
    }

    /// Allocate a zero-filled buffer of exactly `size` bytes (capacity may
    /// be larger; see `usable_size`). Aborts via the OOM handler on failure.
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        match self.try_alloc(size) {
            Some(buf) => buf,
            None => self.oom.handle(size),
        }
    }

    pub fn try_alloc(&self, size: usize) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        self.note_grow(round_up_to_word(buf.capacity()));
        trace!(target: "kvengine", size, "allocator alloc");
        Some(buf)
    }

    pub fn alloc_usable(&self, size: usize) -> Usable {
        let buf = self.alloc(size);
        let usable = buf.capacity();
        Usable { buf, usable }
    }

    /// Resize `buf` to `new_size` bytes, preserving existing content.
    /// Aborts via the OOM handler on failure.
    pub fn realloc(&self, buf: Vec<u8>, new_size: usize) -> Vec<u8> {
        match self.try_realloc(buf, new_size) {
            Ok(buf) => buf,
            Err((_buf, requested)) => self.oom.handle(requested),
        }
    }

    /// On failure, returns the original buffer untouched so the caller
    /// doesn't lose data (unlike `realloc`, which is allowed to abort).
    pub fn try_realloc(&self, mut buf: Vec<u8>, new_size: usize) -> Result<Vec<u8>, (Vec<u8>, usize)> {
        let old_cap = round_up_to_word(buf.capacity());
        if new_size <= buf.capacity() {
            buf.resize(new_size, 0);
            return Ok(buf);
        }
        let additional = new_size - buf.len();
        if buf.try_reserve_exact(additional).is_err() {
            return Err((buf, new_size));
        }
        buf.resize(new_size, 0);
        let new_cap = round_up_to_word(buf.capacity());
        if new_cap > old_cap {
            self.note_grow(new_cap - old_cap);
        } else if new_cap < old_cap {
            self.note_shrink(old_cap - new_cap);
        }
        trace!(target: "kvengine", new_size, "allocator realloc");
        Ok(buf)
    }

    /// Grow `buf`'s capacity to at least `target_cap` without touching its
    /// logical length (`buf.len()`), the way `sds`'s `make_room_for`
    /// reserves ahead of an append. No-op if capacity is already enough.
    pub fn reserve(&self, buf: &mut Vec<u8>, target_cap: usize) {
        if self.try_reserve(buf, target_cap).is_err() {
            self.oom.handle(target_cap);
        }
    }

    pub fn try_reserve(&self, buf: &mut Vec<u8>, target_cap: usize) -> Result<(), ()> {
        if buf.capacity() >= target_cap {
            return Ok(());
        }
        let old_cap = round_up_to_word(buf.capacity());
        let additional = target_cap - buf.len();
        buf.try_reserve_exact(additional).map_err(|_| ())?;
        let new_cap = round_up_to_word(buf.capacity());
        if new_cap > old_cap {
            self.note_grow(new_cap - old_cap);
        }
        trace!(target: "kvengine", target_cap, "allocator reserve");
        Ok(())
    }

    pub fn realloc_usable(&self, buf: Vec<u8>, new_size: usize) -> Usable {
        let buf = self.realloc(buf, new_size);
        let usable = buf.capacity();
        Usable { buf, usable }
    }

    /// Release a buffer previously returned by this allocator.
    pub fn free(&self, buf: Vec<u8>) {
        let cap = round_up_to_word(buf.capacity());
        drop(buf);
        self.note_shrink(cap);
        trace!(target: "kvengine", cap, "allocator free");
    }

    /// The real usable size of a buffer (its current capacity) — callers
    /// can write up to this many bytes without triggering a reallocation.
    pub fn usable_size(&self, buf: &[u8]) -> usize {
        // `buf` here is a borrowed view; real capacity tracking lives with
        // whoever owns the `Vec`, so this reports the slice length as a
        // floor. Prefer `Usable::usable` when you have the owning `Vec`.
        buf.len()
    }
}
