//! The cross-process shared PID array (§5, §9): a fixed-length
//! shared-memory region of `N` signed integers, one slot per worker
//! instance, published by each worker while a build is live and cleared
//! on completion. The supervisor's signal handler reads it to deliver
//! `SIGTERM` directly to build grand-children launched under the external
//! `timeout` helper.
//!
//! This is the one module in the crate that needs `unsafe`: an
//! `mmap`-backed region accessed through [`std::sync::atomic::AtomicI32`]
//! built from a raw pointer. No locking is required — each slot has
//! exactly one writer (its owning worker) and the reader tolerates racy
//! reads (a stale PID sent a `SIGTERM` is harmless if the process has
//! already exited; callers handle `ESRCH`).
#![allow(unsafe_code)]

use memmap2::MmapMut;
use std::sync::atomic::{AtomicI32, Ordering};

/// A fixed-length array of live build PIDs, one slot per instance,
/// visible across process boundaries via a shared memory mapping.
#[derive(Debug)]
pub struct SharedPids {
    /// Kept alive for the lifetime of the mapping; dropping it unmaps the
    /// region. `None` for the in-memory (non-shared) construction used by
    /// tests and single-process callers that don't need cross-process
    /// visibility.
    _mmap: Option<MmapMut>,
    slots: *const AtomicI32,
    len: usize,
}

// SAFETY: `slots` points at a `len`-element array of `AtomicI32` for the
// whole lifetime of `SharedPids` (either backed by `_mmap`, kept alive
// alongside it, or by a heap allocation leaked for the process lifetime
// in `new_in_memory`). Concurrent access through the atomics is safe by
// construction; `SharedPids` itself carries no non-atomic mutable state.
unsafe impl Send for SharedPids {}
// SAFETY: see above; all mutation goes through `AtomicI32` operations.
unsafe impl Sync for SharedPids {}

impl SharedPids {
    /// Create a new shared mapping backed by `path`, sized for `len`
    /// instances, suitable for passing to re-exec'd worker processes by
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be created, sized, or
    /// mapped.
    pub fn create_file_backed(path: &std::path::Path, len: usize) -> std::io::Result<Self> {
        let size = len * std::mem::size_of::<AtomicI32>();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size as u64)?;
        // SAFETY: `file` is sized to exactly `size` bytes above and is kept
        // open for at least as long as the mapping (the OS retains the
        // mapping independently of the file descriptor once established).
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        for chunk in mmap.chunks_mut(std::mem::size_of::<i32>()) {
            chunk.fill(0);
        }
        let slots = mmap.as_mut_ptr().cast::<AtomicI32>();
        Ok(Self {
            _mmap: Some(mmap),
            slots,
            len,
        })
    }

    /// Open an existing shared mapping at `path`, sized for `len`
    /// instances. Used by a re-exec'd worker process to attach to the
    /// supervisor's mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot be opened or mapped.
    pub fn open_file_backed(path: &std::path::Path, len: usize) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: the supervisor created this file with `create_file_backed`
        // and sized it for exactly `len` slots before spawning this process.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let slots = mmap.as_mut_ptr().cast::<AtomicI32>();
        Ok(Self {
            _mmap: Some(mmap),
            slots,
            len,
        })
    }

    /// Create a process-local array with no shared-memory backing, for
    /// unit tests and any single-process caller.
    #[must_use]
    pub fn new_in_memory(len: usize) -> Self {
        let boxed: Box<[AtomicI32]> = (0..len).map(|_| AtomicI32::new(0)).collect();
        let slots = Box::into_raw(boxed).cast::<AtomicI32>();
        Self {
            _mmap: None,
            slots,
            len,
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` iff there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot(&self, index: usize) -> &AtomicI32 {
        assert!(index < self.len, "instance index {index} out of range");
        // SAFETY: `index < self.len` is checked above, and `slots` points
        // at a live array of at least `self.len` `AtomicI32`s for the
        // lifetime of `self`.
        unsafe { &*self.slots.add(index) }
    }

    /// Publish `pid` as the live build PID for instance `index`.
    pub fn publish(&self, index: usize, pid: i32) {
        self.slot(index).store(pid, Ordering::SeqCst);
    }

    /// Clear the live build PID for instance `index` back to 0.
    pub fn clear(&self, index: usize) {
        self.slot(index).store(0, Ordering::SeqCst);
    }

    /// Read the current PID for instance `index` (0 if no build is live).
    #[must_use]
    pub fn get(&self, index: usize) -> i32 {
        self.slot(index).load(Ordering::SeqCst)
    }

    /// Iterate over every non-zero PID currently published, for the
    /// supervisor's shutdown sweep (§5).
    pub fn live_pids(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.len).filter_map(move |i| {
            let pid = self.get(i);
            if pid != 0 { Some(pid) } else { None }
        })
    }
}

impl Drop for SharedPids {
    fn drop(&mut self) {
        if self._mmap.is_none() {
            // SAFETY: the in-memory variant leaked a `Box<[AtomicI32]>` of
            // exactly `self.len` elements from `new_in_memory`, and no
            // other owner of that allocation exists.
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(
                    self.slots.cast_mut(),
                    self.len,
                )));
            }
        }
    }
}
