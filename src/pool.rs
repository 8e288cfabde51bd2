//! The data pool: the only region whose addresses are ever exposed to
//! callers.  A single contiguous anonymous mapping, one page at first,
//! grown by the carver when the tail chunk cannot satisfy a request.
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::fault;
use crate::journal::note;
use crate::map;
use crate::mapper;

/// Page count of the original's fixed placement hint for the data
/// pool, kept as a non-binding wish.
const HINT_PAGES: usize = 1_500_000;

static DATA_BASE: AtomicUsize = AtomicUsize::new(0);
static DATA_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Base address of the data pool.  Must be re-read after any call that
/// can extend the pool; never cache the result across one.
#[inline]
pub(crate) fn base() -> usize {
    DATA_BASE.load(Ordering::Acquire)
}

/// Current size of the data pool in bytes.
#[inline]
pub(crate) fn size() -> usize {
    DATA_SIZE.load(Ordering::Acquire)
}

/// Maps the initial one-page pool.  Called exactly once, from the
/// heap's init guard.
pub(crate) fn init() {
    let page = map::page_size();
    let hint = page.wrapping_mul(HINT_PAGES);

    let base = mapper::get_default_mapper()
        .reserve(hint, page)
        .unwrap_or_else(|err| fault::die_errno("mmap of the data pool failed", err));

    DATA_BASE.store(base.as_ptr() as usize, Ordering::Release);
    DATA_SIZE.store(page, Ordering::Release);
    note!("data pool mapped at {:#x}", base.as_ptr() as usize);
}

/// Grows the pool by `delta` bytes (a page multiple).  The mapping may
/// relocate; every address derived from the old base is invalid after
/// this returns.  The caller must hold the tail descriptor's lock and
/// is responsible for growing the tail chunk over the fresh bytes.
pub(crate) fn extend(delta: usize) {
    let old_base = NonNull::new(base() as *mut c_void).expect("data pool is initialised");
    let old_size = size();

    let moved = mapper::get_default_mapper()
        .extend(old_base, old_size, delta)
        .unwrap_or_else(|err| fault::die_errno("mremap of the data pool failed", err));

    if moved.as_ptr() as usize != old_base.as_ptr() as usize {
        note!(
            "data pool relocated to {:#x} while growing",
            moved.as_ptr() as usize
        );
    }

    DATA_BASE.store(moved.as_ptr() as usize, Ordering::Release);
    DATA_SIZE.store(old_size + delta, Ordering::Release);
    note!("data pool grown to {} bytes", old_size + delta);
}

/// Unmaps the pool.  Shutdown only.
pub(crate) fn release() {
    let current = base();
    if current == 0 {
        return;
    }

    DATA_BASE.store(0, Ordering::Release);
    let bytes = DATA_SIZE.swap(0, Ordering::AcqRel);

    let ptr = NonNull::new(current as *mut c_void).expect("base was non-zero");
    mapper::get_default_mapper()
        .release(ptr, bytes)
        .unwrap_or_else(|err| fault::die_errno("munmap of the data pool failed", err));
}
