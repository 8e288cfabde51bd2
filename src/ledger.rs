//! The metadata pool: a growable flat array of chunk descriptors,
//! addressed by index.  All descriptor access goes through here so the
//! base address is re-read on every use; the pool may relocate
//! whenever it grows.
//!
//! Two traversals are offered.  `scan` walks the flat array with
//! trylock and skips contended slots; it is used to hunt for vacant
//! slots and by the background overflow scanner.  `walk` follows the
//! spatial linked list under hand-over-hand locking and is the only
//! traversal allowed to inspect or mutate neighbouring chunks.
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::descriptor::{ChunkStatus, DescIndex, Descriptor, DESCRIPTOR_STRIDE, NIL};
use crate::fault;
use crate::journal::note;
use crate::map;
use crate::mapper;
use crate::pool;

/// The spatial list head.  Coalescing only ever absorbs a successor,
/// so the first descriptor is the head for the life of the process.
pub(crate) const ROOT: DescIndex = 0;

static META_BASE: AtomicUsize = AtomicUsize::new(0);
static META_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Number of descriptor slots currently visible.
#[inline]
pub(crate) fn capacity() -> DescIndex {
    (META_SIZE.load(Ordering::Acquire) / DESCRIPTOR_STRIDE) as DescIndex
}

/// Address of slot `index`.  Computed fresh from the pool base on
/// every call; never hold the result across anything that can extend
/// either pool.
#[inline]
pub(crate) fn descriptor(index: DescIndex) -> *mut Descriptor {
    let base = META_BASE.load(Ordering::Acquire);
    debug_assert!(base != 0, "metadata pool is initialised");
    debug_assert!(index < capacity(), "descriptor index in bounds");

    (base + index as usize * DESCRIPTOR_STRIDE) as *mut Descriptor
}

/// Blocking-locks slot `index`.  The guard is leaked on purpose: the
/// memory a guard would borrow can relocate while the lock is held, so
/// lock lifetimes are managed by index instead.
pub(crate) fn lock(index: DescIndex) {
    let guard = unsafe { &(*descriptor(index)).lock }.lock();
    mem::forget(guard);
}

/// Attempts to lock slot `index` without blocking.  Contention is the
/// only way this fails.
pub(crate) fn try_lock(index: DescIndex) -> bool {
    match unsafe { &(*descriptor(index)).lock }.try_lock() {
        Some(guard) => {
            mem::forget(guard);
            true
        }
        None => false,
    }
}

/// Releases one level of slot `index`'s reentrant lock.
pub(crate) fn unlock(index: DescIndex) {
    unsafe { (*descriptor(index)).lock.force_unlock() };
}

/// Maps the initial one-page pool and installs the head descriptor
/// covering the whole (one-page) data pool.  Called exactly once, from
/// the heap's init guard, after the data pool exists.
pub(crate) fn init() {
    let page = map::page_size();
    let base = mapper::get_default_mapper()
        .reserve(0, page)
        .unwrap_or_else(|err| fault::die_errno("mmap of the metadata pool failed", err));
    let base = base.as_ptr() as usize;

    let slots = page / DESCRIPTOR_STRIDE;
    for slot in 0..slots {
        let spot = (base + slot * DESCRIPTOR_STRIDE) as *mut Descriptor;
        unsafe { spot.write(Descriptor::vacant()) };
    }

    {
        let head = unsafe { &mut *(base as *mut Descriptor) };
        head.offset = 0;
        head.size = pool::size() - crate::descriptor::CANARY_WIDTH;
        head.status = ChunkStatus::Free;
    }

    META_BASE.store(base, Ordering::Release);
    META_SIZE.store(page, Ordering::Release);
    note!("metadata pool mapped at {:#x} ({} slots)", base, slots);
}

/// Grows the pool by one page and initialises the freshly visible
/// slots to vacant before publishing them.
fn extend() {
    let page = map::page_size();
    let old_base = META_BASE.load(Ordering::Acquire);
    let old_size = META_SIZE.load(Ordering::Acquire);

    let moved = mapper::get_default_mapper()
        .extend(
            std::ptr::NonNull::new(old_base as *mut std::ffi::c_void)
                .expect("metadata pool is initialised"),
            old_size,
            page,
        )
        .unwrap_or_else(|err| fault::die_errno("mremap of the metadata pool failed", err));
    let new_base = moved.as_ptr() as usize;

    if new_base != old_base {
        note!("metadata pool relocated to {:#x} while growing", new_base);
    }

    let old_slots = old_size / DESCRIPTOR_STRIDE;
    let new_slots = (old_size + page) / DESCRIPTOR_STRIDE;
    for slot in old_slots..new_slots {
        let spot = (new_base + slot * DESCRIPTOR_STRIDE) as *mut Descriptor;
        unsafe { spot.write(Descriptor::vacant()) };
    }

    META_BASE.store(new_base, Ordering::Release);
    META_SIZE.store(old_size + page, Ordering::Release);
    note!("metadata pool grown to {} slots", new_slots);
}

/// Unmaps the pool.  Shutdown only.
pub(crate) fn release() {
    let base = META_BASE.load(Ordering::Acquire);
    if base == 0 {
        return;
    }

    META_BASE.store(0, Ordering::Release);
    let bytes = META_SIZE.swap(0, Ordering::AcqRel);

    let ptr = std::ptr::NonNull::new(base as *mut std::ffi::c_void).expect("base was non-zero");
    mapper::get_default_mapper()
        .release(ptr, bytes)
        .unwrap_or_else(|err| fault::die_errno("munmap of the metadata pool failed", err));
}

/// Trylock scan of the flat array from `start`.  Returns the first
/// slot for which `predicate` holds, still locked; the caller owns the
/// unlock.  Contended slots are skipped: every caller either retries
/// naturally or re-sweeps on its own schedule.
pub(crate) fn scan(
    start: DescIndex,
    mut predicate: impl FnMut(DescIndex, &mut Descriptor) -> bool,
) -> Option<DescIndex> {
    let mut index = start;
    while index < capacity() {
        if try_lock(index) {
            let hit = predicate(index, unsafe { &mut *descriptor(index) });
            if hit {
                return Some(index);
            }
            unlock(index);
        }
        index += 1;
    }

    None
}

/// Hand-over-hand traversal of the spatial list from the head: the
/// current descriptor's lock is taken while the previous one is still
/// held, so the list can never shift underneath the walker.  `visit`
/// runs under the current descriptor's lock and may mutate it (the
/// successor link is re-read after each visit).
///
/// With `return_on_match`, traversal stops at the first visit that
/// returns true; the matching descriptor stays locked unless
/// `unlock_before_return` is set.
pub(crate) fn walk(
    mut visit: impl FnMut(DescIndex, &mut Descriptor) -> bool,
    return_on_match: bool,
    unlock_before_return: bool,
) -> Option<DescIndex> {
    lock(ROOT);
    if visit(ROOT, unsafe { &mut *descriptor(ROOT) }) && return_on_match {
        if unlock_before_return {
            unlock(ROOT);
        }
        return Some(ROOT);
    }

    let mut prev = ROOT;
    let mut curr = unsafe { &*descriptor(prev) }.next_index();

    while let Some(index) = curr {
        lock(index);
        if visit(index, unsafe { &mut *descriptor(index) }) && return_on_match {
            if unlock_before_return {
                unlock(index);
            }
            unlock(prev);
            return Some(index);
        }

        unlock(prev);
        prev = index;
        curr = unsafe { &*descriptor(prev) }.next_index();
    }

    unlock(prev);
    None
}

/// Claims a vacant slot and splices it into the spatial list right
/// after `prev`, whose lock the caller must hold.  Returns the claimed
/// slot, locked.  Extends the pool when no vacant slot can be grabbed.
pub(crate) fn claim_unused(prev: DescIndex) -> DescIndex {
    let claimed = loop {
        if let Some(index) = scan(0, |_, d| d.status == ChunkStatus::Unused) {
            break index;
        }

        note!("no vacant descriptor slot; growing the metadata pool");
        extend();
    };

    let after = unsafe { &*descriptor(prev) }.next;
    {
        let d = unsafe { &mut *descriptor(claimed) };
        d.prev = prev;
        d.next = after;
    }
    if after != NIL {
        // In-order acquisition: `after` sits later in the list than
        // `prev`, whose lock we already hold.
        lock(after);
        unsafe { &mut *descriptor(after) }.prev = claimed;
        unlock(after);
    }
    unsafe { &mut *descriptor(prev) }.next = claimed;

    claimed
}
