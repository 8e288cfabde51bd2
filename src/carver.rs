//! The chunk engine: every placement decision lives here.  First-fit
//! search over the spatial list, chunk splitting, forward coalescing,
//! and tail extension when the data pool runs dry.
//!
//! Lock discipline: locks are always taken in spatial-list order, and
//! no path holds more than three consecutive descriptors (current,
//! next, next-next).  Any call that can extend a pool invalidates
//! every previously derived address, so addresses are recomputed from
//! the pool base after each such call.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use crate::descriptor::{ChunkStatus, DescIndex, CANARY_WIDTH, NIL};
use crate::fault;
use crate::journal::{alert, note};
use crate::ledger;
use crate::map;
use crate::pool;
use crate::sentinel;

/// Address of the first user byte of the chunk at `index`.  Only
/// valid until the next potential pool extension.
#[inline]
fn chunk_addr(index: DescIndex) -> usize {
    pool::base() + unsafe { &*ledger::descriptor(index) }.offset
}

/// Grows the data pool by `delta` bytes and hands the fresh bytes to
/// the tail descriptor `tail`, whose lock the caller holds.  `tail` is
/// either the current tail chunk (its size grows by `delta`) or a
/// freshly claimed vacant slot already spliced in as the list tail
/// (it becomes a FREE chunk starting at the old end of the pool).
fn extend_data_pool(tail: DescIndex, delta: usize) {
    let old_pool_size = pool::size();

    pool::extend(delta);

    let end = {
        let d = unsafe { &mut *ledger::descriptor(tail) };
        if d.status == ChunkStatus::Unused {
            d.status = ChunkStatus::Free;
            d.offset = old_pool_size;
            d.size = delta - CANARY_WIDTH;
        } else {
            d.size += delta;
        }

        note!("tail chunk now spans {} bytes", d.size);
        pool::base() + d.offset + d.size
    };

    sentinel::plant(end);
}

/// Makes the data pool able to satisfy a `want`-byte request: locates
/// the tail descriptor (claiming a fresh one when the tail chunk is
/// BUSY) and grows the pool by enough whole pages.
fn grow_tail(want: usize) {
    let delta = map::round_up_to_page(want + CANARY_WIDTH);

    let last = ledger::walk(|_, d| d.is_tail(), true, false)
        .expect("the spatial list always has a tail");

    let tail = if unsafe { &*ledger::descriptor(last) }.status == ChunkStatus::Busy {
        let fresh = ledger::claim_unused(last);
        ledger::unlock(last);
        fresh
    } else {
        last
    };

    extend_data_pool(tail, delta);
    ledger::unlock(tail);
}

/// First-fit search for a FREE chunk of at least `want` bytes,
/// growing the data pool until one exists.  Returns the chosen
/// descriptor, locked.
fn find_free(want: usize) -> DescIndex {
    loop {
        let found = ledger::walk(
            |_, d| d.status == ChunkStatus::Free && d.size >= want,
            true,
            false,
        );

        if let Some(index) = found {
            return index;
        }

        // Another thread may steal the fresh space before we re-walk;
        // the loop just grows again.
        note!("no free chunk of {} bytes; growing the data pool", want);
        grow_tail(want);
    }
}

/// Split policy.  The caller holds `index`'s lock and guarantees the
/// chunk spans at least `want` bytes.  When the chunk has room for a
/// canary plus at least one byte of successor payload, the surplus is
/// carved off into a fresh FREE descriptor placed right after `index`
/// in the spatial list.  A tail chunk too tight to split absorbs one
/// more page first, so the surplus is never stranded.  Otherwise the
/// chunk keeps up to one canary width of slack.
///
/// Marks the chunk BUSY and plants its trailing canary.  Returns the
/// carved-off descriptor, if a split happened.
#[requires(want > 0)]
#[requires(unsafe { &*ledger::descriptor(index) }.size >= want,
           "the chosen chunk spans the request")]
#[ensures(unsafe { &*ledger::descriptor(index) }.status == ChunkStatus::Busy,
          "the chunk leaves carve owned")]
#[ensures(unsafe { &*ledger::descriptor(index) }.size >= want
          && unsafe { &*ledger::descriptor(index) }.size <= want + CANARY_WIDTH,
          "a split leaves exactly the request; otherwise at most one canary of slack")]
pub(crate) fn carve(index: DescIndex, want: usize) -> Option<DescIndex> {
    let have = unsafe { &*ledger::descriptor(index) }.size;

    let rest = if have > want + CANARY_WIDTH {
        Some(ledger::claim_unused(index))
    } else if unsafe { &*ledger::descriptor(index) }.is_tail() {
        extend_data_pool(index, map::page_size());
        Some(ledger::claim_unused(index))
    } else {
        None
    };

    if let Some(rest) = rest {
        let have_now = unsafe { &*ledger::descriptor(index) }.size;
        let surplus_offset = unsafe { &*ledger::descriptor(index) }.offset + want + CANARY_WIDTH;

        let end = {
            let d = unsafe { &mut *ledger::descriptor(rest) };
            d.status = ChunkStatus::Free;
            d.offset = surplus_offset;
            d.size = have_now - want - CANARY_WIDTH;
            pool::base() + d.offset + d.size
        };
        sentinel::plant(end);
        ledger::unlock(rest);

        unsafe { &mut *ledger::descriptor(index) }.size = want;
    }

    let end = {
        let d = unsafe { &mut *ledger::descriptor(index) };
        d.status = ChunkStatus::Busy;
        pool::base() + d.offset + d.size
    };
    sentinel::plant(end);

    rest
}

/// Allocates a chunk of exactly `want` user bytes (plus trailing
/// canary).  Infallible: mapping failures are fatal by policy.
#[requires(want > 0, "zero-size requests are rejected at the API layer")]
#[ensures(!ret.as_ptr().is_null(), "chunk addresses are never NULL")]
pub(crate) fn allocate(want: usize) -> NonNull<c_void> {
    let index = find_free(want);
    carve(index, want);

    let addr = chunk_addr(index);
    ledger::unlock(index);
    note!("allocated {} bytes at {:#x}", want, addr);

    NonNull::new(addr as *mut c_void).expect("data pool addresses are never null")
}

/// Absorbs every FREE chunk immediately after `index` (also FREE,
/// lock held, passed as `d`) into it.  Holds at most `index`, its
/// next, and its next-next, acquired in list order.
fn forward_merge(index: DescIndex, d: &mut crate::descriptor::Descriptor) {
    loop {
        let next = match d.next_index() {
            Some(next) => next,
            None => break,
        };

        ledger::lock(next);
        let (next_free, next_size, after) = {
            let n = unsafe { &*ledger::descriptor(next) };
            (n.status == ChunkStatus::Free, n.size, n.next)
        };

        if !next_free {
            ledger::unlock(next);
            break;
        }

        if after != NIL {
            ledger::lock(after);
        }

        d.size += CANARY_WIDTH + next_size;
        d.next = after;
        sentinel::plant(pool::base() + d.offset + d.size);

        if after != NIL {
            unsafe { &mut *ledger::descriptor(after) }.prev = index;
            ledger::unlock(after);
        }

        unsafe { &mut *ledger::descriptor(next) }.clear();
        ledger::unlock(next);

        note!(
            "coalesced chunk at offset {:#x}; now {} bytes",
            d.offset,
            d.size
        );
    }
}

/// Whole-list coalescing sweep: every FREE chunk absorbs its FREE
/// successors.  Run after each free so adjacent free space always
/// unifies eventually.
fn sweep() {
    ledger::walk(
        |index, d| {
            if d.status == ChunkStatus::Free {
                forward_merge(index, d);
            }
            false
        },
        false,
        true,
    );
}

/// Releases the chunk at `target`.  Returns false when no live chunk
/// starts there or the chunk is already FREE; the caller decides how
/// to report the misuse.  A corrupted canary is fatal here.
#[requires(!target.is_null(), "null frees are filtered at the API layer")]
pub(crate) fn clean(target: *mut c_void) -> bool {
    let target = target as usize;

    let index = match ledger::walk(|_, d| pool::base() + d.offset == target, true, false) {
        Some(index) => index,
        None => return false,
    };

    let (addr, size, descriptor_addr, already_free, intact) = {
        let d = unsafe { &*ledger::descriptor(index) };
        (
            pool::base() + d.offset,
            d.size,
            ledger::descriptor(index) as usize,
            d.status == ChunkStatus::Free,
            sentinel::verify(d),
        )
    };

    if already_free {
        ledger::unlock(index);
        return false;
    }

    if !intact {
        ledger::unlock(index);
        sentinel::die_overflow(addr, descriptor_addr);
    }

    unsafe { ptr::write_bytes(addr as *mut u8, 0, size) };
    unsafe { &mut *ledger::descriptor(index) }.status = ChunkStatus::Free;
    ledger::unlock(index);
    note!("freed {} bytes at {:#x}", size, addr);

    sweep();
    true
}

/// The resize engine.  Grows or shrinks in place when the neighbour
/// layout allows it, and falls back to allocate-copy-free.
#[requires(want > 0, "zero sizes degenerate to free at the API layer")]
#[ensures(ret.is_some() -> !ret.unwrap().as_ptr().is_null(),
          "a resized chunk is never NULL")]
pub(crate) fn reallocate(old: NonNull<c_void>, want: usize) -> Option<NonNull<c_void>> {
    let target = old.as_ptr() as usize;

    let index = match ledger::walk(|_, d| pool::base() + d.offset == target, true, false) {
        Some(index) => index,
        None => {
            alert!(
                "realloc({:#x}, {}): pointer does not come from this allocator",
                target,
                want
            );
            fault::raise_misuse();
            return None;
        }
    };

    let (cur_size, cur_offset, busy, intact, descriptor_addr) = {
        let d = unsafe { &*ledger::descriptor(index) };
        (
            d.size,
            d.offset,
            d.status == ChunkStatus::Busy,
            sentinel::verify(d),
            ledger::descriptor(index) as usize,
        )
    };

    if !busy {
        ledger::unlock(index);
        alert!(
            "realloc({:#x}, {}): chunk is not currently allocated",
            target,
            want
        );
        fault::raise_misuse();
        return None;
    }

    if !intact {
        ledger::unlock(index);
        sentinel::die_overflow(target, descriptor_addr);
    }

    if cur_size == want {
        ledger::unlock(index);
        return Some(old);
    }

    if want < cur_size {
        return Some(shrink_in_place(index, want, cur_size));
    }

    if grow_in_place(index, want, cur_size) {
        let addr = chunk_addr(index);
        ledger::unlock(index);
        return NonNull::new(addr as *mut c_void);
    }

    // Relocate.  Snapshot the old extent first: allocating may grow
    // and even move the data pool, so the source address must be
    // recomputed from the old chunk's offset, and the copy must happen
    // before the old chunk is freed.
    ledger::unlock(index);
    let fresh = allocate(want);
    let source = pool::base() + cur_offset;
    unsafe {
        ptr::copy_nonoverlapping(
            source as *const u8,
            fresh.as_ptr() as *mut u8,
            cur_size.min(want),
        )
    };
    clean(source as *mut c_void);

    Some(fresh)
}

/// Shrinks the BUSY chunk at `index` (lock held) to `want` bytes and
/// releases the lock.  Splits off the surplus when it can hold a
/// chunk of its own; otherwise shifts the boundary into a FREE
/// successor; otherwise keeps the slack (at most one canary width).
fn shrink_in_place(index: DescIndex, want: usize, cur_size: usize) -> NonNull<c_void> {
    if cur_size > want + CANARY_WIDTH {
        carve(index, want);
        let addr = chunk_addr(index);
        ledger::unlock(index);
        sweep();
        return NonNull::new(addr as *mut c_void).expect("chunk addresses are never null");
    }

    if let Some(next) = unsafe { &*ledger::descriptor(index) }.next_index() {
        ledger::lock(next);
        if unsafe { &*ledger::descriptor(next) }.status == ChunkStatus::Free {
            let diff = cur_size - want;

            sentinel::plant(chunk_addr(index) + want);
            {
                let n = unsafe { &mut *ledger::descriptor(next) };
                n.offset -= diff;
                n.size += diff;
            }
            unsafe { &mut *ledger::descriptor(index) }.size = want;
            note!("shifted {} bytes into the free successor", diff);
        }
        ledger::unlock(next);
    }

    let addr = chunk_addr(index);
    ledger::unlock(index);
    NonNull::new(addr as *mut c_void).expect("chunk addresses are never null")
}

/// Attempts to grow the BUSY chunk at `index` (lock held) to `want`
/// bytes by merging a FREE successor.  On success the chunk is resized
/// and re-carved in place; the lock on `index` is still held.
fn grow_in_place(index: DescIndex, want: usize, cur_size: usize) -> bool {
    let next = match unsafe { &*ledger::descriptor(index) }.next_index() {
        Some(next) => next,
        None => return false,
    };

    ledger::lock(next);
    let (next_free, next_size, after) = {
        let n = unsafe { &*ledger::descriptor(next) };
        (n.status == ChunkStatus::Free, n.size, n.next)
    };

    if !next_free || cur_size + CANARY_WIDTH + next_size < want {
        ledger::unlock(next);
        return false;
    }

    if after != NIL {
        ledger::lock(after);
    }

    let end = {
        let d = unsafe { &mut *ledger::descriptor(index) };
        d.size += CANARY_WIDTH + next_size;
        d.next = after;
        pool::base() + d.offset + d.size
    };
    sentinel::plant(end);

    if after != NIL {
        unsafe { &mut *ledger::descriptor(after) }.prev = index;
        ledger::unlock(after);
    }

    unsafe { &mut *ledger::descriptor(next) }.clear();
    ledger::unlock(next);

    carve(index, want);
    true
}

/// Frees every BUSY chunk.  Shutdown only; assumes no concurrent
/// allocator traffic.
pub(crate) fn release_all() {
    loop {
        let busy = ledger::walk(|_, d| d.status == ChunkStatus::Busy, true, true);

        match busy {
            Some(index) => {
                let addr = chunk_addr(index);
                clean(addr as *mut c_void);
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::heap;

    #[test]
    fn alloc_then_free_round_trip() {
        heap::ensure_init();

        let block = allocate(64);
        unsafe { ptr::write_bytes(block.as_ptr() as *mut u8, 0xa5, 64) };

        assert!(clean(block.as_ptr()));
    }

    #[test]
    fn clean_rejects_foreign_pointers() {
        heap::ensure_init();

        let local = 0u64;
        assert!(!clean(&local as *const u64 as *mut c_void));
    }

    #[test]
    fn large_requests_grow_the_pool() {
        heap::ensure_init();

        let want = 3 * map::page_size();
        let block = allocate(want);

        // The whole span must be writable.
        unsafe { ptr::write_bytes(block.as_ptr() as *mut u8, 0x5a, want) };
        assert!(clean(block.as_ptr()));
    }
}
