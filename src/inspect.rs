//! Read-only diagnostics over the live heap.  An auditing allocator
//! should be auditable itself: these reports are what the test suite
//! (and a curious embedder) uses to watch placement decisions happen.
//!
//! Reports are gathered under per-descriptor locks, one at a time, so
//! a snapshot is only a consistent picture of the whole heap when no
//! other thread is mutating it.
use std::ffi::c_void;

use crate::descriptor::{ChunkStatus, DescIndex, CANARY_WIDTH};
use crate::heap;
use crate::ledger;
use crate::pool;
use crate::sentinel;

/// One chunk's state, copied out of its descriptor.
#[derive(Clone, Copy, Debug)]
pub struct ChunkReport {
    /// Slot index of the descriptor in the metadata pool.
    pub index: u32,
    /// Address of the chunk's first user byte.
    pub address: usize,
    /// User bytes, trailing canary excluded.
    pub size: usize,
    pub status: ChunkStatus,
    /// Whether the trailing canary word was intact when sampled.
    pub canary_intact: bool,
    /// Whether this chunk is the last one in the data pool.
    pub is_tail: bool,
    /// Slot index of the spatial predecessor, if any.
    pub prev_index: Option<u32>,
}

/// Describes the chunk whose first user byte is exactly `block`, if
/// one exists.
pub fn chunk_at(block: *mut c_void) -> Option<ChunkReport> {
    heap::ensure_init();

    let target = block as usize;
    let mut found = None;

    ledger::walk(
        |index, d| {
            if pool::base() + d.offset == target {
                found = Some(ChunkReport {
                    index,
                    address: pool::base() + d.offset,
                    size: d.size,
                    status: d.status,
                    canary_intact: sentinel::verify(d),
                    is_tail: d.is_tail(),
                    prev_index: d.prev_index(),
                });
                true
            } else {
                false
            }
        },
        true,
        true,
    );

    found
}

/// Reports every live chunk, in spatial order.
pub fn snapshot() -> Vec<ChunkReport> {
    heap::ensure_init();

    let mut reports = Vec::new();
    ledger::walk(
        |index, d| {
            reports.push(ChunkReport {
                index,
                address: pool::base() + d.offset,
                size: d.size,
                status: d.status,
                canary_intact: sentinel::verify(d),
                is_tail: d.is_tail(),
                prev_index: d.prev_index(),
            });
            false
        },
        false,
        true,
    );

    reports
}

/// Asserts the structural invariants of the heap: the spatial list is
/// sorted and gap-free, chunks never overlap, the tail chunk ends
/// exactly at the data pool's end, every live canary is intact, and
/// vacant descriptor slots are fully cleared.  Panics on violation.
///
/// Only meaningful on a quiescent heap (single-threaded tests).
pub fn check_invariants() {
    heap::ensure_init();

    let chunks = snapshot();
    assert!(!chunks.is_empty(), "the spatial list always has a head");

    for (i, chunk) in chunks.iter().enumerate() {
        assert_ne!(
            chunk.status,
            ChunkStatus::Unused,
            "vacant slots never appear on the spatial list"
        );
        assert!(chunk.canary_intact, "chunk at {:#x}", chunk.address);

        if let Some(next) = chunks.get(i + 1) {
            assert!(
                next.address > chunk.address,
                "spatial list is sorted by address"
            );
            assert_eq!(
                next.address,
                chunk.address + chunk.size + CANARY_WIDTH,
                "neighbouring chunks are contiguous"
            );
            assert_eq!(
                next.prev_index,
                Some(chunk.index),
                "back-links mirror the forward links"
            );
        } else {
            assert!(chunk.is_tail);
            assert_eq!(
                chunk.address + chunk.size + CANARY_WIDTH,
                pool::base() + pool::size(),
                "the tail chunk ends at the data pool's end"
            );
        }
    }

    // Vacant slots must be fully cleared and unlinked.
    let mut index: DescIndex = 0;
    while index < ledger::capacity() {
        if ledger::try_lock(index) {
            let d = unsafe { &*ledger::descriptor(index) };
            if d.status == ChunkStatus::Unused {
                assert_eq!(d.size, 0, "vacant slot {} has no size", index);
                assert_eq!(d.offset, 0, "vacant slot {} has no chunk", index);
                assert_eq!(d.next_index(), None, "vacant slot {} is unlinked", index);
                assert_eq!(d.prev_index(), None, "vacant slot {} is unlinked", index);
            }
            ledger::unlock(index);
        }
        index += 1;
    }
}
