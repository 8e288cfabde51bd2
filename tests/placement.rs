//! Placement behaviour of a fresh heap: back-to-back allocations are
//! contiguous, freed neighbours coalesce forward, and freed space is
//! reused first-fit.  Everything runs in one test so this process owns
//! the heap layout end to end.
use std::ffi::c_void;
use std::mem;

use vigil::{allocate, check_invariants, chunk_at, release, ChunkStatus};

const W: usize = mem::size_of::<usize>();

fn alloc_addr(size: usize) -> usize {
    allocate(size).expect("allocation should succeed").as_ptr() as usize
}

#[test]
fn placement_scenarios() {
    // Contiguity: each chunk starts right after the previous chunk's
    // canary.
    let p1 = alloc_addr(12);
    let p2 = alloc_addr(25);
    let p3 = alloc_addr(55);

    assert_eq!(p2, p1 + 12 + W);
    assert_eq!(p3, p2 + 25 + W);
    check_invariants();

    // Forward coalesce: freeing p2 then p3 leaves one FREE chunk at
    // p2's address spanning both dead chunks plus the tail remainder.
    release(p2 as *mut c_void);
    release(p3 as *mut c_void);

    let merged = chunk_at(p2 as *mut c_void).expect("the merged chunk starts at p2");
    assert_eq!(merged.status, ChunkStatus::Free);
    assert!(merged.is_tail);
    assert!(merged.size >= 25 + W + 55 + W);
    check_invariants();

    // Reuse: a freed chunk sandwiched between live ones is handed out
    // again, first-fit.
    let q1 = alloc_addr(12);
    let q2 = alloc_addr(28);
    let q3 = alloc_addr(55);
    release(q2 as *mut c_void);

    let q4 = alloc_addr(10);
    assert_eq!(q4, q2);
    check_invariants();

    // The reused chunk is tracked as its own BUSY descriptor again.
    let reused = chunk_at(q4 as *mut c_void).expect("the reused chunk is described");
    assert_eq!(reused.status, ChunkStatus::Busy);
    assert!(reused.size >= 10);
    assert!(reused.canary_intact);

    release(q1 as *mut c_void);
    release(q3 as *mut c_void);
    release(q4 as *mut c_void);
    release(p1 as *mut c_void);
    check_invariants();
}
