//! Concurrent allocation: distinct threads must get distinct, live,
//! canary-sealed chunks, and the spatial list must stay well-formed.
use std::ffi::c_void;
use std::thread;

use vigil::{allocate, check_invariants, chunk_at, release, ChunkStatus};

#[test]
fn four_threads_allocate_distinct_chunks() {
    let workers: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                allocate(12).expect("allocation should succeed").as_ptr() as usize
            })
        })
        .collect();

    let addrs: Vec<usize> = workers
        .into_iter()
        .map(|w| w.join().expect("worker should not panic"))
        .collect();

    for (i, &a) in addrs.iter().enumerate() {
        for &b in &addrs[..i] {
            assert_ne!(a, b, "two threads were handed the same chunk");
        }
    }

    for &addr in &addrs {
        let report = chunk_at(addr as *mut c_void).expect("live chunk is described");
        assert_eq!(report.status, ChunkStatus::Busy);
        assert!(report.size >= 12);
        assert!(report.canary_intact);
    }

    // Sortedness and contiguity of the spatial list, with the four
    // chunks still in place.
    check_invariants();

    for &addr in &addrs {
        release(addr as *mut c_void);
    }
    check_invariants();
}
