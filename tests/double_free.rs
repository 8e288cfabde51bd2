//! Misuse that must raise SIGUSR1: double frees and frees of foreign
//! pointers.  Each misuse happens in a forked child and the parent
//! asserts on how the child died (no handler is installed, so the
//! signal's default disposition terminates it).  Everything stays in
//! one test so the forking thread is the only live thread.
use std::ffi::c_void;

use vigil::{allocate, release};

fn assert_child_dies_of_sigusr1(misuse: fn()) {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork should succeed");

    if pid == 0 {
        misuse();

        // Only reachable if the signal went missing.
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(
        libc::WIFSIGNALED(status),
        "the child should die of a signal, status={:#x}",
        status
    );
    assert_eq!(libc::WTERMSIG(status), libc::SIGUSR1);
}

#[test]
fn invalid_frees_raise_sigusr1() {
    assert_child_dies_of_sigusr1(|| {
        let block = allocate(12).expect("allocation should succeed");
        release(block.as_ptr());
        release(block.as_ptr());
    });

    assert_child_dies_of_sigusr1(|| {
        // Warm the heap up, then free something it never produced.
        let _block = allocate(12).expect("allocation should succeed");
        let local = 0u64;
        release(&local as *const u64 as *mut c_void);
    });
}
