//! A clobbered canary must abort the process at the next synchronous
//! check.  The overflow happens in a forked child; the parent asserts
//! the child exited with failure status.
use std::ptr;

use vigil::{allocate, release};

#[test]
fn free_after_overflow_exits_with_failure() {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork should succeed");

    if pid == 0 {
        let block = allocate(12).expect("allocation should succeed");

        // Flip one bit of the canary word right past the chunk: a
        // guaranteed mismatch, whatever the canary's value.
        let canary_spot = (block.as_ptr() as usize + 12) as *mut usize;
        unsafe {
            let word = ptr::read_unaligned(canary_spot);
            ptr::write_unaligned(canary_spot, word ^ 1);
        }

        // The synchronous check in free must catch it and abort.
        release(block.as_ptr());
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(
        libc::WIFEXITED(status),
        "the child should exit, not crash, status={:#x}",
        status
    );
    assert_eq!(libc::WEXITSTATUS(status), 1);
}
