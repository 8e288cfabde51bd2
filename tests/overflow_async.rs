//! The background scanner must catch an overflow nobody synchronously
//! checks for.  The child clobbers a canary and then just sleeps; the
//! scanner's once-per-second sweep has to notice and abort the
//! process with failure status.
use std::ptr;
use std::thread;
use std::time::Duration;

use vigil::allocate;

#[test]
fn scanner_kills_the_process_on_overflow() {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork should succeed");

    if pid == 0 {
        let block = allocate(12).expect("allocation should succeed");

        let canary_spot = (block.as_ptr() as usize + 12) as *mut usize;
        unsafe {
            let word = ptr::read_unaligned(canary_spot);
            ptr::write_unaligned(canary_spot, word ^ 1);
        }

        // Give the scanner a handful of sweeps to notice.
        thread::sleep(Duration::from_secs(5));
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(
        libc::WIFEXITED(status),
        "the child should exit, not crash, status={:#x}",
        status
    );
    assert_eq!(
        libc::WEXITSTATUS(status),
        1,
        "the scanner, not the sleep, should end the child"
    );
}
