//! Process teardown: `shutdown` must drain the heap and unmap both
//! pools without tripping over its own scanner thread.  Runs in a
//! forked child because the allocator cannot be used again afterwards.
use vigil::{allocate, release, shutdown};

#[test]
fn shutdown_releases_everything_cleanly() {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork should succeed");

    if pid == 0 {
        let a = allocate(100).expect("allocation should succeed");
        let _leaked = allocate(200).expect("allocation should succeed");
        release(a.as_ptr());

        // Outstanding chunks are drained by shutdown itself.
        shutdown();
        unsafe { libc::_exit(0) };
    }

    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    assert!(
        libc::WIFEXITED(status),
        "the child should exit, not crash, status={:#x}",
        status
    );
    assert_eq!(libc::WEXITSTATUS(status), 0);
}
