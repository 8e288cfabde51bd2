//! The journal: pointing MSM_OUPUT at a file must produce one whole
//! line per allocator event.  The variable is read lazily on the
//! first event, so it is set before this process ever touches the
//! allocator.
use vigil::{allocate, release, SINK_ENV_VAR};

#[test]
fn journal_writes_one_line_per_event() {
    let dir = tempfile::tempdir().expect("tempdir should build");
    let sink = dir.path().join("events.log");
    std::env::set_var(SINK_ENV_VAR, &sink);

    let block = allocate(33).expect("allocation should succeed");
    let addr = block.as_ptr() as usize;
    release(block.as_ptr());

    let text = std::fs::read_to_string(&sink).expect("the sink file should exist");

    assert!(
        text.lines().any(|line| line == "malloc(33)"),
        "allocation event missing from:\n{}",
        text
    );
    assert!(
        text.lines().any(|line| line == format!("free({:#x})", addr)),
        "free event missing from:\n{}",
        text
    );

    // Line-oriented means no interleaved fragments: every record the
    // allocator wrote is a complete line we can point at.
    assert!(text.ends_with('\n'));
}
