//! Thin wrappers over the kernel's page-mapping calls.  Everything the
//! allocator hands out ultimately comes from an anonymous private
//! mapping created here; both pools grow through `remap_region`.
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
use std::ptr::NonNull;

fn probe_page_size() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    // The original falls back to the common page size when sysconf
    // cannot answer.
    if ret <= 0 {
        4096
    } else {
        ret as usize
    }
}

lazy_static::lazy_static! {
    static ref PAGE_SIZE: usize = probe_page_size();
}

/// Returns the system page size.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Rounds `bytes` up to the next multiple of the page size.
#[ensures(ret % page_size() == 0)]
#[ensures(ret >= bytes)]
pub fn round_up_to_page(bytes: usize) -> usize {
    let page = page_size();
    let pages = (bytes / page) + if bytes % page != 0 { 1 } else { 0 };

    pages * page
}

/// Attempts to map a fresh anonymous read/write region of `size`
/// bytes, zero-filled.  `hint` is a non-binding placement wish; 0
/// leaves the choice entirely to the kernel.
///
/// The `size` argument must be a multiple of the page size.
pub fn reserve_region(hint: usize, size: usize) -> Result<NonNull<c_void>, i32> {
    assert!(
        size > 0 && (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    let base = unsafe {
        libc::mmap(
            hint as *mut c_void,
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        Err(errno())
    } else {
        Ok(NonNull::new(base).expect("mmap never returns a NULL mapping"))
    }
}

/// Grows the region at `base` from `old_size` to `old_size + delta`
/// bytes.  The kernel is free to relocate the region; the caller must
/// treat the returned base as the only valid one.
///
/// All sizes must be multiples of the page size.
pub fn remap_region(
    base: NonNull<c_void>,
    old_size: usize,
    delta: usize,
) -> Result<NonNull<c_void>, i32> {
    assert!(
        delta > 0 && (delta % page_size()) == 0 && (old_size % page_size()) == 0,
        "Bad remap old_size={} delta={} page_size={}",
        old_size,
        delta,
        page_size()
    );

    let moved = unsafe {
        libc::mremap(
            base.as_ptr(),
            old_size,
            old_size + delta,
            libc::MREMAP_MAYMOVE,
        )
    };

    if moved == libc::MAP_FAILED {
        Err(errno())
    } else {
        Ok(NonNull::new(moved).expect("mremap never returns a NULL mapping"))
    }
}

/// Releases a region previously obtained from `reserve_region` (and
/// possibly grown since).  Only called at process teardown.
pub fn release_region(base: NonNull<c_void>, size: usize) -> Result<(), i32> {
    if size == 0 {
        return Ok(());
    }

    assert!(
        (size % page_size()) == 0,
        "Bad region size={} page_size={}",
        size,
        page_size()
    );

    if unsafe { libc::munmap(base.as_ptr(), size) } == 0 {
        Ok(())
    } else {
        Err(errno())
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[test]
fn test_page_size() {
    assert_ne!(page_size(), 0);
    assert_eq!(page_size() & (page_size() - 1), 0);
}

#[test]
fn test_round_up_to_page() {
    let page = page_size();

    assert_eq!(round_up_to_page(1), page);
    assert_eq!(round_up_to_page(page), page);
    assert_eq!(round_up_to_page(page + 1), 2 * page);
}

// Map a region, grow it, scribble over the freshly visible bytes, and
// release everything.
#[test]
fn smoke_test() {
    let page = page_size();
    let base = reserve_region(0, page).expect("reserve should succeed");

    let grown = remap_region(base, page, page).expect("remap should succeed");
    unsafe {
        std::ptr::write_bytes(grown.as_ptr() as *mut u8, 42, 2 * page);
    }

    release_region(grown, 2 * page).expect("release should succeed");
}
