//! This module services individual allocation and deallocation calls,
//! i.e., the public face of the allocator.  Each entry point logs the
//! event, runs the init guard, handles the zero-size corners, and
//! hands the rest to the carver.
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

use crate::carver;
use crate::fault;
use crate::heap;
use crate::journal::{alert, note};

/// Requests past this bound cannot be sensible and would overflow the
/// page-rounding arithmetic; they fail cleanly instead.
const MAX_REQUEST: usize = usize::MAX / 4;

/// Allocates `size` uninitialised bytes.  Returns `None` for a
/// zero-size request, per the standard `malloc(0)` contract.
#[ensures(size == 0 -> ret.is_none(), "zero-size requests yield nothing")]
#[ensures(size > MAX_REQUEST -> ret.is_none(), "absurd requests fail cleanly")]
#[ensures(ret.is_some() -> !ret.unwrap().as_ptr().is_null(),
          "a successful allocation is never NULL")]
pub fn allocate(size: usize) -> Option<NonNull<c_void>> {
    note!("malloc({})", size);
    heap::ensure_init();

    if size == 0 || size > MAX_REQUEST {
        return None;
    }

    Some(carver::allocate(size))
}

/// Releases a chunk previously handed out by this allocator.  A null
/// pointer is a no-op.  Anything else that does not name a live chunk
/// (foreign pointer, double free) is reported and signalled, and the
/// heap is left untouched.
#[allow(clippy::assertions_on_constants)]
#[requires(true, "`block` is null or came from this allocator (misuse is detected and signalled)")]
pub fn release(block: *mut c_void) {
    note!("free({:#x})", block as usize);
    heap::ensure_init();

    if block.is_null() {
        return;
    }

    if !carver::clean(block) {
        alert!(
            "free({:#x}): double free, or a pointer that was never allocated here",
            block as usize
        );
        fault::raise_misuse();
    }
}

/// Allocates a zero-filled array of `count` elements of `size` bytes.
/// Returns `None` when either factor is zero or the product overflows.
#[ensures((count == 0 || size == 0) -> ret.is_none(), "zero-size requests yield nothing")]
#[ensures(count.checked_mul(size).is_none() -> ret.is_none(),
          "overflowing products are rejected")]
#[ensures(ret.is_some() -> count.checked_mul(size).unwrap() <= MAX_REQUEST)]
pub fn allocate_zeroed(count: usize, size: usize) -> Option<NonNull<c_void>> {
    note!("calloc({}, {})", count, size);
    heap::ensure_init();

    if count == 0 || size == 0 {
        return None;
    }

    let total = count.checked_mul(size)?;
    if total > MAX_REQUEST {
        return None;
    }

    let block = carver::allocate(total);
    // Reused chunks carry stale canary words from dead neighbour
    // boundaries; zero-fill is unconditional.
    unsafe { ptr::write_bytes(block.as_ptr() as *mut u8, 0, total) };

    Some(block)
}

/// Resizes `block` to `size` bytes.  Null `block` degenerates to
/// `allocate`; zero `size` degenerates to `release`.  On misuse the
/// original chunk is left intact and `None` is returned.
#[ensures(size == 0 -> ret.is_none(), "zero size degenerates to free")]
#[ensures(size > MAX_REQUEST -> ret.is_none(), "absurd requests fail cleanly")]
#[ensures((ret.is_some() && old(crate::inspect::chunk_at(block).map(|r| r.size)) == Some(size))
          -> ret.unwrap().as_ptr() as usize == block as usize,
          "resizing to the current size returns the same pointer")]
pub fn reallocate(block: *mut c_void, size: usize) -> Option<NonNull<c_void>> {
    note!("realloc({:#x}, {})", block as usize, size);
    heap::ensure_init();

    let old = match NonNull::new(block) {
        None => {
            if size == 0 || size > MAX_REQUEST {
                return None;
            }
            return Some(carver::allocate(size));
        }
        Some(old) => old,
    };

    if size == 0 {
        release(old.as_ptr());
        return None;
    }

    if size > MAX_REQUEST {
        return None;
    }

    carver::reallocate(old, size)
}

#[cfg(test)]
mod test {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::*;
    use crate::inspect;

    #[test]
    fn zero_size_requests_yield_nothing() {
        assert_eq!(allocate(0), None);
        assert_eq!(allocate_zeroed(0, 16), None);
        assert_eq!(allocate_zeroed(16, 0), None);
        assert_eq!(reallocate(ptr::null_mut(), 0), None);
    }

    #[test]
    fn calloc_rejects_overflowing_products() {
        assert_eq!(allocate_zeroed(usize::MAX, 2), None);
        assert_eq!(allocate_zeroed(usize::MAX / 2, 3), None);
    }

    #[test]
    fn calloc_zero_fills() {
        let block = allocate_zeroed(3, 42).expect("calloc should succeed");
        let bytes = block.as_ptr() as *const u8;

        for i in 0..(3 * 42) {
            assert_eq!(unsafe { ptr::read(bytes.add(i)) }, 0);
        }

        release(block.as_ptr());
    }

    #[test]
    fn realloc_null_is_malloc() {
        let block = reallocate(ptr::null_mut(), 24).expect("realloc(NULL, n) allocates");

        unsafe { ptr::write_bytes(block.as_ptr() as *mut u8, 1, 24) };
        release(block.as_ptr());
    }

    #[test]
    fn realloc_zero_is_free() {
        let block = allocate(24).expect("malloc should succeed");

        assert_eq!(reallocate(block.as_ptr(), 0), None);
    }

    fn fill(block: NonNull<c_void>, len: usize, seed: u8) {
        let bytes = block.as_ptr() as *mut u8;
        for i in 0..len {
            unsafe { ptr::write(bytes.add(i), seed.wrapping_add(i as u8)) };
        }
    }

    fn holds(block: NonNull<c_void>, len: usize, seed: u8) -> bool {
        let bytes = block.as_ptr() as *const u8;
        (0..len).all(|i| unsafe { ptr::read(bytes.add(i)) } == seed.wrapping_add(i as u8))
    }

    proptest! {
        // Allocate a batch, scribble distinct patterns, and check
        // nothing bleeds between chunks.  Only this test's own
        // allocations are inspected: the heap is a process-wide
        // singleton shared with every other test thread.
        #[test]
        fn chunks_do_not_overlap(sizes in vec(1usize..512, 1..16)) {
            let blocks: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, &len)| {
                    let block = allocate(len).expect("malloc should succeed");
                    fill(block, len, i as u8);
                    (block, len, i as u8)
                })
                .collect();

            for &(block, len, seed) in &blocks {
                prop_assert!(holds(block, len, seed));

                let report = inspect::chunk_at(block.as_ptr()).expect("live chunk is described");
                prop_assert!(report.size >= len);
                prop_assert!(report.canary_intact);
            }

            for (block, _, _) in blocks {
                release(block.as_ptr());
            }
        }

        // Shrink and grow a chunk through realloc; the common prefix
        // must survive every step.
        #[test]
        fn realloc_preserves_prefix(
            initial in 1usize..256,
            steps in vec(1usize..512, 1..8),
        ) {
            let mut block = allocate(initial).expect("malloc should succeed");
            let mut len = initial;
            fill(block, len, 7);

            for &next in &steps {
                block = reallocate(block.as_ptr(), next).expect("realloc should succeed");
                prop_assert!(holds(block, len.min(next), 7));

                len = next;
                fill(block, len, 7);
            }

            release(block.as_ptr());
        }
    }
}
