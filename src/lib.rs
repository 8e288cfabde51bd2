//! Vigil is a C- and Rust-callable hardened heap allocator.  It trades
//! throughput for auditability: chunk bookkeeping lives in a metadata
//! pool disjoint from the bytes handed to callers, every chunk carries
//! a trailing canary word checked both synchronously and by a
//! background scanner thread, misuse (double frees, foreign pointers)
//! is reported with `SIGUSR1`, and every allocator event can be
//! journalled to the file named by the `MSM_OUPUT` environment
//! variable.
mod api;
mod carver;
mod descriptor;
mod fault;
mod heap;
mod inspect;
mod journal;
mod ledger;
mod map;
mod mapper;
mod pool;
mod sentinel;

use std::ffi::c_void;
use std::ptr::NonNull;

pub use api::allocate;
pub use api::allocate_zeroed;
pub use api::reallocate;
pub use api::release;
pub use descriptor::ChunkStatus;
pub use heap::shutdown;
pub use inspect::check_invariants;
pub use inspect::chunk_at;
pub use inspect::snapshot;
pub use inspect::ChunkReport;
pub use journal::SINK_ENV_VAR;
pub use mapper::get_default_mapper;
pub use mapper::Mapper;

fn into_raw(block: Option<NonNull<c_void>>) -> *mut c_void {
    block.map(NonNull::as_ptr).unwrap_or(std::ptr::null_mut())
}

/// C-callable `malloc` under the allocator's own prefix.
#[no_mangle]
pub extern "C" fn vigil_malloc(size: usize) -> *mut c_void {
    into_raw(api::allocate(size))
}

/// C-callable `free` under the allocator's own prefix.
///
/// # Safety
///
/// `block` must be null or a pointer previously returned by one of the
/// `vigil_*` allocation entry points; anything else is reported as
/// misuse.
#[no_mangle]
pub unsafe extern "C" fn vigil_free(block: *mut c_void) {
    api::release(block)
}

/// C-callable `calloc` under the allocator's own prefix.
#[no_mangle]
pub extern "C" fn vigil_calloc(count: usize, size: usize) -> *mut c_void {
    into_raw(api::allocate_zeroed(count, size))
}

/// C-callable `realloc` under the allocator's own prefix.
///
/// # Safety
///
/// `block` must be null or a pointer previously returned by one of the
/// `vigil_*` allocation entry points; anything else is reported as
/// misuse.
#[no_mangle]
pub unsafe extern "C" fn vigil_realloc(block: *mut c_void, size: usize) -> *mut c_void {
    into_raw(api::reallocate(block, size))
}

/// The interposition surface: the four standard heap symbols, exported
/// only when the `interpose` feature is on so that linking the library
/// does not hijack a host's heap by accident.  Build a `cdylib` with
/// this feature and `LD_PRELOAD` it.
#[cfg(feature = "interpose")]
mod interpose {
    use super::*;

    #[no_mangle]
    pub extern "C" fn malloc(size: usize) -> *mut c_void {
        into_raw(api::allocate(size))
    }

    /// # Safety
    ///
    /// Standard `free` contract.
    #[no_mangle]
    pub unsafe extern "C" fn free(block: *mut c_void) {
        api::release(block)
    }

    #[no_mangle]
    pub extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
        into_raw(api::allocate_zeroed(count, size))
    }

    /// # Safety
    ///
    /// Standard `realloc` contract.
    #[no_mangle]
    pub unsafe extern "C" fn realloc(block: *mut c_void, size: usize) -> *mut c_void {
        into_raw(api::reallocate(block, size))
    }
}
