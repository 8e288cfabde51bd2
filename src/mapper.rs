//! A `Mapper` is responsible for acquiring address space and backing
//! memory from the operating system.  Both pools are parameterised on
//! such a `Mapper`.
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

#[allow(clippy::inline_fn_without_body)]
#[contract_trait]
pub trait Mapper: std::fmt::Debug + Sync {
    /// Returns the mapping granularity for this mapper.  All calls
    /// into the mapper will align sizes to that page size.
    ///
    /// The page size must be constant for the lifetime of a process.
    #[ensures(ret > 0 && ret & (ret - 1) == 0, "page size must be a power of 2")]
    fn page_size(&self) -> usize;

    /// Attempts to reserve `size` bytes of zero-filled read/write
    /// address space.  `hint` is a non-binding placement wish.
    ///
    /// On success the returned base is page-aligned.
    #[requires(size % self.page_size() == 0)]
    #[requires(size > 0)]
    fn reserve(&self, hint: usize, size: usize) -> Result<NonNull<c_void>, i32>;

    /// Grows a reserved region by `delta` bytes.  The region may be
    /// relocated: callers cannot assume the returned base equals
    /// `base`, and must recompute every derived address.
    #[requires(old_size % self.page_size() == 0)]
    #[requires(delta > 0 && delta % self.page_size() == 0)]
    fn extend(
        &self,
        base: NonNull<c_void>,
        old_size: usize,
        delta: usize,
    ) -> Result<NonNull<c_void>, i32>;

    /// Releases a region previously obtained from `reserve` (and
    /// possibly grown since).  Only used at process shutdown.
    #[requires(size % self.page_size() == 0)]
    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32>;
}

#[derive(Debug)]
struct DefaultMapper {}

/// Returns the process-wide default `Mapper`.
pub fn get_default_mapper() -> &'static dyn Mapper {
    lazy_static::lazy_static! {
        static ref DEFAULT_MAPPER: DefaultMapper = DefaultMapper {};
    }

    &*DEFAULT_MAPPER
}

#[contract_trait]
impl Mapper for DefaultMapper {
    fn page_size(&self) -> usize {
        crate::map::page_size()
    }

    fn reserve(&self, hint: usize, size: usize) -> Result<NonNull<c_void>, i32> {
        crate::map::reserve_region(hint, size)
    }

    fn extend(
        &self,
        base: NonNull<c_void>,
        old_size: usize,
        delta: usize,
    ) -> Result<NonNull<c_void>, i32> {
        crate::map::remap_region(base, old_size, delta)
    }

    fn release(&self, base: NonNull<c_void>, size: usize) -> Result<(), i32> {
        crate::map::release_region(base, size)
    }
}

#[test]
fn smoke_test_default_mapper() {
    let mapper = get_default_mapper();
    let page = mapper.page_size();

    let base = mapper.reserve(0, page).expect("reserve should succeed");
    let grown = mapper
        .extend(base, page, page)
        .expect("extend should succeed");

    mapper
        .release(grown, 2 * page)
        .expect("release should succeed");
}
