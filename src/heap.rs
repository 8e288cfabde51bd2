//! The process-wide heap context: both pools, the page size, the log
//! sink and the scanner flag, all reached lazily through a once-guard
//! so any entry point can be the first one called.
use std::sync::Once;

use crate::carver;
use crate::descriptor::CANARY_WIDTH;
use crate::journal::note;
use crate::ledger;
use crate::map;
use crate::pool;
use crate::sentinel;

static INIT: Once = Once::new();

/// Brings the heap up if needed, then makes sure the background
/// scanner runs.  Called on every public entry point.
pub(crate) fn ensure_init() {
    INIT.call_once(init);
    sentinel::maybe_start_scanner();
}

fn init() {
    // Pool order matters: the head descriptor spans the data pool, so
    // the data pool must exist first.
    pool::init();
    ledger::init();

    // The head chunk covers the whole pool; seal it.
    sentinel::plant(pool::base() + pool::size() - CANARY_WIDTH);

    note!(
        "heap initialised: page size {}, data pool at {:#x}",
        map::page_size(),
        pool::base()
    );
}

/// Tears the heap down: releases every outstanding chunk, stops the
/// scanner, and unmaps both pools.  Intended for process teardown
/// only; the allocator must not be entered again afterwards, and no
/// other thread may be inside it during the call.
pub fn shutdown() {
    if !INIT.is_completed() {
        return;
    }

    note!("heap shutdown requested");
    let _scanner_gate = sentinel::stop_scanner();
    carver::release_all();
    pool::release();
    ledger::release();
}
