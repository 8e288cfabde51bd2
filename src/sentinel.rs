//! Overflow detection.  Every chunk carries a trailing canary word;
//! mutation of that word is treated as proof of an out-of-bounds
//! write.  Checks run synchronously on free/realloc, and a background
//! thread re-sweeps the whole metadata pool once per second.
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::descriptor::{ChunkStatus, Descriptor};
use crate::fault;
use crate::journal::{alert, note};
use crate::ledger;
use crate::pool;

lazy_static::lazy_static! {
    // The address of an internal code symbol: some non-trivial word
    // that varies with the process image.
    static ref CANARY: usize = crate::carver::clean as usize;
}

/// The scanner-started flag.  Deliberately non-reentrant: spawning the
/// scanner allocates, and the nested allocator calls must see the flag
/// as contended and skip the start path instead of recursing into it.
static SCANNER_GUARD: Mutex<bool> = Mutex::new(false);

static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Held for the duration of each sweep, so teardown can wait out a
/// sweep already in flight before unmapping the pools.
static SCAN_GATE: Mutex<()> = Mutex::new(());

/// The process-wide canary constant.
#[inline]
pub(crate) fn value() -> usize {
    *CANARY
}

/// Writes the canary word at `end` (the first byte past a chunk's
/// user bytes).  Chunk sizes are arbitrary, so the write is unaligned.
#[inline]
pub(crate) fn plant(end: usize) {
    unsafe { ptr::write_unaligned(end as *mut usize, value()) };
}

/// True when `d`'s trailing canary is intact.  The caller must hold
/// `d`'s lock.
#[inline]
pub(crate) fn verify(d: &Descriptor) -> bool {
    let end = pool::base() + d.offset + d.size;
    (unsafe { ptr::read_unaligned(end as *const usize) }) == value()
}

/// Reports a detected overflow and terminates the process.
pub(crate) fn die_overflow(chunk_addr: usize, descriptor_addr: usize) -> ! {
    alert!(
        "overflow detected: chunk at {:#x} (descriptor at {:#x})",
        chunk_addr,
        descriptor_addr
    );
    std::process::exit(1);
}

/// Starts the background scanner if nobody has yet.  Called on every
/// allocator entry; cheap once the thread runs.
pub(crate) fn maybe_start_scanner() {
    if let Some(mut started) = SCANNER_GUARD.try_lock() {
        if !*started {
            if std::thread::Builder::new()
                .name("vigil-sentinel".into())
                .spawn(scan_forever)
                .is_err()
            {
                fault::die("could not start the overflow scanner thread");
            }

            note!("background overflow scanner started");
            *started = true;
        }
    }
}

/// Tells the scanner to wind down and waits for any sweep in flight.
/// The returned guard keeps new sweeps out until teardown is done.
pub(crate) fn stop_scanner() -> parking_lot::MutexGuard<'static, ()> {
    SHUTTING_DOWN.store(true, Ordering::Release);
    SCAN_GATE.lock()
}

fn breached(d: &Descriptor) -> bool {
    d.status != ChunkStatus::Unused && !verify(d)
}

fn scan_forever() {
    loop {
        {
            let _sweep = SCAN_GATE.lock();
            if SHUTTING_DOWN.load(Ordering::Acquire) {
                return;
            }

            if let Some(index) = ledger::scan(0, |_, d| breached(d)) {
                let (chunk_addr, descriptor_addr) = {
                    let d = unsafe { &*ledger::descriptor(index) };
                    (pool::base() + d.offset, ledger::descriptor(index) as usize)
                };
                ledger::unlock(index);
                die_overflow(chunk_addr, descriptor_addr);
            }
        }

        std::thread::sleep(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canary_is_non_trivial() {
        assert_ne!(value(), 0);
        assert_eq!(value(), value());
    }

    #[test]
    fn plant_writes_at_unaligned_spots() {
        let mut buf = [0u8; 24];

        for misalign in 0..8 {
            let end = buf.as_mut_ptr() as usize + misalign;
            plant(end);

            let word = unsafe { ptr::read_unaligned(end as *const usize) };
            assert_eq!(word, value());
        }
    }
}
