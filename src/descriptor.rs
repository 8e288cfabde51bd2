//! One `Descriptor` is a fixed-stride record in the metadata pool
//! describing the state of exactly one chunk of the data pool.  The
//! pool of descriptors is disjoint from the data pool, so a heap
//! overflow can never corrupt allocator bookkeeping.
use parking_lot::ReentrantMutex;
use static_assertions::const_assert;

/// Index of a descriptor in the metadata pool's flat array.
pub type DescIndex = u32;

/// Sentinel for an absent `prev`/`next` link.
pub const NIL: DescIndex = DescIndex::MAX;

/// Width in bytes of the canary word trailing every chunk.
pub const CANARY_WIDTH: usize = std::mem::size_of::<usize>();

/// State of the chunk a descriptor stands for.
///
/// `Unused` means the descriptor slot itself is vacant: it describes
/// no chunk and is never on the spatial list.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChunkStatus {
    Free = 0,
    Busy = 1,
    Unused = 2,
}

/// Chunk bookkeeping record.
///
/// `offset` locates the chunk's first user byte relative to the data
/// pool base.  Both pools may be relocated when they grow, so nothing
/// in here stores an absolute address: user addresses are recomputed
/// as `pool::base() + offset`, and `prev`/`next` are indices into the
/// metadata pool rather than pointers.
#[repr(C)]
pub struct Descriptor {
    pub offset: usize,
    /// User bytes in the chunk, trailing canary excluded.
    pub size: usize,
    pub status: ChunkStatus,
    pub prev: DescIndex,
    pub next: DescIndex,
    /// Protects this record and the chunk bytes it describes.
    /// Reentrant: array scans may trylock a descriptor the same
    /// thread already holds through the spatial list.
    pub lock: ReentrantMutex<()>,
}

/// Byte stride of one descriptor slot in the pool.
pub const DESCRIPTOR_STRIDE: usize = std::mem::size_of::<Descriptor>();

// A single metadata page must hold a useful number of slots.
const_assert!(DESCRIPTOR_STRIDE <= 256);

impl Descriptor {
    /// A vacant slot: no chunk, no links, unlocked.
    pub fn vacant() -> Self {
        Descriptor {
            offset: 0,
            size: 0,
            status: ChunkStatus::Unused,
            prev: NIL,
            next: NIL,
            lock: ReentrantMutex::new(()),
        }
    }

    #[inline]
    pub fn next_index(&self) -> Option<DescIndex> {
        if self.next == NIL {
            None
        } else {
            Some(self.next)
        }
    }

    #[inline]
    pub fn prev_index(&self) -> Option<DescIndex> {
        if self.prev == NIL {
            None
        } else {
            Some(self.prev)
        }
    }

    /// True when this descriptor is the spatial tail.
    #[inline]
    pub fn is_tail(&self) -> bool {
        self.next == NIL
    }

    /// Reverts a descriptor absorbed by a coalesce to the vacant
    /// state, without touching its lock.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.size = 0;
        self.status = ChunkStatus::Unused;
        self.prev = NIL;
        self.next = NIL;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vacant_has_no_links() {
        let d = Descriptor::vacant();

        assert_eq!(d.status, ChunkStatus::Unused);
        assert_eq!(d.next_index(), None);
        assert_eq!(d.prev_index(), None);
        assert!(d.is_tail());
        assert_eq!(d.size, 0);
    }

    #[test]
    fn clear_reverts_everything_but_the_lock() {
        let mut d = Descriptor::vacant();

        d.offset = 128;
        d.size = 32;
        d.status = ChunkStatus::Busy;
        d.prev = 3;
        d.next = 7;

        {
            let _guard = d.lock.lock();
        }

        d.clear();
        assert_eq!(d.status, ChunkStatus::Unused);
        assert_eq!(d.offset, 0);
        assert_eq!(d.size, 0);
        assert_eq!(d.prev, NIL);
        assert_eq!(d.next, NIL);
    }
}
