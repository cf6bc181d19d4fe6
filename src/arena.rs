use std::ptr::NonNull;

use crate::{
    allocator::AllocError,
    freelist::{BLOCK_HEADER_SIZE, Fit, FreeList, FreeSpan},
    system::SystemRegion,
};

/// One contiguous memory region carved into blocks.
///
/// An arena pairs the raw [`SystemRegion`] with the [`FreeList`] describing
/// which byte ranges of it are currently free. The allocator keeps a chain
/// of arenas and every block handed to a caller lives inside exactly one of
/// them:
///
/// ```text
/// +-----------------------------------------------+      +--------------------------------+
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +------+ |
/// | Arena  | | Block | -> | Block | -> | Block |  | ---> | Arena  | | Block | -> | Free | |
/// |        | +-------+    +-------+    +-------+  |      |        | +-------+    +------+ |
/// +-----------------------------------------------+      +--------------------------------+
/// ```
///
/// The capacity is fixed at creation. An arena is destroyed (the region is
/// returned to the operating system by dropping it) once its free list
/// collapses back to a single span covering the whole payload; the
/// allocator performs that check after every free.
pub(crate) struct Arena {
    region: SystemRegion,
    free: FreeList,
}

impl Arena {
    /// Requests a region of `payload_size` bytes from the operating system
    /// and initializes it as one free block spanning the entire payload.
    ///
    /// Propagates [`AllocError::OutOfMemory`] if the system cannot satisfy
    /// the request.
    pub fn create(payload_size: usize) -> Result<Self, AllocError> {
        debug_assert!(payload_size > BLOCK_HEADER_SIZE);

        let region = SystemRegion::request(payload_size)?;
        let free = FreeList::with_span(FreeSpan {
            offset: 0,
            size: payload_size - BLOCK_HEADER_SIZE,
        });

        Ok(Self { region, free })
    }

    /// Total payload bytes this arena can carve into blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Start address of the arena's payload.
    #[inline]
    pub fn base(&self) -> usize {
        self.region.base()
    }

    /// Whether `address` falls inside this arena's region.
    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base() && address < self.base() + self.capacity()
    }

    /// Best-fit search in this arena's free list.
    #[inline]
    pub fn best_fit(&self, size: usize) -> Option<Fit> {
        self.free.best_fit(size)
    }

    /// Carves the block selected by `fit` and returns a pointer to its
    /// payload, just past the conceptual header.
    pub fn take(&mut self, fit: Fit, size: usize) -> NonNull<u8> {
        let offset = self.free.take(fit, size);

        self.region.at(offset + BLOCK_HEADER_SIZE)
    }

    /// Returns the block whose header sits at `header_address` back to the
    /// free list, coalescing with its physical neighbours.
    pub fn release(&mut self, header_address: usize, size: usize) {
        debug_assert!(self.contains(header_address));

        self.free.release(header_address - self.base(), size);
    }

    /// Whether every byte of the arena is free again, i.e. the free list is
    /// exactly one span covering the full payload.
    ///
    /// A fully occupied arena has an *empty* free list; it is simply not
    /// eligible for release.
    pub fn is_entirely_free(&self) -> bool {
        self.free.len() == 1
            && self.free.first().is_some_and(|span| {
                span.offset == 0 && span.size == self.capacity() - BLOCK_HEADER_SIZE
            })
    }

    /// Free payload bytes currently tracked by this arena.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free.free_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_arena_is_one_free_span() {
        let arena = Arena::create(2048).unwrap();

        assert_eq!(arena.capacity(), 2048);
        assert!(arena.is_entirely_free());
        assert_eq!(arena.free_bytes(), 2048 - BLOCK_HEADER_SIZE);
    }

    #[test]
    fn take_and_release_round_trip() {
        let mut arena = Arena::create(2048).unwrap();

        let fit = arena.best_fit(100).unwrap();
        let ptr = arena.take(fit, 100);
        assert!(!arena.is_entirely_free());

        // The payload is real, writable memory inside the region.
        let address = ptr.as_ptr() as usize;
        assert!(arena.contains(address));
        unsafe {
            ptr.as_ptr().write_bytes(0x5A, 100);
            assert_eq!(ptr.as_ptr().read(), 0x5A);
        }

        arena.release(address - BLOCK_HEADER_SIZE, 100);
        assert!(arena.is_entirely_free());
    }

    #[test]
    fn fully_occupied_arena_is_not_entirely_free() {
        let payload = 128 + BLOCK_HEADER_SIZE;
        let mut arena = Arena::create(payload).unwrap();

        // Exact fit consumes the whole arena; the free list goes empty.
        let fit = arena.best_fit(128).unwrap();
        let _ptr = arena.take(fit, 128);

        assert_eq!(arena.free_bytes(), 0);
        assert!(!arena.is_entirely_free());
    }
}
