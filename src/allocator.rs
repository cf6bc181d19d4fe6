use std::ptr::NonNull;

use thiserror::Error;

use crate::{
    arena::Arena,
    freelist::{BLOCK_HEADER_SIZE, Fit},
};

/// Failures surfaced by the allocator.
///
/// Corruption of the allocator's own bookkeeping (double free inside a live
/// arena, overlapping blocks) is not an error value: it panics, since
/// continuing would corrupt memory further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The operating system could not satisfy a region request while
    /// creating an arena. Not recoverable internally.
    #[error("system allocator exhausted while requesting a {requested}-byte region")]
    OutOfMemory { requested: usize },

    /// A freed block's header address falls outside every live arena. This
    /// means the pointer did not come from this allocator, or the block was
    /// already freed and its arena released.
    #[error("freed pointer {address:#x} does not belong to any live arena")]
    InvalidFree { address: usize },
}

/// Sizing knobs for the arena chain.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Payload size of the first arena, and the base of the doubling
    /// growth sequence.
    pub starting_arena_size: usize,
    /// Requests at or above this size get a dedicated, exactly-sized arena,
    /// and the doubling sequence stops growing past it.
    pub growth_ceiling: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            starting_arena_size: 2048,
            growth_ceiling: 40_000_000,
        }
    }
}

/// A memory block handed out by [`Allocator::allocate`].
///
/// The pointer addresses `len` writable bytes inside one of the allocator's
/// arenas. The block stays valid until it is passed back to
/// [`Allocator::free`] on the same allocator.
///
/// `Block` is intentionally `!Send`: blocks must be freed by the thread
/// that allocated them, since every thread owns its own allocator and no
/// state is shared between them.
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    len: usize,
}

impl Block {
    /// Pointer to the first byte of the block's payload.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable length of the block in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Best-fit pool allocator over a chain of arenas.
///
/// The chain starts empty. The first allocation creates an arena of
/// [`AllocatorConfig::starting_arena_size`] bytes; whenever no free block
/// fits a request, the chain grows by a new arena of double the previous
/// size, until the doubling passes [`AllocatorConfig::growth_ceiling`] and
/// arenas are sized to the request instead. Requests at or above the
/// ceiling skip the search and get a dedicated arena immediately.
///
/// ```text
///  Allocator ---> Arena(2048) ---> Arena(4096) ---> Arena(8192)
///                    |                |                 |
///                 free list        free list         free list
/// ```
///
/// Within an arena the search is best-fit with an exact-match
/// short-circuit; across arenas it is first-fit: the first arena holding
/// any usable block serves the request. Freed blocks coalesce with their
/// physical neighbours, and an arena whose entire payload is free again is
/// released back to the operating system.
///
/// One allocator per thread. The type holds pointers into its own regions
/// and is therefore `!Send`; nothing inside it is synchronized, which is
/// exactly what keeps the allocate/free path free of atomics and locks.
///
/// # Example
///
/// ```
/// use chainalloc::Allocator;
///
/// let mut allocator = Allocator::new();
///
/// let block = allocator.allocate(128)?;
/// assert_eq!(block.len(), 128);
///
/// allocator.free(block)?;
/// assert_eq!(allocator.used_memory(), 0);
/// # Ok::<(), chainalloc::AllocError>(())
/// ```
pub struct Allocator {
    /// The arena chain, in creation order. The last element is where grown
    /// and oversized arenas are appended.
    arenas: Vec<Arena>,
    /// Payload size the *next* grown arena starts doubling from.
    next_arena_size: usize,
    config: AllocatorConfig,
    /// Bytes currently taken by outstanding blocks, headers included.
    used: usize,
    /// High-water mark of `used`.
    peak: usize,
}

impl Allocator {
    /// An allocator with the default sizing (2048-byte starting arena,
    /// 40 MB growth ceiling).
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    /// An allocator with explicit sizing knobs.
    ///
    /// # Panics
    ///
    /// Panics if the starting size cannot hold even one split remainder, or
    /// if the ceiling is below the starting size.
    pub fn with_config(config: AllocatorConfig) -> Self {
        assert!(
            config.starting_arena_size > 2 * BLOCK_HEADER_SIZE,
            "starting arena size must exceed {} bytes",
            2 * BLOCK_HEADER_SIZE,
        );
        assert!(
            config.growth_ceiling >= config.starting_arena_size,
            "growth ceiling must not be below the starting arena size",
        );

        Self {
            arenas: Vec::new(),
            next_arena_size: config.starting_arena_size,
            config,
            used: 0,
            peak: 0,
        }
    }

    /// Allocates a block of `size` bytes.
    ///
    /// Searches the arena chain for the best-fitting free block, growing
    /// the chain when nothing fits. The only failure is
    /// [`AllocError::OutOfMemory`], propagated from the operating system
    /// when a new arena cannot be mapped.
    pub fn allocate(&mut self, size: usize) -> Result<Block, AllocError> {
        if self.arenas.is_empty() {
            self.next_arena_size = self.config.starting_arena_size;
            self.arenas.push(Arena::create(self.config.starting_arena_size)?);
        }

        // Oversized requests get a dedicated, exactly-sized arena instead
        // of competing for best-fit space; the search starts there.
        let mut search_from = 0;
        if size >= self.config.growth_ceiling {
            let needed = size
                .checked_add(BLOCK_HEADER_SIZE)
                .ok_or(AllocError::OutOfMemory { requested: size })?;
            self.arenas.push(Arena::create(needed)?);
            search_from = self.arenas.len() - 1;
        }

        let (index, fit) = match self.find_fit(search_from, size) {
            Some(found) => found,
            None => self.grow_for(size)?,
        };

        let ptr = self.arenas[index].take(fit, size);

        self.used += size + BLOCK_HEADER_SIZE;
        if self.used > self.peak {
            self.peak = self.used;
        }

        Ok(Block { ptr, len: size })
    }

    /// Frees a block previously returned by [`Allocator::allocate`] on this
    /// allocator, coalescing it with adjacent free neighbours and releasing
    /// its arena if the arena becomes entirely free.
    ///
    /// Returns [`AllocError::InvalidFree`] if no live arena contains the
    /// block.
    ///
    /// # Panics
    ///
    /// Panics if the block lands inside a live arena but overlaps memory
    /// already marked free, i.e. on a detected double free.
    pub fn free(&mut self, block: Block) -> Result<(), AllocError> {
        let address = block.as_ptr() as usize;
        let header = address
            .checked_sub(BLOCK_HEADER_SIZE)
            .ok_or(AllocError::InvalidFree { address })?;

        let index = self
            .arenas
            .iter()
            .position(|arena| arena.contains(header))
            .ok_or(AllocError::InvalidFree { address })?;

        self.arenas[index].release(header, block.len);

        if self.arenas[index].is_entirely_free() {
            // Detaching the arena drops its region back to the system. The
            // chain is a Vec, so head, tail and middle removals are all the
            // same operation.
            self.arenas.remove(index);
        }

        debug_assert!(self.used >= block.len + BLOCK_HEADER_SIZE);
        self.used -= block.len + BLOCK_HEADER_SIZE;

        Ok(())
    }

    /// High-water mark of bytes simultaneously in use by outstanding
    /// blocks, headers included. Monotonically non-decreasing.
    #[inline]
    pub fn peak_used_memory(&self) -> usize {
        self.peak
    }

    /// Bytes currently in use by outstanding blocks, headers included.
    #[inline]
    pub fn used_memory(&self) -> usize {
        self.used
    }

    /// Number of live arenas in the chain.
    #[inline]
    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// First-fit scan across arenas starting at `from`, best-fit within
    /// each arena.
    ///
    /// Arenas too small to ever hold `size` are skipped without scanning
    /// their free lists. The first arena producing any candidate ends the
    /// scan.
    fn find_fit(&self, from: usize, size: usize) -> Option<(usize, Fit)> {
        for (index, arena) in self.arenas.iter().enumerate().skip(from) {
            if arena.capacity() < size {
                continue;
            }

            if let Some(fit) = arena.best_fit(size) {
                return Some((index, fit));
            }
        }

        None
    }

    /// Appends a grown arena sized by the doubling policy and resolves the
    /// fit inside it.
    fn grow_for(&mut self, size: usize) -> Result<(usize, Fit), AllocError> {
        let needed = size
            .checked_add(BLOCK_HEADER_SIZE)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        loop {
            if self.next_arena_size > self.config.growth_ceiling {
                break;
            }
            self.next_arena_size *= 2;
            if self.next_arena_size >= needed {
                break;
            }
        }

        // The doubled size may land in the dead zone where the single free
        // span is neither an exact match nor splittable. Size the arena
        // exactly to the request in that case.
        let payload = if self.next_arena_size > needed + BLOCK_HEADER_SIZE {
            self.next_arena_size
        } else {
            needed
        };

        self.arenas.push(Arena::create(payload)?);

        let index = self.arenas.len() - 1;
        match self.arenas[index].best_fit(size) {
            Some(fit) => Ok((index, fit)),
            None => unreachable!("a freshly grown arena always fits the request"),
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}
