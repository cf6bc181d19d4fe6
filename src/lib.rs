//! A best-fit pool allocator built on a chain of memory arenas.
//!
//! The operating system hands out memory in whole regions (`mmap` on
//! unix, `VirtualAlloc` on Windows), but callers want blocks of a few
//! dozen bytes. This crate bridges the two: it requests regions rarely,
//! carves them into variable-sized blocks, and recycles freed blocks
//! without talking to the kernel at all.
//!
//! The structure is a chain of arenas, each owning one region and an
//! address-ordered free list of the unused ranges inside it:
//!
//! ```text
//! +-----------------------------------------------+      +-----------------------------------------------+
//! |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
//! | Arena  | | Block | -> | Free  | -> | Block |  | ---> | Arena  | | Free  | -> | Block | -> | Free  |  |
//! |        | +-------+    +-------+    +-------+  |      |        | +-------+    +-------+    +-------+  |
//! +-----------------------------------------------+      +-----------------------------------------------+
//! ```
//!
//! Allocation is best-fit within an arena (exact matches win instantly)
//! and first-fit across the chain. When nothing fits, the chain grows by a
//! new arena of double the previous size, up to a configurable ceiling;
//! oversized requests get their own exactly-sized arena. Freed blocks
//! merge with physically adjacent free neighbours, and an arena whose
//! whole payload is free again goes back to the operating system.
//!
//! Unlike the classic embedded design, which threads block headers and
//! next-pointers through the region bytes themselves, all bookkeeping here
//! lives in typed side tables indexed by byte offsets. The caller-facing
//! memory is real mapped memory; the metadata never is.
//!
//! # Threading
//!
//! An [`Allocator`] belongs to one thread. Give every thread its own
//! instance and there is nothing to synchronize: no locks, no atomics, no
//! contention on the allocate/free path. [`Block`] is `!Send` so a block
//! cannot accidentally migrate to a thread that does not own its arena.

mod allocator;
mod arena;
mod freelist;
mod system;

pub use allocator::{AllocError, Allocator, AllocatorConfig, Block};
