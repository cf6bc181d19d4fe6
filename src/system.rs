use std::ptr::NonNull;

use crate::allocator::AllocError;

/// This trait provides an abstraction to handle the low level memory
/// syscalls. The allocator, as the top level view of this, has nothing
/// to do with the concrete APIs offered by each operating system.
trait PlatformMemory {
    /// Requests a memory region of `len` bytes. Returns a pointer to the
    /// the mapped location or `None` if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting at `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);
}

/// Platform entry point. The concrete [`PlatformMemory`] implementation is
/// selected at compile time below.
struct Platform;

/// One contiguous memory region obtained from the operating system.
///
/// `SystemRegion` is the RAII owner of the mapping: the region stays mapped
/// exactly as long as this value is alive and is returned to the kernel on
/// drop. Everything else in the crate refers to bytes of the region through
/// offsets relative to [`SystemRegion::base`], never through stored raw
/// pointers, so dropping the region cannot leave dangling metadata behind.
pub(crate) struct SystemRegion {
    addr: NonNull<u8>,
    len: usize,
}

impl SystemRegion {
    /// Requests a fresh region of exactly `len` bytes.
    ///
    /// Propagates [`AllocError::OutOfMemory`] if the kernel cannot satisfy
    /// the mapping. There is no retry, the caller decides what to do.
    pub fn request(len: usize) -> Result<Self, AllocError> {
        let addr = unsafe { Platform::request_memory(len) }
            .ok_or(AllocError::OutOfMemory { requested: len })?;

        Ok(Self { addr, len })
    }

    /// Start address of the region as an integer, used for address-range
    /// ownership checks and for turning span offsets into user pointers.
    #[inline]
    pub fn base(&self) -> usize {
        self.addr.as_ptr() as usize
    }

    /// Size of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer to the byte at `offset`.
    ///
    /// Callers must only pass offsets inside the region (one past the end
    /// is allowed, for zero-sized blocks at the very tail); this is checked
    /// here so a metadata bug surfaces as a panic instead of an out of
    /// bounds pointer.
    #[inline]
    pub fn at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len, "offset {offset} outside region of {} bytes", self.len);

        // Within the mapping, so the addition cannot leave the allocated
        // object and the result is never null.
        unsafe { NonNull::new_unchecked(self.addr.as_ptr().add(offset)) }
    }
}

impl Drop for SystemRegion {
    fn drop(&mut self) {
        unsafe { Platform::return_memory(self.addr.as_ptr(), self.len) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Platform, PlatformMemory};

    use libc::{mmap, munmap, size_t};

    use std::{
        os::raw::c_void,
        ptr::{self, NonNull},
    };

    impl PlatformMemory for Platform {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Anonymous private mapping with no backing file; the kernel
            // picks the address.
            let prot = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            unsafe {
                match mmap(ptr::null_mut(), len as size_t, prot, flags, -1, 0) {
                    libc::MAP_FAILED => None,
                    addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr.cast::<c_void>(), len as size_t);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::{Platform, PlatformMemory};

    use std::{os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::Memory;

    impl PlatformMemory for Platform {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Reserve and commit in one step, with the same read/write
            // protection the unix mapping gets.
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, Memory::PAGE_READWRITE);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            // Releasing a whole reservation requires a zero size.
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }
    }
}
