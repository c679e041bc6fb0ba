//! Fiber stacks.
//!
//! Each worker fiber owns one [`Stack`]: an anonymous private mapping sized
//! to a whole number of pages. The mapping is released exactly once, when
//! the `Stack` is dropped.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

/// Page size used when the OS does not report one.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Size of a memory page on this system.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            FALLBACK_PAGE_SIZE
        }
    })
}

/// An owned, fixed-size stack buffer.
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
}

impl Stack {
    /// Map a stack of at least `size` bytes, rounded up to whole pages.
    ///
    /// A zero `size` maps a single page.
    pub fn new(size: usize) -> io::Result<Stack> {
        let page = page_size();
        let size = size
            .max(1)
            .checked_next_multiple_of(page)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "stack size overflows"))?;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let base = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(Stack { base, size })
    }

    /// Lowest address of the stack.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Usable size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base.as_ptr().cast(), self.size) };
        if ret != 0 {
            log::error!(
                "munmap of {}-byte stack at {:p} failed: {}",
                self.size,
                self.base,
                io::Error::last_os_error()
            );
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}
