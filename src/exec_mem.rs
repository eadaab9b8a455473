//! # Executable Memory
//!
//! Owns one page-backed region of memory holding a machine-code stub.
//! On unix the region is mapped read+write and then flipped to
//! read+write+execute with `mprotect`; on Windows `VirtualAlloc` hands
//! it out executable from the start. The region is unmapped exactly
//! once, when the buffer is dropped.
//!
//! # Safety
//! Turning data into code is inherently unsafe. The unsafety is
//! confined to this module and to the [ExecutableBuffer::as_fn] escape
//! hatch, which the session module uses under a fixed calling
//! contract.

use std::ptr::NonNull;

#[cfg(unix)]
mod platform {
    use std::ptr;

    /// Map an anonymous read-write region of `size` bytes.
    pub unsafe fn alloc_code(size: usize) -> *mut u8 {
        let ptr = libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            ptr::null_mut()
        } else {
            ptr as *mut u8
        }
    }

    /// Add execute permission to a mapped region.
    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        libc::mprotect(
            ptr as *mut _,
            size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        ) == 0
    }

    /// Unmap the region. Returns false if the kernel rejected the
    /// unmap.
    pub unsafe fn free(ptr: *mut u8, size: usize) -> bool {
        libc::munmap(ptr as *mut _, size) == 0
    }
}

#[cfg(windows)]
mod platform {
    use std::ptr;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };

    /// Commit a read-write-execute region of `size` bytes.
    pub unsafe fn alloc_code(size: usize) -> *mut u8 {
        VirtualAlloc(
            ptr::null(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        ) as *mut u8
    }

    /// The region is already executable; nothing to do.
    pub unsafe fn make_executable(_ptr: *mut u8, _size: usize) -> bool {
        true
    }

    /// Release the region. Returns false if the call failed.
    pub unsafe fn free(ptr: *mut u8, _size: usize) -> bool {
        VirtualFree(ptr as *mut _, 0, MEM_RELEASE) != 0
    }
}

/// The executable-memory request failed. Carries the requested size
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationError {
    pub size: usize,
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Failed to allocate {} bytes of executable memory",
            self.size
        )
    }
}

impl std::error::Error for AllocationError {}

/// A region of executable memory holding one machine-code stub.
///
/// The buffer's length is exactly the length of the code it was built
/// from. Dropping the buffer releases the region; the single-owner
/// discipline makes a double release unrepresentable.
pub struct ExecutableBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl ExecutableBuffer {
    /// Allocate a region, copy `code` into it and make it executable.
    ///
    /// The returned buffer is ready to be called into; no caller can
    /// observe the region before the bytes are fully written. A
    /// non-null region that cannot be made executable is released
    /// again and reported as an allocation failure.
    pub fn with_code(code: &[u8]) -> Result<ExecutableBuffer, AllocationError> {
        let len = code.len();
        let error = AllocationError { size: len };

        let ptr = NonNull::new(unsafe { platform::alloc_code(len) }).ok_or(error.clone())?;

        // From here on the buffer owns the region, so every early
        // return releases it.
        let buf = ExecutableBuffer { ptr, len };

        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), len);
        }

        if !unsafe { platform::make_executable(ptr.as_ptr(), len) } {
            return Err(error);
        }

        Ok(buf)
    }

    /// The number of code bytes in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Base address of the region.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Reinterpret the base address as a function pointer.
    ///
    /// # Safety
    /// The code in the buffer must be valid for the signature `F`, and
    /// `F` must be a function pointer type.
    pub unsafe fn as_fn<F>(&self) -> F
    where
        F: Copy,
    {
        debug_assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const ()>(),
            "F must be a function pointer"
        );
        std::mem::transmute_copy(&self.ptr.as_ptr())
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        // A failed unmap is surfaced but the buffer still counts as
        // released; retrying would risk freeing a recycled mapping.
        if !unsafe { platform::free(self.ptr.as_ptr(), self.len) } {
            eprintln!(
                "Failed to release {} bytes of executable memory at {:p}",
                self.len,
                self.ptr.as_ptr()
            );
        }
    }
}
