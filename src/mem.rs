//! Memory-protection adapter.
//!
//! Patching code in the running image needs the covering pages to be
//! readable, writable and executable at once. [`make_rwx`] requests exactly
//! that from the OS; [`write_bytes`] relaxes both the destination and the
//! source (the source occasionally lives in code too) before copying.
//!
//! Protection failure is fatal: a process that cannot unprotect its own
//! image cannot do its job, so these functions panic with the OS error
//! instead of returning one.
//!
//! No instruction-cache flush is performed after a write: on x86 the I-cache
//! is coherent with the D-cache. Other architectures are out of scope.

/// Host page size in bytes.
#[cfg(unix)]
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Makes `len` bytes at `addr` readable, writable and executable.
///
/// The range is widened to page granularity: `addr` is aligned down and the
/// length expanded so every touched page is covered.
///
/// # Safety
///
/// `addr..addr + len` must lie inside a mapped region of this process.
#[cfg(unix)]
pub unsafe fn make_rwx(addr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }

    // mprotect wants the start of the page, not the address itself.
    let page = page_size();
    let page_start = (addr as usize) & !(page - 1);
    let span = (addr as usize) + len - page_start;

    let rc = libc::mprotect(
        page_start as *mut libc::c_void,
        span,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
    );
    if rc != 0 {
        panic!(
            "mprotect(RWX) failed for {:#x}..{:#x}: {}",
            page_start,
            page_start + span,
            std::io::Error::last_os_error()
        );
    }
}

/// Makes `len` bytes at `addr` readable, writable and executable.
///
/// # Safety
///
/// `addr..addr + len` must lie inside a committed region of this process.
#[cfg(windows)]
pub unsafe fn make_rwx(addr: *mut u8, len: usize) {
    use windows::Win32::System::Memory::{
        VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
    };

    if len == 0 {
        return;
    }

    // VirtualProtect is already page-granular over the whole span.
    let mut old = PAGE_PROTECTION_FLAGS::default();
    if let Err(e) = VirtualProtect(addr as *const _, len, PAGE_EXECUTE_READWRITE, &mut old) {
        panic!("VirtualProtect(RWX) failed for {addr:p}+{len:#x}: {e}");
    }
}

/// Copies `len` bytes from `src` over `dst`, relaxing protection on both
/// ranges first.
///
/// # Safety
///
/// Both ranges must be mapped in this process and must not overlap. If `dst`
/// is live code, the caller must ensure no other thread is executing it.
pub unsafe fn write_bytes(dst: *mut u8, src: *const u8, len: usize) {
    if len == 0 {
        return;
    }
    make_rwx(dst, len);
    make_rwx(src as *mut u8, len);
    std::ptr::copy_nonoverlapping(src, dst, len);
}

/// A fixed byte range inside the process image.
///
/// All reads and writes of region memory funnel through this type, so the
/// bounds check and the protection requirement live in exactly one place.
/// The range does not own its memory; it references the host image.
#[derive(Debug, Clone, Copy)]
pub struct CodeRange {
    ptr: *mut u8,
    len: usize,
}

impl CodeRange {
    /// Wraps a raw range. Dereferencing only happens in [`snapshot`] and
    /// [`write`], which are unsafe.
    ///
    /// [`snapshot`]: CodeRange::snapshot
    /// [`write`]: CodeRange::write
    pub fn new(ptr: *mut u8, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Base address of the range.
    pub fn addr(&self) -> *mut u8 {
        self.ptr
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the current contents of the range out.
    ///
    /// # Safety
    ///
    /// The range must be mapped and readable.
    pub unsafe fn snapshot(&self) -> Vec<u8> {
        std::slice::from_raw_parts(self.ptr, self.len).to_vec()
    }

    /// Overwrites the range with `bytes`, relaxing protection first.
    ///
    /// `bytes` must be exactly as long as the range; writing a region is
    /// all-or-nothing.
    ///
    /// # Safety
    ///
    /// The range must be mapped, and no other thread may be executing it.
    pub unsafe fn write(&self, bytes: &[u8]) {
        assert_eq!(
            bytes.len(),
            self.len,
            "region write must cover the whole range"
        );
        write_bytes(self.ptr, bytes.as_ptr(), self.len);
    }
}
