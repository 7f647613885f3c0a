use std::{
    alloc::{self, Layout},
    cell::Cell,
    ffi::c_void,
    ptr,
};

use tracing::trace;

/// Alignment handed to the VM; matches what `malloc` guarantees on 64-bit targets.
const ALIGN: usize = 16;

/// Memory source for a VM instance.
///
/// The VM owns its allocator, so the allocator always outlives every block it handed out.
pub trait Allocator: 'static {
    /// Resize the block at `ptr` from `old_size` to `new_size` bytes.
    ///
    /// A null `ptr` requests a fresh block, a zero `new_size` frees the block (the return value
    /// is then ignored). Returning null on a non-zero request reports allocation failure to the
    /// VM, which surfaces as [`Error::OutOfMemory`](crate::Error::OutOfMemory).
    ///
    /// # Safety
    ///
    /// `ptr` is either null or a block previously returned by this allocator whose current size
    /// is `old_size`.
    unsafe fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8;
}

/// [`Allocator`] backed by the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    unsafe fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        unsafe {
            if new_size == 0 {
                if !ptr.is_null() && old_size != 0 {
                    alloc::dealloc(ptr, Layout::from_size_align_unchecked(old_size, ALIGN));
                }
                return ptr::null_mut();
            }
            let Ok(new_layout) = Layout::from_size_align(new_size, ALIGN) else {
                return ptr::null_mut();
            };
            if ptr.is_null() || old_size == 0 {
                alloc::alloc(new_layout)
            } else {
                alloc::realloc(ptr, Layout::from_size_align_unchecked(old_size, ALIGN), new_size)
            }
        }
    }
}

/// Per-VM allocation bookkeeping; passed to the VM as the allocator's opaque pointer.
///
/// The limit applies only while script code runs under a protected call or resume made by this
/// crate. Host-side pushes happen outside any protected call, where a refused allocation would
/// raise through host frames, so they draw on the underlying allocator alone.
pub(crate) struct AllocState {
    allocator: Box<dyn Allocator>,
    limit: Option<usize>,
    enforcing: Cell<bool>,
    used: Cell<usize>,
    peak: Cell<usize>,
    failures: Cell<u64>,
}

impl AllocState {
    pub(crate) fn new(allocator: Box<dyn Allocator>, limit: Option<usize>) -> Self {
        Self {
            allocator,
            limit,
            enforcing: Cell::new(false),
            used: Cell::new(0),
            peak: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    pub(crate) fn used(&self) -> usize {
        self.used.get()
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.get()
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures.get()
    }

    /// Switch limit enforcement, returning the previous setting.
    #[inline]
    pub(crate) fn set_enforcing(&self, on: bool) -> bool {
        self.enforcing.replace(on)
    }
}

/// `lua_Alloc` entry point. Never unwinds.
pub(crate) unsafe extern "C-unwind" fn alloc_proc(
    ud: *mut c_void,
    ptr: *mut c_void,
    osize: usize,
    nsize: usize,
) -> *mut c_void {
    // SAFETY: `ud` is the AllocState installed by `Vm::with_options`, which outlives the state.
    let state = unsafe { &*(ud as *const AllocState) };
    let old = if ptr.is_null() { 0 } else { osize };
    let used = state.used.get() - old.min(state.used.get());

    if nsize == 0 {
        if !ptr.is_null() {
            unsafe { state.allocator.realloc(ptr as *mut u8, old, 0) };
        }
        state.used.set(used);
        return ptr::null_mut();
    }

    if let Some(limit) = state.limit
        && state.enforcing.get()
        && used.saturating_add(nsize) > limit
    {
        state.failures.set(state.failures.get() + 1);
        trace!(requested = nsize, in_use = used, limit, "allocation refused by memory limit");
        return ptr::null_mut();
    }

    let block = unsafe { state.allocator.realloc(ptr as *mut u8, old, nsize) };
    if block.is_null() {
        state.failures.set(state.failures.get() + 1);
        trace!(requested = nsize, "allocator returned null");
        return ptr::null_mut();
    }
    let now = used + nsize;
    state.used.set(now);
    if now > state.peak.get() {
        state.peak.set(now);
    }
    block as *mut c_void
}
