use std::{
    any::TypeId,
    cell::RefCell,
    ffi::{CStr, CString, c_char, c_int},
    ops::ControlFlow,
    ptr,
    sync::Arc,
};

use super::{alloc::AllocState, interrupt::BreakState, state::State};
use crate::{
    registry::RefTable,
    util::fast_map::{FastHashMap, FastHashSet, fast_hash_set_new},
};

pub(crate) type InterruptCallback = Box<dyn FnMut(&State) -> ControlFlow<()>>;

/// Host-side data attached to a VM through its callback userdata slot.
pub(crate) struct ExtraData {
    pub(crate) id: u64,
    pub(crate) refs: RefCell<RefTable>,
    pub(crate) breaks: Arc<BreakState>,
    pub(crate) interrupt: RefCell<Option<InterruptCallback>>,
    /// Names handed to the VM as C-function debug names; the VM keeps the raw pointers.
    debug_names: RefCell<FastHashSet<Box<CStr>>>,
    /// Registry ids of the metatables of bound types.
    pub(crate) metatables: RefCell<FastHashMap<TypeId, c_int>>,
    alloc: *const AllocState,
}

impl ExtraData {
    pub(crate) fn new(id: u64, alloc: *const AllocState) -> Self {
        Self {
            id,
            refs: RefCell::new(RefTable::new(id)),
            breaks: Arc::new(BreakState::default()),
            interrupt: RefCell::new(None),
            debug_names: RefCell::new(fast_hash_set_new()),
            metatables: RefCell::new(FastHashMap::default()),
            alloc,
        }
    }

    #[inline]
    pub(crate) fn alloc(&self) -> &AllocState {
        // SAFETY: the allocation state is freed after the extra data.
        unsafe { &*self.alloc }
    }

    /// Stable C string for `name`, valid until the VM is closed. Names with interior NUL bytes
    /// get no debug name.
    pub(crate) fn debug_name(&self, name: &str) -> *const c_char {
        let Ok(owned) = CString::new(name) else {
            return ptr::null();
        };
        let mut names = self.debug_names.borrow_mut();
        if let Some(existing) = names.get(owned.as_c_str()) {
            return existing.as_ptr();
        }
        let boxed = owned.into_boxed_c_str();
        let ptr = boxed.as_ptr();
        names.insert(boxed);
        ptr
    }
}
