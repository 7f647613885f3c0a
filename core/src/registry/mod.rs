//! Host-held handles to VM values.
//!
//! A [`Reference`] never stores an address. It names a slot in the per-VM [`RefTable`], and the
//! slot holds a VM registry id that keeps the value alive. Each slot carries a generation that
//! is bumped on release, so a released or foreign handle is detected instead of aliasing
//! whatever reuses the slot.

use std::{ffi::c_int, mem};

use mlua_sys as ffi;
use tracing::{trace, warn};

use crate::{
    error::DecodeError,
    val::{FromStack, IntoStack, SlotType},
    vm::State,
};

mod handles;

pub use handles::{FunctionHandle, TableHandle};

const GLOBALS_SLOT: u32 = u32::MAX;

/// Opaque capability for a VM value rooted by the host.
///
/// Every handle returned by [`State::register`] (or decoded from the stack) must be paired with
/// one [`State::release`]. [`Reference::GLOBALS`] is permanent and never needs releasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    vm: u64,
    slot: u32,
    generation: u32,
}

impl Reference {
    /// The VM's global table.
    pub const GLOBALS: Reference = Reference {
        vm: 0,
        slot: GLOBALS_SLOT,
        generation: 0,
    };

    #[inline]
    pub fn is_globals(&self) -> bool {
        self.slot == GLOBALS_SLOT
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    /// VM registry id while the slot is occupied.
    registry_id: Option<c_int>,
}

/// Per-VM table of rooted values.
#[derive(Debug)]
pub(crate) struct RefTable {
    vm: u64,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// References rooted since the innermost open composite decode.
    journal: Option<Vec<Reference>>,
}

impl RefTable {
    pub(crate) fn new(vm: u64) -> Self {
        Self {
            vm,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            journal: None,
        }
    }

    fn insert(&mut self, registry_id: c_int) -> Reference {
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize].registry_id = Some(registry_id);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    registry_id: Some(registry_id),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.live += 1;
        let reference = Reference {
            vm: self.vm,
            slot,
            generation: self.slots[slot as usize].generation,
        };
        if let Some(journal) = &mut self.journal {
            journal.push(reference);
        }
        reference
    }

    fn lookup(&self, reference: Reference) -> Option<c_int> {
        if reference.vm != self.vm {
            return None;
        }
        let slot = self.slots.get(reference.slot as usize)?;
        if slot.generation != reference.generation {
            return None;
        }
        slot.registry_id
    }

    fn remove(&mut self, reference: Reference) -> Option<c_int> {
        let registry_id = self.lookup(reference)?;
        let slot = &mut self.slots[reference.slot as usize];
        slot.registry_id = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(reference.slot);
        self.live -= 1;
        Some(registry_id)
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    /// Start recording new references. Returns the enclosing recording, if any.
    fn open_journal(&mut self) -> Option<Vec<Reference>> {
        self.journal.replace(Vec::new())
    }

    /// Stop recording and restore `outer`. A kept recording is folded into `outer`, so an
    /// enclosing decode that fails later still sees it; a discarded one is returned.
    fn close_journal(&mut self, outer: Option<Vec<Reference>>, keep: bool) -> Vec<Reference> {
        let mut recorded = mem::replace(&mut self.journal, outer).unwrap_or_default();
        if keep {
            if let Some(outer) = &mut self.journal {
                outer.append(&mut recorded);
            }
            recorded.clear();
        }
        recorded
    }
}

impl State {
    /// Root the value at `index` without popping it.
    pub fn register(&self, index: c_int) -> Reference {
        let registry_id = unsafe { ffi::lua_ref(self.as_ptr(), index) };
        let reference = self.extra().refs.borrow_mut().insert(registry_id);
        trace!(?reference, registry_id, "reference registered");
        reference
    }

    /// Unroot `reference`. Releasing the globals handle, a handle that was already released, or
    /// a handle from another VM does nothing. Returns whether a value was unrooted.
    pub fn release(&self, reference: Reference) -> bool {
        if reference.is_globals() {
            return false;
        }
        let removed = self.extra().refs.borrow_mut().remove(reference);
        match removed {
            Some(registry_id) => {
                unsafe { ffi::lua_unref(self.as_ptr(), registry_id) };
                trace!(?reference, "reference released");
                true
            }
            None => {
                trace!(?reference, "stale release ignored");
                false
            }
        }
    }

    pub fn is_valid(&self, reference: Reference) -> bool {
        reference.is_globals() || self.extra().refs.borrow().lookup(reference).is_some()
    }

    /// Push the referenced value. An invalid handle pushes nil and returns `false`.
    pub fn push_reference(&self, reference: Reference) -> bool {
        let l = self.as_ptr();
        self.ensure_stack(1);
        if reference.is_globals() {
            unsafe { ffi::lua_pushvalue(l, ffi::LUA_GLOBALSINDEX) };
            return true;
        }
        let registry_id = self.extra().refs.borrow().lookup(reference);
        match registry_id {
            Some(registry_id) => {
                unsafe { ffi::lua_rawgeti(l, ffi::LUA_REGISTRYINDEX, registry_id) };
                true
            }
            None => {
                warn!(?reference, "pushing invalid reference as nil");
                unsafe { ffi::lua_pushnil(l) };
                false
            }
        }
    }

    /// Run a decode that may root several values. If it fails, everything it rooted is
    /// released again, since the caller never receives those handles.
    pub(crate) fn decode_rooted<T, E>(&self, roots: bool, decode: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        if !roots {
            return decode();
        }
        let outer = self.extra().refs.borrow_mut().open_journal();
        let result = decode();
        let discarded = self.extra().refs.borrow_mut().close_journal(outer, result.is_ok());
        if !discarded.is_empty() {
            trace!(count = discarded.len(), "releasing handles from a failed decode");
        }
        for reference in discarded {
            self.release(reference);
        }
        result
    }

    /// Number of handles currently rooted by the host, not counting the globals handle.
    pub fn live_references(&self) -> usize {
        self.extra().refs.borrow().live()
    }
}

impl IntoStack for Reference {
    #[inline]
    fn push_into_stack(self, state: &State) {
        state.push_reference(self);
    }
}

impl IntoStack for &Reference {
    #[inline]
    fn push_into_stack(self, state: &State) {
        state.push_reference(*self);
    }
}

/// Decoding roots the slot's value; the caller owns the new handle.
impl FromStack for Reference {
    const EXPECTED: &'static str = "value";
    const ROOTS: bool = true;

    fn from_stack(state: &State, index: c_int) -> Result<Self, DecodeError> {
        match state.slot_type(index) {
            SlotType::None => Err(DecodeError::mismatch(Self::EXPECTED, SlotType::None)),
            _ => Ok(state.register(index)),
        }
    }
}
