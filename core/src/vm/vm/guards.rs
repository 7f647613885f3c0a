use std::{cell::Cell, ffi::c_int, ptr};

use mlua_sys as ffi;

use crate::vm::{alloc::AllocState, interrupt::BreakState, state::State};

/// Restores the stack top when dropped.
pub(crate) struct StackGuard<'a> {
    state: &'a State,
    top: c_int,
}

impl<'a> StackGuard<'a> {
    #[inline]
    pub(crate) fn new(state: &'a State) -> Self {
        Self {
            state,
            top: state.top(),
        }
    }
}

impl Drop for StackGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.state.set_top(self.top);
    }
}

/// Turns the memory limit on or off until dropped, then restores the previous setting.
pub(crate) struct LimitScope<'a> {
    alloc: &'a AllocState,
    prev: bool,
}

impl<'a> LimitScope<'a> {
    /// Script code is about to run under a protected call.
    #[inline]
    pub(crate) fn enforce(state: &'a State) -> Self {
        Self::set(state, true)
    }

    /// Host code is about to run and must not see refused allocations.
    #[inline]
    pub(crate) fn relax(state: &'a State) -> Self {
        Self::set(state, false)
    }

    #[inline]
    fn set(state: &'a State, on: bool) -> Self {
        let alloc = state.extra().alloc();
        Self {
            alloc,
            prev: alloc.set_enforcing(on),
        }
    }
}

impl Drop for LimitScope<'_> {
    #[inline]
    fn drop(&mut self) {
        self.alloc.set_enforcing(self.prev);
    }
}

thread_local! {
    static CURRENT_STATE: Cell<*mut ffi::lua_State> = const { Cell::new(ptr::null_mut()) };
}

/// Marks a host function frame as active for the lifetime of the guard.
///
/// While any such frame is live, break requests are rejected and [`with_current_state`]
/// resolves to the innermost frame's state. The memory limit is relaxed for the frame.
pub(crate) struct HostFrameGuard<'a> {
    breaks: &'a BreakState,
    prev: *mut ffi::lua_State,
    _limit: LimitScope<'a>,
}

impl<'a> HostFrameGuard<'a> {
    #[inline]
    pub(crate) fn new(state: &'a State) -> Self {
        let breaks = &*state.extra().breaks;
        breaks.enter_host();
        let prev = CURRENT_STATE.with(|cell| cell.replace(state.as_ptr()));
        Self {
            breaks,
            prev,
            _limit: LimitScope::relax(state),
        }
    }
}

impl Drop for HostFrameGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        CURRENT_STATE.with(|cell| cell.set(self.prev));
        self.breaks.leave_host();
    }
}

/// Run `f` against the state of the innermost host function currently executing on this
/// thread. Returns `None` outside of a host function call.
pub fn with_current_state<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&State) -> R,
{
    let raw = CURRENT_STATE.with(Cell::get);
    if raw.is_null() {
        None
    } else {
        // SAFETY: the pointer is set only while a HostFrameGuard for that state is alive.
        let state = unsafe { State::from_raw(raw) };
        Some(f(&state))
    }
}
