//! Cooperative break requests and the step callback.
//!
//! Both are driven by the VM's interrupt hook, which runs at safepoints (loop back edges,
//! calls and returns). A break is honoured only while no host function frame is active, so a
//! host function that calls back into script can never have its caller torn down underneath it.

use std::{
    ffi::{c_int, c_void},
    ops::ControlFlow,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use mlua_sys as ffi;
use tracing::{debug, warn};

use super::{state::State, vm::LimitScope};
use crate::{
    error::{Error, Result},
    val::SlotType,
};

/// Error value raised by the hook; identified by address.
static BREAK_SENTINEL: u8 = 0;

#[inline]
fn sentinel_ptr() -> *mut c_void {
    &BREAK_SENTINEL as *const u8 as *mut c_void
}

pub(crate) fn is_break_sentinel(state: &State, index: c_int) -> bool {
    state.slot_type(index) == SlotType::LightUserdata && state.userdata_ptr(index) == sentinel_ptr()
}

#[derive(Debug, Default)]
pub(crate) struct BreakState {
    pending: AtomicBool,
    host_depth: AtomicUsize,
}

impl BreakState {
    #[inline]
    pub(crate) fn enter_host(&self) {
        self.host_depth.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn leave_host(&self) {
        self.host_depth.fetch_sub(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn host_depth(&self) -> usize {
        self.host_depth.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }

    fn should_break(&self) -> bool {
        self.host_depth() == 0 && self.pending.load(Ordering::Acquire)
    }
}

/// Handle for interrupting a running VM from any thread.
///
/// The request stays pending until the outermost host call into the VM returns; that call
/// reports [`Error::Interrupted`] if the script was stopped by it.
#[derive(Debug, Clone)]
pub struct BreakSignal {
    inner: Arc<BreakState>,
}

impl BreakSignal {
    /// Ask the VM to stop at its next safepoint.
    ///
    /// Rejected with [`Error::BreakRejected`] while a host function is running on the VM's
    /// call stack.
    pub fn request(&self) -> Result<()> {
        let depth = self.inner.host_depth();
        if depth > 0 {
            debug!(depth, "break rejected inside host frame");
            return Err(Error::BreakRejected { depth });
        }
        self.inner.pending.store(true, Ordering::Release);
        debug!("break requested");
        Ok(())
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Withdraw a request that has not been honoured yet.
    pub fn cancel(&self) {
        self.inner.clear();
    }
}

impl State {
    pub fn break_signal(&self) -> BreakSignal {
        BreakSignal {
            inner: Arc::clone(&self.extra().breaks),
        }
    }

    /// Install a callback run at every VM safepoint. Returning `ControlFlow::Break(())` stops
    /// the running script with [`Error::Interrupted`].
    pub fn set_interrupt<F>(&self, callback: F)
    where
        F: FnMut(&State) -> ControlFlow<()> + 'static,
    {
        *self.extra().interrupt.borrow_mut() = Some(Box::new(callback));
    }

    pub fn clear_interrupt(&self) {
        self.extra().interrupt.borrow_mut().take();
    }
}

pub(crate) unsafe extern "C-unwind" fn interrupt_proc(l: *mut ffi::lua_State, gc: c_int) {
    // GC safepoints cannot raise errors.
    if gc >= 0 {
        return;
    }
    let state = unsafe { State::from_raw(l) };
    let stop = {
        let extra = state.extra();
        if extra.breaks.should_break() {
            true
        } else if let Ok(mut slot) = extra.interrupt.try_borrow_mut()
            && let Some(callback) = slot.as_mut()
        {
            let _limit = LimitScope::relax(&state);
            match catch_unwind(AssertUnwindSafe(|| callback(&state))) {
                Ok(flow) => flow.is_break(),
                Err(_) => {
                    warn!("interrupt callback panicked; stopping script");
                    true
                }
            }
        } else {
            false
        }
    };
    if stop {
        unsafe {
            // Safepoints run with no spare stack slot reserved.
            ffi::lua_checkstack(l, 1);
            ffi::lua_pushlightuserdata(l, sentinel_ptr());
            ffi::lua_error(l);
        }
    }
}
