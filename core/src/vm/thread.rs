use std::{
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use mlua_sys as ffi;
use tracing::trace;

use super::{
    state::State,
    vm::{LimitScope, StackGuard},
};
use crate::{
    error::{Error, Result},
    registry::{FunctionHandle, Reference},
    val::{FromStackMulti, IntoStackMulti},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Not started yet, or stopped at a yield.
    Suspended,
    Running,
    /// Resumed another thread and is waiting for it.
    Normal,
    Finished,
    /// Stopped by an error; cannot be resumed.
    Error,
}

/// A coroutine with its own stack, sharing globals and the registry with the VM that created
/// it.
///
/// The thread is rooted like any other handle and must be released with
/// [`Thread::release`].
#[derive(Debug)]
pub struct Thread {
    reference: Reference,
    raw: NonNull<ffi::lua_State>,
}

impl State {
    /// Create a suspended coroutine that runs `function` on its first resume.
    pub fn new_thread(&self, function: &FunctionHandle) -> Result<Thread> {
        let l = self.as_ptr();
        let _guard = StackGuard::new(self);
        self.ensure_stack(2);
        let co = unsafe { ffi::lua_newthread(l) };
        let raw = NonNull::new(co).ok_or(Error::OutOfMemory)?;
        if !self.push_reference(function.reference()) {
            return Err(Error::InvalidHandle);
        }
        unsafe { ffi::lua_xmove(l, co, 1) };
        let reference = self.register(-1);
        trace!(?reference, "thread created");
        Ok(Thread { reference, raw })
    }
}

impl Thread {
    fn view(&self) -> State {
        // SAFETY: the thread object is rooted by `reference` for as long as it is valid.
        unsafe { State::from_raw(self.raw.as_ptr()) }
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn status(&self, state: &State) -> ThreadStatus {
        if !state.is_valid(self.reference) {
            return ThreadStatus::Error;
        }
        let co = self.view();
        if co.as_ptr() == state.as_ptr() {
            return ThreadStatus::Running;
        }
        match unsafe { ffi::lua_status(co.as_ptr()) } {
            ffi::LUA_YIELD => ThreadStatus::Suspended,
            ffi::LUA_OK => {
                // An active call frame means it resumed another thread and is waiting on it.
                let mut ar = MaybeUninit::<ffi::lua_Debug>::zeroed();
                if unsafe { ffi::lua_getinfo(co.as_ptr(), 0, c"".as_ptr(), ar.as_mut_ptr()) } != 0 {
                    ThreadStatus::Normal
                } else if co.top() > 0 {
                    ThreadStatus::Suspended
                } else {
                    ThreadStatus::Finished
                }
            }
            _ => ThreadStatus::Error,
        }
    }

    /// Resume the thread with `args`, returning the values it yields or returns.
    pub fn resume<A, R>(&self, state: &State, args: A) -> Result<R>
    where
        A: IntoStackMulti,
        R: FromStackMulti,
    {
        if !state.is_valid(self.reference) {
            return Err(Error::InvalidHandle);
        }
        match self.status(state) {
            ThreadStatus::Suspended => {}
            status => return Err(Error::ThreadNotResumable(status)),
        }
        let co = self.view();
        args.encodable_multi()?;
        let nargs = args.push_multi(&co);
        let status = {
            let _limit = LimitScope::enforce(state);
            unsafe { ffi::lua_resume(co.as_ptr(), state.as_ptr(), nargs, ptr::null_mut()) }
        };
        if let Err(err) = co.finish_call(status) {
            co.set_top(0);
            return Err(err);
        }
        let result = R::from_stack_multi(&co, 1);
        co.set_top(0);
        Ok(result?)
    }

    /// Unroot the thread. Idempotent.
    pub fn release(&self, state: &State) {
        state.release(self.reference);
    }
}
