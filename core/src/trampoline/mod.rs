//! Adapters from typed Rust functions to the VM's C calling convention.
//!
//! Each registered function gets its own monomorphized `extern "C-unwind"` entry point. The
//! entry decodes every parameter with the checked policy, calls the Rust function, and encodes
//! the result. Decode failures, `Err` returns and panics are all turned into a script error
//! after every Rust value on the entry's frame has been dropped, so raising never skips a
//! destructor.

use std::{
    any::Any,
    ffi::{c_char, c_int, c_void},
    fmt::Display,
    mem,
    panic::{AssertUnwindSafe, catch_unwind},
    ptr::{self, NonNull},
};

use mlua_sys as ffi;
use tracing::{trace, warn};

use crate::{
    registry::FunctionHandle,
    val::{IntoStack, IntoStackMulti},
    vm::{HostFrameGuard, StackGuard, State},
};

mod args;
mod closure;

pub use args::{ArgError, FromArgs};
pub use closure::CapturedFunction;

/// Largest alignment the VM guarantees for userdata blocks.
const MAX_USERDATA_ALIGN: usize = 8;

/// A Rust function callable from script with parameter tuple `A` and result `R`.
///
/// Implemented for every `Fn(A1, .., An) -> R` with up to eight parameters.
pub trait HostFunction<A, R>: 'static {
    fn invoke(&self, args: A) -> R;
}

macro_rules! impl_host_function {
    ($($name:ident $idx:tt),*) => {
        impl<Func, Ret, $($name,)*> HostFunction<($($name,)*), Ret> for Func
        where
            Func: Fn($($name),*) -> Ret + 'static,
        {
            #[inline]
            #[allow(unused_variables, clippy::unused_unit)]
            fn invoke(&self, args: ($($name,)*)) -> Ret {
                self($(args.$idx),*)
            }
        }
    };
}

impl_host_function!();
impl_host_function!(A 0);
impl_host_function!(A 0, B 1);
impl_host_function!(A 0, B 1, C 2);
impl_host_function!(A 0, B 1, C 2, D 3);
impl_host_function!(A 0, B 1, C 2, D 3, E 4);
impl_host_function!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_host_function!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_host_function!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Values a host function may return.
///
/// Anything encodable as zero or more slots is returned as is; `Err(e)` of a `Result` is raised
/// as a script error carrying `e`'s `Display` text, and so is a value with no exact VM
/// representation.
pub trait IntoResults {
    fn push_results(self, state: &State) -> Result<c_int, String>;
}

#[inline]
fn push_checked<T: IntoStackMulti>(value: T, state: &State) -> Result<c_int, String> {
    value.encodable_multi().map_err(|err| err.to_string())?;
    Ok(value.push_multi(state))
}

impl<T: IntoStackMulti> IntoResults for T {
    #[inline]
    fn push_results(self, state: &State) -> Result<c_int, String> {
        push_checked(self, state)
    }
}

impl<T: IntoStackMulti, E: Display> IntoResults for Result<T, E> {
    #[inline]
    fn push_results(self, state: &State) -> Result<c_int, String> {
        match self {
            Ok(value) => push_checked(value, state),
            Err(err) => Err(err.to_string()),
        }
    }
}

/// A C function plus the value it reads from upvalue 1, ready to be pushed.
pub struct Trampoline {
    entry: ffi::lua_CFunction,
    upvalue: Option<Box<dyn FnOnce(&State)>>,
}

impl Trampoline {
    pub fn new<F, A, R>(function: F) -> Self
    where
        F: HostFunction<A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        Self::with_entry(function_entry::<F, A, R>, function)
    }

    /// Pair `entry` with `value`, which the entry reads back through [`stored`].
    pub(crate) fn with_entry<V: 'static>(entry: ffi::lua_CFunction, value: V) -> Self {
        if is_inline::<V>() {
            mem::forget(value);
            return Self { entry, upvalue: None };
        }
        Self {
            entry,
            upvalue: Some(Box::new(move |state: &State| {
                push_userdata(state, value);
            })),
        }
    }

    /// Push the function onto the stack as a C closure.
    pub(crate) fn push(self, state: &State, name: &str) {
        let debug_name = state.extra().debug_name(name);
        state.ensure_stack(2);
        let nup = match self.upvalue {
            Some(install) => {
                install(state);
                1
            }
            None => 0,
        };
        unsafe { ffi::lua_pushcclosurek(state.as_ptr(), self.entry, debug_name, nup, None) };
    }
}

/// Pushes an anonymous function, for storing host functions in tables.
impl IntoStack for Trampoline {
    fn push_into_stack(self, state: &State) {
        Trampoline::push(self, state, "<host>");
    }
}

/// Values with no size and no drop glue are conjured instead of stored.
#[inline(always)]
const fn is_inline<V>() -> bool {
    mem::size_of::<V>() == 0 && !mem::needs_drop::<V>()
}

/// Move `value` into a new VM userdata block on top of the stack. The VM runs `V`'s destructor
/// when it collects the block.
pub(crate) fn push_userdata<V: 'static>(state: &State, value: V) -> *mut V {
    const { assert!(mem::align_of::<V>() <= MAX_USERDATA_ALIGN, "over-aligned userdata") };
    let l = state.as_ptr();
    state.ensure_stack(1);
    unsafe {
        let block = if mem::needs_drop::<V>() {
            ffi::lua_newuserdatadtor(l, mem::size_of::<V>(), drop_userdata::<V>)
        } else {
            ffi::lua_newuserdata(l, mem::size_of::<V>())
        } as *mut V;
        ptr::write(block, value);
        block
    }
}

unsafe extern "C-unwind" fn drop_userdata<V>(block: *mut c_void) {
    let dropped = catch_unwind(AssertUnwindSafe(|| unsafe { ptr::drop_in_place(block as *mut V) }));
    if dropped.is_err() {
        warn!(ty = std::any::type_name::<V>(), "destructor panicked during collection");
    }
}

/// The value a trampoline was created with.
///
/// # Safety
///
/// Must be called from inside a C function pushed by [`Trampoline::push`] whose value has
/// type `V`.
#[inline(always)]
pub(crate) unsafe fn stored<'a, V: 'static>(l: *mut ffi::lua_State) -> &'a V {
    if is_inline::<V>() {
        unsafe { NonNull::<V>::dangling().as_ref() }
    } else {
        unsafe { &*(ffi::lua_touserdata(l, ffi::lua_upvalueindex(1)) as *const V) }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    warn!(detail, "host function panicked");
    format!("host function panicked: {detail}")
}

/// Run one host call: decode, invoke and encode inside `body`, catching panics.
#[inline]
pub(crate) fn run_host<R, F>(state: &State, body: F) -> Result<c_int, String>
where
    R: IntoResults,
    F: FnOnce() -> Result<R, String>,
{
    let _frame = HostFrameGuard::new(state);
    let value = catch_unwind(AssertUnwindSafe(body)).map_err(panic_message)??;
    value.push_results(state)
}

/// Return `outcome` to the VM, raising it as a script error if it failed.
#[inline]
pub(crate) unsafe fn finish(l: *mut ffi::lua_State, outcome: Result<c_int, String>) -> c_int {
    match outcome {
        Ok(nresults) => nresults,
        Err(message) => unsafe { raise_error(l, message) },
    }
}

/// Raise `message` as a script error prefixed with the calling script position.
#[cold]
pub(crate) unsafe fn raise_error(l: *mut ffi::lua_State, message: String) -> ! {
    trace!(%message, "raising script error");
    unsafe {
        ffi::lua_checkstack(l, 2);
        ffi::luaL_where(l, 1);
        ffi::lua_pushlstring(l, message.as_ptr() as *const c_char, message.len());
        drop(message);
        ffi::lua_concat(l, 2);
        ffi::lua_error(l)
    }
}

unsafe extern "C-unwind" fn function_entry<F, A, R>(l: *mut ffi::lua_State) -> c_int
where
    F: HostFunction<A, R>,
    A: FromArgs,
    R: IntoResults,
{
    let outcome = {
        let state = unsafe { State::from_raw(l) };
        let function = unsafe { stored::<F>(l) };
        run_host(&state, || {
            let args = A::from_args(&state, 1, 0).map_err(|err| err.to_string())?;
            Ok(function.invoke(args))
        })
    };
    unsafe { finish(l, outcome) }
}

impl State {
    /// Expose `function` as the global `name`.
    pub fn register_fn<F, A, R>(&self, name: &str, function: F)
    where
        F: HostFunction<A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        self.set_global_function(name, Trampoline::new(function));
    }

    /// Wrap `function` as a script function and root it.
    pub fn create_function<F, A, R>(&self, function: F) -> FunctionHandle
    where
        F: HostFunction<A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        self.root_function("<host>", Trampoline::new(function))
    }

    pub(crate) fn set_global_function(&self, name: &str, trampoline: Trampoline) {
        let _guard = StackGuard::new(self);
        self.ensure_stack(1);
        name.push_into_stack(self);
        trampoline.push(self, name);
        unsafe { ffi::lua_rawset(self.as_ptr(), ffi::LUA_GLOBALSINDEX) };
        trace!(name, "host function registered");
    }

    pub(crate) fn root_function(&self, name: &str, trampoline: Trampoline) -> FunctionHandle {
        let _guard = StackGuard::new(self);
        trampoline.push(self, name);
        FunctionHandle::from_reference(self.register(-1))
    }
}

#[cfg(test)]
mod trampoline_test;
