use std::ffi::c_int;

use mlua_sys as ffi;

use super::{FromArgs, IntoResults, Trampoline, finish, run_host, stored};
use crate::{registry::FunctionHandle, vm::State};

/// A Rust function that receives captured state ahead of its script-visible parameters.
///
/// Implemented for every `Fn(&S, A1, .., An) -> R` with up to eight parameters after the
/// captured state. The state lives in VM memory next to the function and is only reachable
/// through the `&S` handed to each call.
pub trait CapturedFunction<S, A, R>: 'static {
    fn invoke(&self, captured: &S, args: A) -> R;
}

macro_rules! impl_captured_function {
    ($($name:ident $idx:tt),*) => {
        impl<Func, Cap, Ret, $($name,)*> CapturedFunction<Cap, ($($name,)*), Ret> for Func
        where
            Func: Fn(&Cap, $($name),*) -> Ret + 'static,
        {
            #[inline]
            #[allow(unused_variables)]
            fn invoke(&self, captured: &Cap, args: ($($name,)*)) -> Ret {
                self(captured, $(args.$idx),*)
            }
        }
    };
}

impl_captured_function!();
impl_captured_function!(A 0);
impl_captured_function!(A 0, B 1);
impl_captured_function!(A 0, B 1, C 2);
impl_captured_function!(A 0, B 1, C 2, D 3);
impl_captured_function!(A 0, B 1, C 2, D 3, E 4);
impl_captured_function!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_captured_function!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_captured_function!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Captured state and the function that reads it, stored together as one userdata block.
struct ClosureDescriptor<S, F> {
    captured: S,
    function: F,
}

unsafe extern "C-unwind" fn closure_entry<S, F, A, R>(l: *mut ffi::lua_State) -> c_int
where
    S: 'static,
    F: CapturedFunction<S, A, R>,
    A: FromArgs,
    R: IntoResults,
{
    let outcome = {
        let state = unsafe { State::from_raw(l) };
        let descriptor = unsafe { stored::<ClosureDescriptor<S, F>>(l) };
        run_host(&state, || {
            let args = A::from_args(&state, 1, 0).map_err(|err| err.to_string())?;
            Ok(descriptor.function.invoke(&descriptor.captured, args))
        })
    };
    unsafe { finish(l, outcome) }
}

fn closure_trampoline<S, F, A, R>(captured: S, function: F) -> Trampoline
where
    S: 'static,
    F: CapturedFunction<S, A, R>,
    A: FromArgs,
    R: IntoResults,
{
    Trampoline::with_entry(closure_entry::<S, F, A, R>, ClosureDescriptor { captured, function })
}

impl State {
    /// Expose `function` as the global `name`, with `captured` moved into VM memory and passed
    /// to every call.
    pub fn register_closure<S, F, A, R>(&self, name: &str, captured: S, function: F)
    where
        S: 'static,
        F: CapturedFunction<S, A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        self.set_global_function(name, closure_trampoline(captured, function));
    }

    /// Like [`register_closure`](Self::register_closure), returning a rooted handle instead of
    /// setting a global.
    pub fn create_closure<S, F, A, R>(&self, captured: S, function: F) -> FunctionHandle
    where
        S: 'static,
        F: CapturedFunction<S, A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        self.root_function("<closure>", closure_trampoline(captured, function))
    }
}
