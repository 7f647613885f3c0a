use std::{cell::RefCell, ffi::c_int, rc::Rc};

use mlua_sys as ffi;

use super::{Object, Receiver, UserType, userdata};
use crate::{
    trampoline::{ArgError, FromArgs, HostFunction, IntoResults, Trampoline, finish, run_host, stored},
    vm::State,
};

/// Receiver marker: the method borrows the object (`&T`).
pub struct ByRef;
/// Receiver marker: the method borrows the object mutably (`&mut T`).
pub struct ByMut;
/// Receiver marker: the method works on a clone of the object (`T`).
pub struct ByValue;

pub trait ReceiverKind {
    const RECEIVER: Receiver;
}

impl ReceiverKind for ByRef {
    const RECEIVER: Receiver = Receiver::Shared;
}

impl ReceiverKind for ByMut {
    const RECEIVER: Receiver = Receiver::Exclusive;
}

impl ReceiverKind for ByValue {
    const RECEIVER: Receiver = Receiver::Copied;
}

/// A Rust function whose first parameter is the object a method is called on.
///
/// `K` is one of [`ByRef`], [`ByMut`] or [`ByValue`] and is inferred from the function's first
/// parameter type.
pub trait InstanceFunction<T, K, A, R>: 'static {
    fn call_with(&self, receiver: &RefCell<T>, args: A) -> Result<R, String>;
}

fn borrow_conflict<T: UserType>() -> String {
    format!("{} object is already borrowed by a running method", T::NAME)
}

macro_rules! impl_instance_function {
    ($($name:ident $idx:tt),*) => {
        impl<T, Func, Ret, $($name,)*> InstanceFunction<T, ByRef, ($($name,)*), Ret> for Func
        where
            T: UserType,
            Func: Fn(&T, $($name),*) -> Ret + 'static,
        {
            #[inline]
            #[allow(unused_variables)]
            fn call_with(&self, receiver: &RefCell<T>, args: ($($name,)*)) -> Result<Ret, String> {
                let object = receiver.try_borrow().map_err(|_| borrow_conflict::<T>())?;
                Ok(self(&*object, $(args.$idx),*))
            }
        }

        impl<T, Func, Ret, $($name,)*> InstanceFunction<T, ByMut, ($($name,)*), Ret> for Func
        where
            T: UserType,
            Func: Fn(&mut T, $($name),*) -> Ret + 'static,
        {
            #[inline]
            #[allow(unused_variables)]
            fn call_with(&self, receiver: &RefCell<T>, args: ($($name,)*)) -> Result<Ret, String> {
                let mut object = receiver.try_borrow_mut().map_err(|_| borrow_conflict::<T>())?;
                Ok(self(&mut *object, $(args.$idx),*))
            }
        }

        impl<T, Func, Ret, $($name,)*> InstanceFunction<T, ByValue, ($($name,)*), Ret> for Func
        where
            T: UserType + Clone,
            Func: Fn(T, $($name),*) -> Ret + 'static,
        {
            #[inline]
            #[allow(unused_variables)]
            fn call_with(&self, receiver: &RefCell<T>, args: ($($name,)*)) -> Result<Ret, String> {
                let object = receiver.try_borrow().map_err(|_| borrow_conflict::<T>())?.clone();
                Ok(self(object, $(args.$idx),*))
            }
        }
    };
}

impl_instance_function!();
impl_instance_function!(A 0);
impl_instance_function!(A 0, B 1);
impl_instance_function!(A 0, B 1, C 2);
impl_instance_function!(A 0, B 1, C 2, D 3);
impl_instance_function!(A 0, B 1, C 2, D 3, E 4);
impl_instance_function!(A 0, B 1, C 2, D 3, E 4, F 5);
impl_instance_function!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);

unsafe extern "C-unwind" fn method_entry<T, K, F, A, R>(l: *mut ffi::lua_State) -> c_int
where
    T: UserType,
    F: InstanceFunction<T, K, A, R>,
    A: FromArgs,
    R: IntoResults,
{
    let outcome = {
        let state = unsafe { State::from_raw(l) };
        let function = unsafe { stored::<F>(l) };
        run_host(&state, || {
            let receiver = userdata::receiver::<T>(&state, 1)
                .map_err(|source| ArgError::BadArgument { position: 1, source }.to_string())?;
            let args = A::from_args(&state, 2, 0).map_err(|err| err.to_string())?;
            function.call_with(receiver, args)
        })
    };
    unsafe { finish(l, outcome) }
}

pub(super) fn method_trampoline<T, K, F, A, R>(function: F) -> Trampoline
where
    T: UserType,
    F: InstanceFunction<T, K, A, R>,
    A: FromArgs,
    R: IntoResults,
{
    Trampoline::with_entry(method_entry::<T, K, F, A, R>, function)
}

/// Constructor entry. Arguments start at slot `FIRST`; for `T(...)` the type table sits in
/// slot 1 and is not counted as an argument.
unsafe extern "C-unwind" fn constructor_entry<T, F, A, const FIRST: c_int>(l: *mut ffi::lua_State) -> c_int
where
    T: UserType,
    F: HostFunction<A, T>,
    A: FromArgs,
{
    let outcome = {
        let state = unsafe { State::from_raw(l) };
        let function = unsafe { stored::<Rc<F>>(l) };
        run_host(&state, || {
            let args = A::from_args(&state, FIRST, FIRST - 1).map_err(|err| err.to_string())?;
            Ok(Object(function.invoke(args)))
        })
    };
    unsafe { finish(l, outcome) }
}

/// The `T.new` and `T(...)` entry points, sharing one stored constructor.
pub(super) struct Constructor {
    pub(super) new: Trampoline,
    pub(super) call: Trampoline,
}

impl Constructor {
    pub(super) fn new<T, F, A>(function: F) -> Self
    where
        T: UserType,
        F: HostFunction<A, T>,
        A: FromArgs,
    {
        let shared = Rc::new(function);
        Self {
            new: Trampoline::with_entry(constructor_entry::<T, F, A, 1>, Rc::clone(&shared)),
            call: Trampoline::with_entry(constructor_entry::<T, F, A, 2>, shared),
        }
    }
}

unsafe extern "C-unwind" fn tostring_entry<T: UserType>(l: *mut ffi::lua_State) -> c_int {
    let outcome = {
        let state = unsafe { State::from_raw(l) };
        run_host(&state, || Ok(format!("{}: {:p}", T::NAME, state.userdata_ptr(1))))
    };
    unsafe { finish(l, outcome) }
}

pub(super) fn tostring_trampoline<T: UserType>() -> Trampoline {
    Trampoline::with_entry(tostring_entry::<T>, ())
}
