//! Script-visible object surfaces for Rust types.
//!
//! A [`UserType`] lists its operations once in [`UserType::bind`]. Binding installs them in
//! three tables:
//!
//! - the type table, stored in the global named [`UserType::NAME`], holds the constructor (as
//!   `new`, and as `__call` on its metatable) and the static functions,
//! - the method table holds the instance methods,
//! - the metatable, stored in the VM registry under the type's identity key, points `__index`
//!   at the method table and is attached to every object the constructor creates.
//!
//! Binding the same type again reuses all three tables and overwrites entries in place.

use std::{any::TypeId, collections::hash_map, ffi::c_int, marker::PhantomData};

use mlua_sys as ffi;
use tracing::debug;

use crate::{
    error::{BindError, Error, Result},
    trampoline::{FromArgs, HostFunction, IntoResults, Trampoline},
    util::fast_map::{FastHashMap, fast_hash_map_with_capacity},
    val::{IntoStack, SlotType},
    vm::{StackGuard, State},
};

mod method;
mod userdata;

pub use method::{ByMut, ByRef, ByValue, InstanceFunction, ReceiverKind};
pub use userdata::Object;

use method::{Constructor, method_trampoline, tostring_trampoline};
use userdata::push_metatable;

/// Name reserved for the constructor.
const CONSTRUCTOR_NAME: &str = "init";

/// A Rust type with a script-visible surface.
pub trait UserType: Sized + 'static {
    /// Global name of the type table, also reported by `typeof` and `tostring`.
    const NAME: &'static str;

    fn bind(methods: &mut Methods<Self>);
}

/// How an instance method receives its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    /// `&T`
    Shared,
    /// `&mut T`
    Exclusive,
    /// `T`, cloned out of the object.
    Copied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Constructor,
    Instance(Receiver),
    Static,
}

/// Collects a type's operations during [`UserType::bind`].
///
/// Misuse (such as registering `init` as a method) is recorded and reported by
/// [`State::bind`] before anything is installed.
pub struct Methods<T: UserType> {
    constructor: Option<Constructor>,
    instance: Vec<(&'static str, Receiver, Trampoline)>,
    statics: Vec<(&'static str, Trampoline)>,
    errors: Vec<BindError>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: UserType> Methods<T> {
    fn new() -> Self {
        Self {
            constructor: None,
            instance: Vec::new(),
            statics: Vec::new(),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Register the `init` constructor. It must return `T`; anything else does not compile.
    pub fn constructor<F, A>(&mut self, function: F) -> &mut Self
    where
        F: HostFunction<A, T>,
        A: FromArgs,
    {
        if self.constructor.is_some() {
            self.errors.push(BindError::DuplicateConstructor { ty: T::NAME });
        } else {
            self.constructor = Some(Constructor::new::<T, F, A>(function));
        }
        self
    }

    /// Register an instance method, called as `object:name(...)`.
    pub fn method<K, F, A, R>(&mut self, name: &'static str, function: F) -> &mut Self
    where
        K: ReceiverKind,
        F: InstanceFunction<T, K, A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        if self.check_name(name, "an instance method") {
            self.instance.push((name, K::RECEIVER, method_trampoline::<T, K, F, A, R>(function)));
        }
        self
    }

    /// Register a static function, called as `Type.name(...)`.
    pub fn function<F, A, R>(&mut self, name: &'static str, function: F) -> &mut Self
    where
        F: HostFunction<A, R>,
        A: FromArgs,
        R: IntoResults,
    {
        if name == "new" {
            self.errors.push(BindError::ReservedName {
                ty: T::NAME,
                name: name.to_owned(),
            });
        } else if self.check_name(name, "a static function") {
            self.statics.push((name, Trampoline::new(function)));
        }
        self
    }

    fn check_name(&mut self, name: &str, found: &'static str) -> bool {
        if name == CONSTRUCTOR_NAME {
            self.errors.push(BindError::InitNotConstructor { ty: T::NAME, found });
            return false;
        }
        if name.starts_with("__") {
            self.errors.push(BindError::ReservedName {
                ty: T::NAME,
                name: name.to_owned(),
            });
            return false;
        }
        true
    }
}

/// What [`State::bind`] installed for a type.
#[derive(Debug, Clone)]
pub struct Binding {
    type_name: &'static str,
    entries: FastHashMap<&'static str, Classification>,
}

impl Binding {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Classification of the operation called `name`; the constructor is listed as `init`.
    pub fn classification(&self, name: &str) -> Option<Classification> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, &'static str, Classification> {
        self.entries.iter()
    }
}

impl State {
    /// Install `T`'s constructor, methods and static functions.
    pub fn bind<T: UserType>(&self) -> Result<Binding> {
        let mut methods = Methods::<T>::new();
        T::bind(&mut methods);
        if let Some(err) = methods.errors.into_iter().next() {
            return Err(Error::Bind(err));
        }

        let l = self.as_ptr();
        let _guard = StackGuard::new(self);
        self.ensure_stack(8);

        let first = !self.extra().metatables.borrow().contains_key(&TypeId::of::<T>());
        let class = self.type_table(T::NAME)?;
        let metatable = self.metatable_for::<T>();
        let method_table = self.subtable(metatable, "__index");

        let mut entries =
            fast_hash_map_with_capacity(methods.instance.len() + methods.statics.len() + 1);

        self.set_field(metatable, "__name", T::NAME);
        self.set_field(metatable, "__type", T::NAME);
        unsafe { ffi::lua_pushvalue(l, class) };
        self.set_top_field(metatable, "__class");
        tostring_trampoline::<T>().push(self, "__tostring");
        self.set_top_field(metatable, "__tostring");

        for (name, receiver, trampoline) in methods.instance {
            trampoline.push(self, name);
            self.set_top_field(method_table, name);
            entries.insert(name, Classification::Instance(receiver));
        }
        for (name, trampoline) in methods.statics {
            trampoline.push(self, name);
            self.set_top_field(class, name);
            entries.insert(name, Classification::Static);
        }
        if let Some(constructor) = methods.constructor {
            constructor.new.push(self, T::NAME);
            self.set_top_field(class, "new");
            let class_meta = self.own_metatable(class);
            constructor.call.push(self, T::NAME);
            self.set_top_field(class_meta, "__call");
            entries.insert(CONSTRUCTOR_NAME, Classification::Constructor);
        }

        debug!(ty = T::NAME, entries = entries.len(), rebind = !first, "type bound");
        Ok(Binding {
            type_name: T::NAME,
            entries,
        })
    }

    /// The global table named `name`, created if absent. Leaves it on the stack.
    fn type_table(&self, name: &'static str) -> Result<c_int> {
        let l = self.as_ptr();
        name.push_into_stack(self);
        unsafe { ffi::lua_rawget(l, ffi::LUA_GLOBALSINDEX) };
        match self.slot_type(-1) {
            SlotType::Table => {}
            SlotType::Nil => unsafe {
                ffi::lua_pop(l, 1);
                ffi::lua_createtable(l, 0, 4);
                name.push_into_stack(self);
                ffi::lua_pushvalue(l, -2);
                ffi::lua_rawset(l, ffi::LUA_GLOBALSINDEX);
            },
            _ => return Err(Error::Bind(BindError::GlobalOccupied { name })),
        }
        Ok(self.top())
    }

    /// `T`'s metatable from the registry, created if absent. Leaves it on the stack.
    fn metatable_for<T: 'static>(&self) -> c_int {
        let l = self.as_ptr();
        push_metatable::<T>(self);
        if self.slot_type(-1) != SlotType::Table {
            let registry_id = unsafe {
                ffi::lua_pop(l, 1);
                ffi::lua_createtable(l, 0, 6);
                ffi::lua_ref(l, -1)
            };
            self.extra().metatables.borrow_mut().insert(TypeId::of::<T>(), registry_id);
        }
        self.top()
    }

    /// `table[name]`, replaced by a new table if it is not one. Leaves it on the stack.
    fn subtable(&self, table: c_int, name: &str) -> c_int {
        let l = self.as_ptr();
        name.push_into_stack(self);
        unsafe { ffi::lua_rawget(l, table) };
        if self.slot_type(-1) != SlotType::Table {
            unsafe {
                ffi::lua_pop(l, 1);
                ffi::lua_createtable(l, 0, 0);
                ffi::lua_pushvalue(l, -1);
            }
            self.set_top_field(table, name);
        }
        self.top()
    }

    /// The metatable of the table at `table`, created if absent. Leaves it on the stack.
    fn own_metatable(&self, table: c_int) -> c_int {
        let l = self.as_ptr();
        if unsafe { ffi::lua_getmetatable(l, table) } == 0 {
            unsafe {
                ffi::lua_createtable(l, 0, 1);
                ffi::lua_pushvalue(l, -1);
                ffi::lua_setmetatable(l, table);
            }
        }
        self.top()
    }

    /// `table[name] = value` without metamethods.
    fn set_field(&self, table: c_int, name: &str, value: &str) {
        value.push_into_stack(self);
        self.set_top_field(table, name);
    }

    /// Pop the top value into `table[name]` without metamethods.
    fn set_top_field(&self, table: c_int, name: &str) {
        let l = self.as_ptr();
        name.push_into_stack(self);
        unsafe {
            ffi::lua_insert(l, -2);
            ffi::lua_rawset(l, table);
        }
    }
}

#[cfg(test)]
mod bind_test;
