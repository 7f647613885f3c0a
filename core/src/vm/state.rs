use std::{
    ffi::{CString, c_int, c_void},
    path::Path,
    ptr::NonNull,
    slice,
};

use mlua_sys as ffi;
use tracing::{debug, trace};

use super::{
    extra::ExtraData,
    interrupt::is_break_sentinel,
    vm::{LimitScope, StackGuard},
};
use crate::{
    error::{Error, Result},
    val::{DecodePolicy, FromStack, FromStackMulti, IntoStack, SlotType},
};

/// Borrowed view of a VM stack.
///
/// Every host entry point (the owning [`Vm`](super::Vm), a running trampoline, a coroutine)
/// works through a `State`. It never owns the underlying VM; the [`Vm`](super::Vm) that created
/// it does.
#[derive(Debug)]
pub struct State {
    raw: NonNull<ffi::lua_State>,
}

impl State {
    /// # Safety
    ///
    /// `raw` must be a live state created by [`Vm`](super::Vm), and the view must not outlive it.
    #[inline]
    pub(crate) unsafe fn from_raw(raw: *mut ffi::lua_State) -> Self {
        // SAFETY: the VM never hands a null state to a C function or callback.
        Self {
            raw: unsafe { NonNull::new_unchecked(raw) },
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::lua_State {
        self.raw.as_ptr()
    }

    #[inline]
    pub(crate) fn extra(&self) -> &ExtraData {
        // SAFETY: the userdata slot is set before any State is handed out and cleared only after
        // `lua_close`, so it is valid for as long as any view of this VM exists.
        unsafe { &*((*ffi::lua_callbacks(self.as_ptr())).userdata as *const ExtraData) }
    }

    /// Index of the top slot (the number of slots in the current frame).
    #[inline]
    pub fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    #[inline]
    pub(crate) fn set_top(&self, top: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), top) }
    }

    #[inline]
    pub fn abs_index(&self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    #[inline]
    pub fn slot_type(&self, index: c_int) -> SlotType {
        SlotType::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    /// Make room for `extra` more slots. Returns `false` if the stack cannot grow.
    #[inline]
    pub fn ensure_stack(&self, extra: c_int) -> bool {
        unsafe { ffi::lua_checkstack(self.as_ptr(), extra) != 0 }
    }

    /// Store `value` in the global table, bypassing metamethods.
    pub fn set_global<T: IntoStack>(&self, name: &str, value: T) -> Result<()> {
        value.encodable()?;
        let _guard = StackGuard::new(self);
        self.ensure_stack(2);
        name.push_into_stack(self);
        value.push_into_stack(self);
        unsafe { ffi::lua_rawset(self.as_ptr(), ffi::LUA_GLOBALSINDEX) };
        Ok(())
    }

    /// Read a global. Missing globals and type mismatches both read as `None`.
    pub fn global<T: FromStack>(&self, name: &str) -> Option<T> {
        let _guard = StackGuard::new(self);
        self.ensure_stack(1);
        name.push_into_stack(self);
        unsafe { ffi::lua_rawget(self.as_ptr(), ffi::LUA_GLOBALSINDEX) };
        self.decode(-1, DecodePolicy::BestEffort).ok().flatten()
    }

    /// Compile and run `source`, decoding whatever the chunk returns.
    pub fn eval<R: FromStackMulti>(&self, source: &str) -> Result<R> {
        let bytecode = self.compile(source)?;
        self.run_chunk(&bytecode, c"=eval")
    }

    /// Compile `source` to bytecode without running it.
    pub fn compile(&self, source: &str) -> Result<Vec<u8>> {
        let bytecode = unsafe { ffi::luau_compile(source.as_bytes(), ffi::lua_CompileOptions::default()) };
        match bytecode.split_first() {
            Some((0, message)) => Err(Error::Compile(String::from_utf8_lossy(message).into_owned())),
            Some(_) => Ok(bytecode),
            None => Err(Error::Compile("compiler produced no output".to_owned())),
        }
    }

    /// Load and run precompiled bytecode.
    pub fn exec_bytecode<R: FromStackMulti>(&self, bytecode: &[u8]) -> Result<R> {
        self.run_chunk(bytecode, c"=bytecode")
    }

    /// Read, compile and run a source file. The chunk is named after `path`.
    pub fn eval_file<R: FromStackMulti>(&self, path: impl AsRef<Path>) -> Result<R> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let bytecode = self.compile(&source)?;
        let chunkname = CString::new(format!("@{}", path.display()))
            .map_err(|_| Error::Compile(format!("invalid chunk name {}", path.display())))?;
        debug!(path = %path.display(), "evaluating file");
        self.run_chunk(&bytecode, &chunkname)
    }

    fn run_chunk<R: FromStackMulti>(&self, bytecode: &[u8], chunkname: &std::ffi::CStr) -> Result<R> {
        let l = self.as_ptr();
        let _guard = StackGuard::new(self);
        let base = self.top();
        self.ensure_stack(1);
        let status = unsafe {
            ffi::luau_load(l, chunkname.as_ptr(), bytecode.as_ptr() as *const _, bytecode.len(), 0)
        };
        if status != 0 {
            let message = self.error_message(-1);
            return Err(Error::Compile(message));
        }
        self.protected_call(0, ffi::LUA_MULTRET)?;
        Ok(R::from_stack_multi(self, base + 1)?)
    }

    /// Call the function below `nargs` arguments on top of the stack.
    ///
    /// Errors are popped and translated; on success the results replace the function and its
    /// arguments.
    pub(crate) fn protected_call(&self, nargs: c_int, nresults: c_int) -> Result<()> {
        let status = {
            let _limit = LimitScope::enforce(self);
            unsafe { ffi::lua_pcall(self.as_ptr(), nargs, nresults, 0) }
        };
        self.finish_call(status)
    }

    /// Translate a call or resume status; pops the error object on failure.
    pub(crate) fn finish_call(&self, status: c_int) -> Result<()> {
        let breaks = &self.extra().breaks;
        if breaks.host_depth() == 0 {
            breaks.clear();
        }
        if status == ffi::LUA_OK || status == ffi::LUA_YIELD {
            return Ok(());
        }
        let err = if is_break_sentinel(self, -1) {
            Error::Interrupted
        } else if status == ffi::LUA_ERRMEM {
            Error::OutOfMemory
        } else if status == ffi::LUA_ERRSYNTAX {
            Error::Compile(self.error_message(-1))
        } else {
            Error::Runtime(self.error_message(-1))
        };
        unsafe { ffi::lua_pop(self.as_ptr(), 1) };
        trace!(status, %err, "protected call failed");
        Err(err)
    }

    fn error_message(&self, index: c_int) -> String {
        match self.slot_type(index) {
            SlotType::String | SlotType::Number => unsafe {
                let mut len = 0usize;
                let ptr = ffi::lua_tolstring(self.as_ptr(), index, &mut len);
                if ptr.is_null() {
                    return String::new();
                }
                String::from_utf8_lossy(slice::from_raw_parts(ptr as *const u8, len)).into_owned()
            },
            other => format!("(error object is a {} value)", other.name()),
        }
    }

    /// Run a full collection cycle.
    pub fn collect_garbage(&self) {
        unsafe { ffi::lua_gc(self.as_ptr(), ffi::LUA_GCCOLLECT, 0) };
    }

    /// Bytes currently allocated by this VM.
    pub fn memory_used(&self) -> usize {
        self.extra().alloc().used()
    }

    /// Highest value [`memory_used`](Self::memory_used) has reached.
    pub fn memory_peak(&self) -> usize {
        self.extra().alloc().peak()
    }

    /// Number of allocation requests refused so far.
    pub fn allocation_failures(&self) -> u64 {
        self.extra().alloc().failures()
    }

    #[inline]
    pub(crate) fn userdata_ptr(&self, index: c_int) -> *mut c_void {
        unsafe { ffi::lua_touserdata(self.as_ptr(), index) }
    }
}
