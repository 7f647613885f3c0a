use std::ffi::{CStr, c_char, c_int};

use mlua_sys as ffi;

use super::state::State;

/// Fields the VM reports for one active call frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// `"Lua"`, `"C"` or `"main"`.
    pub what: String,
    pub source: String,
    pub short_src: String,
    pub name: Option<String>,
    pub current_line: Option<u32>,
    pub line_defined: Option<u32>,
}

fn owned(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn line(value: c_int) -> Option<u32> {
    u32::try_from(value).ok().filter(|line| *line > 0)
}

impl State {
    /// Describe the call frame `level` steps up the stack; level 0 is the running function.
    /// Returns `None` past the outermost frame.
    pub fn stack_info(&self, level: c_int) -> Option<DebugInfo> {
        let mut ar: ffi::lua_Debug = unsafe { std::mem::zeroed() };
        if unsafe { ffi::lua_getinfo(self.as_ptr(), level, c"snl".as_ptr(), &mut ar) } == 0 {
            return None;
        }
        Some(DebugInfo {
            what: owned(ar.what).unwrap_or_default(),
            source: owned(ar.source).unwrap_or_default(),
            short_src: owned(ar.short_src).unwrap_or_default(),
            name: owned(ar.name),
            current_line: line(ar.currentline),
            line_defined: line(ar.linedefined),
        })
    }
}
