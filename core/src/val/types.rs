use std::{ffi::c_int, fmt};

use mlua_sys as ffi;

// Not every binding release exports the buffer tag; the value is fixed by lua.h.
const LUA_TBUFFER: c_int = 10;

/// Dynamic type of a VM stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotType {
    /// The index is past the top of the stack.
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    Vector,
    String,
    Table,
    Function,
    Userdata,
    Thread,
    Buffer,
}

impl SlotType {
    pub(crate) fn from_raw(tag: c_int) -> Self {
        match tag {
            ffi::LUA_TNIL => SlotType::Nil,
            ffi::LUA_TBOOLEAN => SlotType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => SlotType::LightUserdata,
            ffi::LUA_TNUMBER => SlotType::Number,
            ffi::LUA_TVECTOR => SlotType::Vector,
            ffi::LUA_TSTRING => SlotType::String,
            ffi::LUA_TTABLE => SlotType::Table,
            ffi::LUA_TFUNCTION => SlotType::Function,
            ffi::LUA_TUSERDATA => SlotType::Userdata,
            ffi::LUA_TTHREAD => SlotType::Thread,
            LUA_TBUFFER => SlotType::Buffer,
            _ => SlotType::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SlotType::None => "no value",
            SlotType::Nil => "nil",
            SlotType::Boolean => "boolean",
            SlotType::LightUserdata | SlotType::Userdata => "userdata",
            SlotType::Number => "number",
            SlotType::Vector => "vector",
            SlotType::String => "string",
            SlotType::Table => "table",
            SlotType::Function => "function",
            SlotType::Thread => "thread",
            SlotType::Buffer => "buffer",
        }
    }

    /// `nil` and "no value" both read as absent.
    pub fn is_absent(self) -> bool {
        matches!(self, SlotType::None | SlotType::Nil)
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
