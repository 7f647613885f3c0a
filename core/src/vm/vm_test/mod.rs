pub(super) use anyhow::Result;

pub(super) use crate::{
    Error,
    test_util::init_tracing,
    vm::{Vm, VmOptions},
};

pub(super) fn new_vm() -> Vm {
    init_tracing();
    Vm::new().expect("vm creation")
}

mod debug;
mod eval;
mod interrupt;
mod memory;
mod thread;
