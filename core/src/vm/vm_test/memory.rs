use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::*;
use crate::vm::{Allocator, SystemAllocator};

#[test]
fn memory_accounting_tracks_allocations() -> Result<()> {
    let vm = new_vm();
    let baseline = vm.memory_used();
    assert!(baseline > 0);
    vm.eval::<()>("big = {} for i = 1, 10000 do big[i] = i end")?;
    let grown = vm.memory_used();
    assert!(grown > baseline);
    vm.eval::<()>("big = nil")?;
    vm.collect_garbage();
    assert!(vm.memory_used() < grown);
    assert!(vm.memory_peak() >= grown);
    Ok(())
}

#[test]
fn memory_limit_surfaces_as_out_of_memory() -> Result<()> {
    init_tracing();
    let vm = Vm::with_options(VmOptions::new().memory_limit(4 * 1024 * 1024))?;
    let err = vm.eval::<()>("local t = {} for i = 1, 1e8 do t[i] = tostring(i) end").unwrap_err();
    assert!(matches!(err, Error::OutOfMemory), "{err}");
    assert!(vm.allocation_failures() > 0);

    // The VM recovers once the garbage is gone.
    vm.collect_garbage();
    assert_eq!(vm.eval::<i32>("return 1 + 1")?, 2);
    Ok(())
}

#[test]
fn host_pushes_are_not_held_to_the_limit() -> Result<()> {
    let limit = 2 * 1024 * 1024;
    let vm = Vm::with_options(VmOptions::new().memory_limit(limit))?;
    let payload: Vec<String> = (0..4096).map(|i| format!("{i:>1024}")).collect();
    vm.set_global("payload", payload.clone())?;
    assert!(vm.memory_used() > limit);
    assert_eq!(vm.eval::<usize>("return #payload")?, payload.len());

    // Script allocations are still refused while the VM is over its limit.
    let err = vm.eval::<()>("local copy = {} for i = 1, #payload do copy[i] = { payload[i] } end").unwrap_err();
    assert!(matches!(err, Error::OutOfMemory), "{err}");

    // Results of a host function are pushed in the host frame, so they cannot raise either.
    vm.set_global("payload", Option::<i32>::None)?;
    vm.collect_garbage();
    vm.register_fn("make", move || payload.clone());
    assert_eq!(vm.eval::<usize>("return #make()")?, 4096);
    Ok(())
}

/// Counts live bytes on top of the system allocator.
struct CountingAllocator {
    live: Arc<AtomicUsize>,
}

impl Allocator for CountingAllocator {
    unsafe fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        let block = unsafe { SystemAllocator.realloc(ptr, old_size, new_size) };
        if new_size == 0 || !block.is_null() {
            if !ptr.is_null() {
                self.live.fetch_sub(old_size, Ordering::Relaxed);
            }
            self.live.fetch_add(new_size, Ordering::Relaxed);
        }
        block
    }
}

#[test]
fn custom_allocator_outlives_the_vm() -> Result<()> {
    let live = Arc::new(AtomicUsize::new(0));
    {
        let vm = Vm::with_options(VmOptions::new().allocator(CountingAllocator { live: Arc::clone(&live) }))?;
        vm.eval::<()>("data = string.rep('x', 4096)")?;
        assert!(live.load(Ordering::Relaxed) > 4096);
    }
    assert_eq!(live.load(Ordering::Relaxed), 0);
    Ok(())
}
