use super::*;
use crate::{FunctionHandle, vm::ThreadStatus};

const GENERATOR: &str = "return function(a) local b = coroutine.yield(a + 1) return b * 2 end";

#[test]
fn resume_and_yield() -> Result<()> {
    let vm = new_vm();
    let body: FunctionHandle = vm.eval(GENERATOR)?;
    let co = vm.new_thread(&body)?;
    body.release(&vm);
    assert_eq!(co.status(&vm), ThreadStatus::Suspended);

    assert_eq!(co.resume::<_, i32>(&vm, 1)?, 2);
    assert_eq!(co.status(&vm), ThreadStatus::Suspended);

    assert_eq!(co.resume::<_, i32>(&vm, 10)?, 20);
    assert_eq!(co.status(&vm), ThreadStatus::Finished);

    let err = co.resume::<_, ()>(&vm, ()).unwrap_err();
    assert!(matches!(err, Error::ThreadNotResumable(ThreadStatus::Finished)), "{err}");
    co.release(&vm);
    Ok(())
}

#[test]
fn failed_thread_reports_error_status() -> Result<()> {
    let vm = new_vm();
    let body: FunctionHandle = vm.eval("return function() error('inside thread') end")?;
    let co = vm.new_thread(&body)?;
    let err = co.resume::<_, ()>(&vm, ()).unwrap_err();
    assert!(err.to_string().contains("inside thread"), "{err}");
    assert_eq!(co.status(&vm), ThreadStatus::Error);
    assert!(matches!(co.resume::<_, ()>(&vm, ()), Err(Error::ThreadNotResumable(ThreadStatus::Error))));
    Ok(())
}

#[test]
fn released_thread_is_invalid() -> Result<()> {
    let vm = new_vm();
    let body: FunctionHandle = vm.eval(GENERATOR)?;
    let co = vm.new_thread(&body)?;
    let live = vm.live_references();
    co.release(&vm);
    co.release(&vm);
    assert_eq!(vm.live_references(), live - 1);
    assert!(matches!(co.resume::<_, i32>(&vm, 1), Err(Error::InvalidHandle)));
    Ok(())
}

#[test]
fn released_body_cannot_start_a_thread() -> Result<()> {
    let vm = new_vm();
    let body: FunctionHandle = vm.eval(GENERATOR)?;
    body.release(&vm);
    assert!(matches!(vm.new_thread(&body), Err(Error::InvalidHandle)));
    assert_eq!(vm.top(), 0);
    Ok(())
}

#[test]
fn host_functions_run_inside_threads() -> Result<()> {
    let vm = new_vm();
    vm.register_fn("twice", |x: i32| x * 2);
    let body: FunctionHandle = vm.eval("return function(x) coroutine.yield(twice(x)) return twice(x + 1) end")?;
    let co = vm.new_thread(&body)?;
    assert_eq!(co.resume::<_, i32>(&vm, 4)?, 8);
    assert_eq!(co.resume::<_, i32>(&vm, ())?, 10);
    Ok(())
}
