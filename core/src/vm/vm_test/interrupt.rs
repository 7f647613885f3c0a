use std::{cell::Cell, ops::ControlFlow, rc::Rc, thread, time::Duration};

use super::*;

const ENDLESS: &str = "while true do end";

#[test]
fn pending_break_stops_the_next_script() -> Result<()> {
    let vm = new_vm();
    let signal = vm.break_signal();
    signal.request()?;
    assert!(signal.is_pending());

    let err = vm.eval::<()>(ENDLESS).unwrap_err();
    assert!(matches!(err, Error::Interrupted), "{err}");
    assert!(!signal.is_pending());

    // The request was consumed; later scripts run normally.
    assert_eq!(vm.eval::<i32>("local n = 0 for i = 1, 1000 do n = n + 1 end return n")?, 1000);
    Ok(())
}

#[test]
fn break_from_another_thread() -> Result<()> {
    let vm = new_vm();
    let signal = vm.break_signal();
    let requester = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signal.request()
    });
    let err = vm.eval::<()>(ENDLESS).unwrap_err();
    assert!(matches!(err, Error::Interrupted), "{err}");
    assert!(requester.join().is_ok_and(|outcome| outcome.is_ok()));
    Ok(())
}

#[test]
fn cancelled_break_is_not_honoured() -> Result<()> {
    let vm = new_vm();
    let signal = vm.break_signal();
    signal.request()?;
    signal.cancel();
    assert_eq!(vm.eval::<i32>("local n = 0 for i = 1, 10 do n = n + i end return n")?, 55);
    Ok(())
}

#[test]
fn break_is_rejected_inside_host_function() -> Result<()> {
    let vm = new_vm();
    let signal = vm.break_signal();
    let inner = signal.clone();
    vm.register_fn("request_break", move || match inner.request() {
        Err(Error::BreakRejected { depth }) => depth as i64,
        _ => 0,
    });
    assert_eq!(vm.eval::<i64>("return request_break()")?, 1);
    assert!(!signal.is_pending());
    Ok(())
}

#[test]
fn interrupt_callback_stops_long_loops() -> Result<()> {
    let vm = new_vm();
    let ticks = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&ticks);
    vm.set_interrupt(move |_| {
        seen.set(seen.get() + 1);
        if seen.get() >= 100 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
    });
    let err = vm.eval::<()>(ENDLESS).unwrap_err();
    assert!(matches!(err, Error::Interrupted), "{err}");
    assert!(ticks.get() >= 100);

    vm.clear_interrupt();
    assert!(vm.eval::<bool>("for i = 1, 10000 do end return true")?);
    Ok(())
}
