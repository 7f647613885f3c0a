use std::{cell::Cell, rc::Rc};

use anyhow::{Result, anyhow};

use crate::{Error, test_util::init_tracing, vm::Vm, with_current_state};

#[test]
fn typed_function_roundtrip() -> Result<()> {
    init_tracing();
    let vm = Vm::new()?;
    vm.register_fn("add", |a: i64, b: i64| a + b);
    assert_eq!(vm.eval::<i64>("return add(10, 20)")?, 30);
    Ok(())
}

#[test]
fn zero_and_multiple_results() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_fn("nothing", || ());
    vm.register_fn("divmod", |a: i32, b: i32| (a / b, a % b));
    assert_eq!(vm.eval::<i32>("return select('#', nothing())")?, 0);
    assert_eq!(vm.eval::<(i32, i32)>("return divmod(17, 5)")?, (3, 2));
    Ok(())
}

#[test]
fn bad_argument_type_is_catchable_and_skips_body() -> Result<()> {
    let vm = Vm::new()?;
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    vm.register_fn("count", move |n: i32| {
        counter.set(counter.get() + 1);
        n
    });

    let (ok, message): (bool, String) = vm.eval("return pcall(count, 'seven')")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1 (integer expected, got string)"), "{message}");
    assert_eq!(calls.get(), 0);

    assert_eq!(vm.eval::<i32>("return count(7)")?, 7);
    assert_eq!(calls.get(), 1);
    Ok(())
}

#[test]
fn missing_and_extra_arguments_are_errors() -> Result<()> {
    let vm = Vm::new()?;
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    vm.register_fn("pair", move |a: i32, b: i32| {
        counter.set(counter.get() + 1);
        a + b
    });

    let (ok, message): (bool, String) = vm.eval("return pcall(pair, 1)")?;
    assert!(!ok);
    assert!(message.contains("bad argument #2 (integer expected, got no value)"), "{message}");

    let (ok, message): (bool, String) = vm.eval("return pcall(pair, 1, 2, 3)")?;
    assert!(!ok);
    assert!(message.contains("too many arguments (expected at most 2, got 3)"), "{message}");
    assert_eq!(calls.get(), 0);
    Ok(())
}

#[test]
fn optional_trailing_argument() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_fn("greet", |name: String, greeting: Option<String>| {
        format!("{}, {name}", greeting.as_deref().unwrap_or("hello"))
    });
    assert_eq!(vm.eval::<String>("return greet('lk')")?, "hello, lk");
    assert_eq!(vm.eval::<String>("return greet('lk', 'hi')")?, "hi, lk");
    Ok(())
}

#[test]
fn uncaught_argument_error_reaches_host_as_runtime_error() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_fn("square", |x: f64| x * x);
    let err = vm.eval::<f64>("return square({})").unwrap_err();
    match err {
        Error::Runtime(message) => {
            assert!(message.contains("number expected, got table"), "{message}");
            assert!(message.starts_with("eval:1:"), "{message}");
        }
        other => return Err(anyhow!("unexpected error: {other}")),
    }
    Ok(())
}

#[test]
fn result_errors_and_panics_become_script_errors() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_fn("checked_div", |a: i32, b: i32| {
        if b == 0 { Err(anyhow!("division by zero")) } else { Ok(a / b) }
    });
    vm.register_fn("explode", || -> i32 { panic!("boom") });

    assert_eq!(vm.eval::<i32>("return checked_div(9, 3)")?, 3);
    let (ok, message): (bool, String) = vm.eval("return pcall(checked_div, 1, 0)")?;
    assert!(!ok && message.contains("division by zero"), "{message}");

    let (ok, message): (bool, String) = vm.eval("return pcall(explode)")?;
    assert!(!ok && message.contains("host function panicked: boom"), "{message}");
    // The VM is still usable after the panic was contained.
    assert_eq!(vm.eval::<i32>("return checked_div(8, 2)")?, 4);
    Ok(())
}

#[test]
fn captured_closures_are_independent() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_closure("addK", 5i64, |k: &i64, x: i64| x + k);
    vm.register_closure("addBig", 100i64, |k: &i64, x: i64| x + k);
    assert_eq!(vm.eval::<i64>("return addK(10)")?, 15);
    assert_eq!(vm.eval::<i64>("return addBig(10)")?, 110);
    assert_eq!(vm.eval::<i64>("return addK(10)")?, 15);
    Ok(())
}

#[test]
fn captured_state_is_not_a_script_argument() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_closure("scale", 3.0f64, |factor: &f64, x: f64| x * factor);
    let (ok, message): (bool, String) = vm.eval("return pcall(scale, 'x')")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1 (number expected, got string)"), "{message}");
    Ok(())
}

#[test]
fn captured_state_is_dropped_with_the_vm() -> Result<()> {
    let dropped = Rc::new(Cell::new(0));
    struct Tracker(Rc<Cell<i32>>);
    impl Drop for Tracker {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    {
        let vm = Vm::new()?;
        vm.register_closure("tracked", Tracker(Rc::clone(&dropped)), |t: &Tracker| t.0.get());
        assert_eq!(vm.eval::<i32>("return tracked()")?, 0);
        assert_eq!(dropped.get(), 0);
    }
    assert_eq!(dropped.get(), 1);
    Ok(())
}

#[test]
fn create_function_returns_callable_handle() -> Result<()> {
    let vm = Vm::new()?;
    let concat = vm.create_function(|a: String, b: String| a + &b);
    let joined: String = concat.call(&vm, ("foo", "bar"))?;
    assert_eq!(joined, "foobar");

    vm.set_global("concat", concat)?;
    assert_eq!(vm.eval::<String>("return concat('a', 'b')")?, "ab");
    concat.release(&vm);
    // The global keeps its own reference to the function.
    assert_eq!(vm.eval::<String>("return concat('c', 'd')")?, "cd");
    Ok(())
}

#[test]
fn current_state_is_visible_inside_host_calls() -> Result<()> {
    let vm = Vm::new()?;
    assert!(with_current_state(|_| ()).is_none());
    vm.register_fn("read_global", |name: String| {
        with_current_state(|state| state.global::<i32>(&name)).flatten()
    });
    vm.set_global("depth", 3)?;
    assert_eq!(vm.eval::<Option<i32>>("return read_global('depth')")?, Some(3));
    assert_eq!(vm.eval::<Option<i32>>("return read_global('missing')")?, None);
    assert!(with_current_state(|_| ()).is_none());
    Ok(())
}

#[test]
fn reentrant_host_to_script_calls() -> Result<()> {
    let vm = Vm::new()?;
    vm.register_fn("apply", |f: crate::FunctionHandle, x: i32| -> Result<i32, Error> {
        with_current_state(|state| {
            let out = f.call(state, x);
            f.release(state);
            out
        })
        .ok_or(Error::InvalidHandle)?
    });
    assert_eq!(vm.eval::<i32>("return apply(function(v) return v * 2 end, 21)")?, 42);
    assert_eq!(vm.live_references(), 0);
    Ok(())
}
