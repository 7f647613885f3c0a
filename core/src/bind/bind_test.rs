use std::{cell::Cell, rc::Rc};

use anyhow::Result;

use super::*;
use crate::{test_util::init_tracing, vm::Vm};

#[derive(Debug, Clone, PartialEq)]
struct Counter {
    value: i64,
}

impl UserType for Counter {
    const NAME: &'static str = "Counter";

    fn bind(methods: &mut Methods<Self>) {
        methods
            .constructor(|value: i64| Counter { value })
            .method("increment", |c: &mut Counter| c.value += 1)
            .method("add", |c: &mut Counter, n: i64| c.value += n)
            .method("getValue", |c: &Counter| c.value)
            .method("doubled", |c: Counter| c.value * 2)
            .function("zero", || Object(Counter { value: 0 }));
    }
}

#[test]
fn constructor_and_methods() -> Result<()> {
    init_tracing();
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let value: i64 = vm.eval("local c = Counter.new(5); c:increment(); return c:getValue()")?;
    assert_eq!(value, 6);
    Ok(())
}

#[test]
fn call_sugar_and_static_functions() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let (a, b): (i64, i64) = vm.eval("local c = Counter(2); c:add(3); return c:getValue(), Counter.zero():getValue()")?;
    assert_eq!((a, b), (5, 0));
    Ok(())
}

#[test]
fn value_receiver_works_on_a_copy() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let (doubled, after): (i64, i64) = vm.eval("local c = Counter.new(4); return c:doubled(), c:getValue()")?;
    assert_eq!((doubled, after), (8, 4));
    Ok(())
}

#[test]
fn binding_descriptor_classifies_operations() -> Result<()> {
    let vm = Vm::new()?;
    let binding = vm.bind::<Counter>()?;
    assert_eq!(binding.type_name(), "Counter");
    assert_eq!(binding.classification("init"), Some(Classification::Constructor));
    assert_eq!(binding.classification("increment"), Some(Classification::Instance(Receiver::Exclusive)));
    assert_eq!(binding.classification("getValue"), Some(Classification::Instance(Receiver::Shared)));
    assert_eq!(binding.classification("doubled"), Some(Classification::Instance(Receiver::Copied)));
    assert_eq!(binding.classification("zero"), Some(Classification::Static));
    assert_eq!(binding.classification("missing"), None);
    assert_eq!(binding.len(), 6);
    Ok(())
}

#[test]
fn constructor_argument_positions_match_the_call_site() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let (ok, message): (bool, String) = vm.eval("return pcall(function() return Counter('x') end)")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1 (integer expected, got string)"), "{message}");
    let (ok, message): (bool, String) = vm.eval("return pcall(function() return Counter.new('x') end)")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1 (integer expected, got string)"), "{message}");
    Ok(())
}

#[test]
fn wrong_receiver_is_rejected() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let (ok, message): (bool, String) =
        vm.eval("local c = Counter.new(1); return pcall(c.getValue, {})")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1 (Counter expected, got table)"), "{message}");

    let (ok, _): (bool, String) = vm.eval("local c = Counter.new(1); return pcall(c.getValue, newproxy())")?;
    assert!(!ok);
    Ok(())
}

#[test]
fn metatable_reports_type_name() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    let (kind, text): (String, String) = vm.eval("local c = Counter.new(1); return typeof(c), tostring(c)")?;
    assert_eq!(kind, "Counter");
    assert!(text.starts_with("Counter: 0x"), "{text}");
    Ok(())
}

#[test]
fn rebinding_reuses_tables() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    vm.eval::<()>("before = Counter.new(10); class = Counter")?;
    let live = vm.live_references();
    vm.bind::<Counter>()?;
    assert_eq!(vm.live_references(), live);
    let (same, value): (bool, i64) = vm.eval("return rawequal(class, Counter), before:getValue()")?;
    assert!(same);
    assert_eq!(value, 10);
    Ok(())
}

#[test]
fn objects_cross_the_boundary() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Counter>()?;
    vm.set_global("seeded", Object(Counter { value: 41 }))?;
    vm.eval::<()>("seeded:increment()")?;
    let Object(counter): Object<Counter> = vm.eval("return seeded")?;
    assert_eq!(counter, Counter { value: 42 });
    Ok(())
}

struct Droppy {
    drops: Rc<Cell<u32>>,
}

impl Drop for Droppy {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

thread_local! {
    static DROPS: Rc<Cell<u32>> = Rc::new(Cell::new(0));
}

impl UserType for Droppy {
    const NAME: &'static str = "Droppy";

    fn bind(methods: &mut Methods<Self>) {
        methods.constructor(|| Droppy {
            drops: DROPS.with(Rc::clone),
        });
    }
}

#[test]
fn teardown_runs_exactly_once() -> Result<()> {
    let drops = DROPS.with(Rc::clone);
    drops.set(0);
    {
        let vm = Vm::new()?;
        vm.bind::<Droppy>()?;
        vm.eval::<()>("local d = Droppy.new(); d = nil")?;
        vm.collect_garbage();
        assert_eq!(drops.get(), 1);
        vm.eval::<()>("kept = Droppy()")?;
        assert_eq!(drops.get(), 1);
    }
    // Closing the VM collects the remaining object.
    assert_eq!(drops.get(), 2);
    Ok(())
}

#[derive(Clone, Copy)]
struct Plain {
    x: f64,
}

impl UserType for Plain {
    const NAME: &'static str = "Plain";

    fn bind(methods: &mut Methods<Self>) {
        methods.constructor(|x: f64| Plain { x }).method("x", |p: &Plain| p.x);
    }
}

#[test]
fn type_without_teardown_is_collected() -> Result<()> {
    let vm = Vm::new()?;
    vm.bind::<Plain>()?;
    assert_eq!(vm.eval::<f64>("local p = Plain.new(1.5); return p:x()")?, 1.5);
    vm.eval::<()>("for i = 1, 100 do local p = Plain.new(i) end")?;
    vm.collect_garbage();
    Ok(())
}

struct Misnamed;

impl UserType for Misnamed {
    const NAME: &'static str = "Misnamed";

    fn bind(methods: &mut Methods<Self>) {
        methods.function("init", || Object(Misnamed));
    }
}

#[test]
fn init_outside_constructor_fails_at_bind_time() -> Result<()> {
    let vm = Vm::new()?;
    let err = vm.bind::<Misnamed>().unwrap_err();
    assert!(matches!(err, crate::Error::Bind(BindError::InitNotConstructor { ty: "Misnamed", .. })));
    // Nothing was installed.
    assert!(vm.eval::<bool>("return Misnamed == nil")?);
    Ok(())
}

struct Reserved;

impl UserType for Reserved {
    const NAME: &'static str = "Reserved";

    fn bind(methods: &mut Methods<Self>) {
        methods.constructor(|| Reserved).constructor(|| Reserved).method("__gc", |_: &Reserved| ());
    }
}

#[test]
fn duplicate_constructor_is_reported_first() -> Result<()> {
    let vm = Vm::new()?;
    let err = vm.bind::<Reserved>().unwrap_err();
    assert!(matches!(err, crate::Error::Bind(BindError::DuplicateConstructor { ty: "Reserved" })));
    Ok(())
}

#[test]
fn occupied_global_is_not_overwritten() -> Result<()> {
    let vm = Vm::new()?;
    vm.set_global("Counter", 5)?;
    let err = vm.bind::<Counter>().unwrap_err();
    assert!(matches!(err, crate::Error::Bind(BindError::GlobalOccupied { name: "Counter" })));
    assert_eq!(vm.global::<i32>("Counter"), Some(5));
    Ok(())
}

#[test]
fn reentrant_borrow_is_a_script_error() -> Result<()> {
    struct Cellar {
        hits: i32,
    }
    impl UserType for Cellar {
        const NAME: &'static str = "Cellar";

        fn bind(methods: &mut Methods<Self>) {
            methods.constructor(|| Cellar { hits: 0 }).method("visit", |c: &mut Cellar, f: crate::FunctionHandle| {
                c.hits += 1;
                crate::with_current_state(|state| {
                    let out = f.call::<_, ()>(state, ());
                    f.release(state);
                    out.map_err(|err| err.to_string())
                })
                .unwrap_or(Ok(()))
            });
        }
    }

    let vm = Vm::new()?;
    vm.bind::<Cellar>()?;
    let (ok, message): (bool, String) =
        vm.eval("local c = Cellar.new(); return pcall(function() c:visit(function() c:visit(function() end) end) end)")?;
    assert!(!ok);
    assert!(message.contains("already borrowed"), "{message}");
    Ok(())
}

/// Generic over a closure type, so two instantiations can share one `type_name`.
#[derive(Clone)]
struct Tagged<F>(F);

impl<F: Fn() -> i32 + Clone + 'static> UserType for Tagged<F> {
    const NAME: &'static str = "Tagged";

    fn bind(methods: &mut Methods<Self>) {
        methods.method("tag", |this: &Tagged<F>| (this.0)());
    }
}

fn bind_like<T: UserType>(vm: &Vm, _sample: &T) -> Result<Binding> {
    Ok(vm.bind::<T>()?)
}

fn register_reader<T: UserType + Clone>(vm: &Vm, name: &str, _sample: &T) {
    vm.register_fn(name, |_object: Object<T>| true);
}

#[test]
fn same_named_types_keep_separate_identities() -> Result<()> {
    let vm = Vm::new()?;
    let first = Tagged(|| 1);
    let second = Tagged(|| 2);
    assert_eq!(std::any::type_name_of_val(&first), std::any::type_name_of_val(&second));

    bind_like(&vm, &first)?;
    bind_like(&vm, &second)?;
    vm.set_global("a", Object(first))?;
    vm.set_global("b", Object(second.clone()))?;
    register_reader(&vm, "read_second", &second);

    assert_eq!(vm.eval::<(i32, i32)>("return a:tag(), b:tag()")?, (1, 2));
    assert!(vm.eval::<bool>("return read_second(b)")?);
    let (ok, message): (bool, String) = vm.eval("return pcall(read_second, a)")?;
    assert!(!ok);
    assert!(message.contains("bad argument #1"), "{message}");
    Ok(())
}
