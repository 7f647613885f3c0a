use super::*;

#[test]
fn eval_returns_decoded_values() -> Result<()> {
    let vm = new_vm();
    assert_eq!(vm.eval::<i32>("return 1 + 2")?, 3);
    assert_eq!(vm.eval::<(String, bool)>("return 'a' .. 'b', true")?, ("ab".to_owned(), true));
    vm.eval::<()>("return 1, 2, 3")?;
    assert_eq!(vm.top(), 0);
    Ok(())
}

#[test]
fn compile_errors_are_typed() {
    let vm = new_vm();
    let err = vm.eval::<()>("local = 1").unwrap_err();
    assert!(matches!(err, Error::Compile(_)), "{err}");
    assert_eq!(vm.top(), 0);
}

#[test]
fn runtime_errors_keep_script_message() {
    let vm = new_vm();
    let err = vm.eval::<()>("error('custom failure')").unwrap_err();
    match err {
        Error::Runtime(message) => assert!(message.contains("custom failure"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    let err = vm.eval::<()>("error({})").unwrap_err();
    assert!(err.to_string().contains("error object is a table value"), "{err}");
}

#[test]
fn result_type_mismatch_is_a_decode_error() {
    let vm = new_vm();
    let err = vm.eval::<i32>("return 'text'").unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "{err}");
}

#[test]
fn bytecode_can_be_compiled_once_and_run_many_times() -> Result<()> {
    let vm = new_vm();
    let bytecode = vm.compile("counter = (counter or 0) + 1 return counter")?;
    assert_eq!(vm.exec_bytecode::<i32>(&bytecode)?, 1);
    assert_eq!(vm.exec_bytecode::<i32>(&bytecode)?, 2);

    let other = new_vm();
    assert_eq!(other.exec_bytecode::<i32>(&bytecode)?, 1);
    Ok(())
}

#[test]
fn compile_reports_syntax_errors() {
    let vm = new_vm();
    assert!(matches!(vm.compile("if then"), Err(Error::Compile(_))));
}

#[test]
fn malformed_bytecode_is_rejected() {
    let vm = new_vm();
    let err = vm.exec_bytecode::<()>(&[0xff, 0x01, 0x02]).unwrap_err();
    assert!(matches!(err, Error::Compile(_)), "{err}");
}

#[test]
fn eval_file_names_the_chunk() -> Result<()> {
    let vm = new_vm();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("script.luau");
    std::fs::write(&path, "local x = 20\nreturn x + 22\n")?;
    assert_eq!(vm.eval_file::<i32>(&path)?, 42);

    std::fs::write(&path, "\nerror('from file')\n")?;
    let err = vm.eval_file::<()>(&path).unwrap_err();
    assert!(err.to_string().contains("script.luau:2:"), "{err}");

    let missing = vm.eval_file::<()>(dir.path().join("missing.luau")).unwrap_err();
    assert!(matches!(missing, Error::Io(_)));
    Ok(())
}

#[test]
fn globals_read_best_effort() -> Result<()> {
    let vm = new_vm();
    vm.set_global("name", "lk")?;
    assert_eq!(vm.global::<String>("name").as_deref(), Some("lk"));
    assert_eq!(vm.global::<i32>("name"), None);
    assert_eq!(vm.global::<i32>("undefined"), None);
    Ok(())
}

#[test]
fn libraries_can_be_left_closed() -> Result<()> {
    init_tracing();
    let vm = Vm::with_options(VmOptions::new().open_libs(false))?;
    assert!(vm.eval::<bool>("return string == nil and math == nil")?);
    Ok(())
}
