use super::*;
use crate::with_current_state;

#[test]
fn caller_frame_is_visible_from_host() -> Result<()> {
    let vm = new_vm();
    vm.register_fn("caller_line", || {
        with_current_state(|state| state.stack_info(1).and_then(|info| info.current_line)).flatten()
    });
    vm.register_fn("caller_src", || {
        with_current_state(|state| state.stack_info(1).map(|info| info.short_src)).flatten()
    });
    assert_eq!(vm.eval::<Option<u32>>("\n\nreturn caller_line()")?, Some(3));
    assert_eq!(vm.eval::<Option<String>>("return caller_src()")?.as_deref(), Some("eval"));
    Ok(())
}

#[test]
fn host_frame_is_a_c_function() -> Result<()> {
    let vm = new_vm();
    vm.register_fn("own_frame", || with_current_state(|state| state.stack_info(0).map(|info| info.what)).flatten());
    assert_eq!(vm.eval::<Option<String>>("return own_frame()")?.as_deref(), Some("C"));
    Ok(())
}

#[test]
fn levels_past_the_stack_are_none() {
    let vm = new_vm();
    assert!(vm.stack_info(0).is_none());
    vm.register_fn("deep", || with_current_state(|state| state.stack_info(50).is_none()).unwrap_or(false));
    assert!(vm.eval::<bool>("return deep()").unwrap_or(false));
}
