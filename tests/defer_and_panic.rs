//! Scenario 2 (spec §8): deferred execution runs on unwind, in reverse
//! registration order, before the panic keeps propagating.
//!
//! Stands in for:
//! ```text
//! func f(t) {
//!     defer t[1] = 2;
//!     defer t[0] = 1;
//!     std.panic("help!");
//! }
//! ```
//! A compiler would lower the two `defer`s into an exception handler that
//! runs the stores in reverse-registration order and then re-raises; that
//! handler is hand-assembled here directly.

mod common;

use common::{Asm, Member};
use tendril_vm::module::HandlerEntry;
use tendril_vm::objects::{NativeFunction, Tuple};
use tendril_vm::value::Value;

#[test]
fn defers_run_in_reverse_registration_order_then_the_panic_propagates() {
    let mut ctx = common::fresh_context();
    let panic_name = ctx.strings.insert("panic").unwrap();

    let mut code = Asm::new();
    code.load_module_member(0).load_module_member(1);
    let fault_pc = code.pos(); // the Call instruction starts here
    code.call(1);
    let target = code.pos();
    code.load_local(0)
        .load_int(1)
        .store_field(0)
        .load_local(0)
        .load_int(2)
        .store_field(1)
        .rethrow();

    let handlers = vec![HandlerEntry { from_pc: fault_pc, to_pc: fault_pc + 1, target_pc: target }];
    let function = common::function_template(1, 1, code.into_code(), handlers);

    let (_name, functions) = common::load_module(
        &mut ctx,
        "defer_module",
        vec![function],
        vec![Member::Native(NativeFunction { name: panic_name, func: tendril_vm::interpreter::panic }), Member::StringConst("help!")],
    );
    let f = functions[0];

    let tuple = ctx
        .allocate(Tuple(vec![Value::from_embedded_int(0).unwrap(), Value::from_embedded_int(0).unwrap()]), false)
        .unwrap();
    let err = common::run(&mut ctx, f, &[tuple]).unwrap_err();
    assert!(matches!(err, tendril_vm::error::VmError::Unhandled(_)));

    let fields = &ctx.heap.get::<Tuple>(tuple).unwrap().0;
    assert_eq!(fields[0].as_embedded_int(), Some(1));
    assert_eq!(fields[1].as_embedded_int(), Some(2));
}
