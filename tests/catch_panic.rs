//! Scenario 5 (spec §8): `std.catch_panic(func() { std.panic("boom"); })`
//! reports the panic's message back to the caller instead of propagating.

mod common;

use common::{Asm, Member};
use tendril_vm::objects::{ExceptionObject, HeapBool, NativeFunction, Tuple};
use tendril_vm::value::PublicType;

#[test]
fn catch_panic_reports_ok_false_and_the_panic_message() {
    let mut ctx = common::fresh_context();
    let panic_name = ctx.strings.insert("panic").unwrap();
    let catch_panic_name = ctx.strings.insert("catch_panic").unwrap();

    // `func() { std.panic("boom"); }` -- no locals, no params.
    let mut inner_code = Asm::new();
    inner_code.load_module_member(0).load_module_member(1).call(1).ret();
    let inner = common::function_template(0, 0, inner_code.into_code(), Vec::new());

    // `std.catch_panic(f)` where `f` is the inner closure above.
    let mut outer_code = Asm::new();
    outer_code.load_module_member(3).load_module_member(2).call(1).ret();
    let outer = common::function_template(0, 0, outer_code.into_code(), Vec::new());

    let (_name, functions) = common::load_module(
        &mut ctx,
        "catch_panic_module",
        vec![inner, outer],
        vec![
            Member::Native(NativeFunction { name: panic_name, func: tendril_vm::interpreter::panic }),
            Member::StringConst("boom"),
            Member::Function(0),
            Member::Native(NativeFunction { name: catch_panic_name, func: tendril_vm::interpreter::catch_panic }),
        ],
    );
    let outer_fn = functions[1];

    let result = common::run(&mut ctx, outer_fn, &[]).unwrap();
    let tuple = ctx.heap.get::<Tuple>(result).unwrap().0.clone();
    assert_eq!(tuple.len(), 2);
    assert_eq!(ctx.value_type(tuple[0]), PublicType::Boolean);
    let ok = ctx.heap.get::<HeapBool>(tuple[0]).unwrap().0;
    assert!(!ok, "catch_panic should report ok=false for a panicking callee");

    let exception = ctx.heap.get::<ExceptionObject>(tuple[1]).unwrap().0.clone();
    assert!(exception.message().to_lowercase().contains("boom"));
}
