//! Scenario 1 (spec §8): recursive fibonacci.
//!
//! Stands in for `func fib(n) { if (n<=1) { return n; } return fib(n-1)+fib(n-2); }`,
//! hand-assembled since bytecode emission is out of scope.

mod common;

use common::{Asm, Member};
use tendril_vm::value::Value;

#[test]
fn fib_17_is_1597() {
    let mut ctx = common::fresh_context();

    let mut then_branch = Asm::new();
    then_branch.load_local(0).ret();

    let mut recurse = Asm::new();
    recurse
        .load_module_member(0)
        .load_local(0)
        .load_int(1)
        .binary(common::MINUS)
        .call(1)
        .load_module_member(0)
        .load_local(0)
        .load_int(2)
        .binary(common::MINUS)
        .call(1)
        .binary(common::PLUS)
        .ret();

    let mut code = Asm::new();
    code.load_local(0).load_int(1).binary(common::LESS_EQUAL);
    let branch_end = code.pos() + 6; // tag(1) + cond(1) + target(4)
    let target = branch_end + then_branch.pos();
    code.branch(common::IF_FALSE, target);
    code.extend(then_branch);
    code.extend(recurse);

    let fib_template = common::function_template(1, 1, code.into_code(), Vec::new());
    let (_module, functions) = common::load_module(&mut ctx, "fib_module", vec![fib_template], vec![Member::Function(0)]);
    let fib = functions[0];

    let n = Value::from_embedded_int(17).unwrap();
    let result = common::run(&mut ctx, fib, &[n]).unwrap();
    assert_eq!(result.as_embedded_int(), Some(1597));
}
