//! Scenario 3 (spec §8): `a?.b.c` short-circuits to `null` the moment any
//! link in the chain is `null`, without evaluating the rest.
//!
//! Stands in for a record `{ b: { c: <value> } }` with field access compiled
//! to `LoadField`; the short-circuit itself compiles to a `Branch(IfNull)`
//! over the intermediate result.

mod common;

use common::Asm;
use tendril_vm::objects::{Record, RecordTemplate};
use tendril_vm::value::Value;

/// `a?.b.c`: load `a`, short-circuit to `null` if it is, else `LoadField`
/// twice (`b` then `c`).
fn optional_chain_function() -> Vec<u8> {
    let mut code = Asm::new();
    code.load_local(0); // a
    let branch_pos = code.pos();
    code.branch(common::IF_NULL, 0); // target patched in below
    code.load_field(0); // a.b
    code.load_field(0); // (a.b).c
    code.ret();
    let short_circuit_target = code.pos();
    code.load_null().ret();

    let mut bytes = code.into_code();
    let target_bytes = short_circuit_target.to_le_bytes();
    bytes[branch_pos as usize + 2..branch_pos as usize + 6].copy_from_slice(&target_bytes);
    bytes
}

#[test]
fn null_receiver_short_circuits_without_evaluating_the_rest() {
    let mut ctx = common::fresh_context();
    let code = optional_chain_function();
    let function = common::function_template(1, 1, code, Vec::new());
    let (_name, functions) = common::load_module(&mut ctx, "chain_module", vec![function], vec![]);
    let f = functions[0];

    let result = common::run(&mut ctx, f, &[Value::null()]).unwrap();
    assert!(result.is_null());
}

#[test]
fn a_fully_populated_chain_evaluates_to_the_final_field() {
    let mut ctx = common::fresh_context();
    let code = optional_chain_function();
    let function = common::function_template(1, 1, code, Vec::new());
    let (_name, functions) = common::load_module(&mut ctx, "chain_module", vec![function], vec![]);
    let f = functions[0];

    let c = Value::from_embedded_int(42).unwrap();
    let inner_template = ctx.allocate(RecordTemplate(vec![]), false).unwrap();
    let inner = ctx.allocate(Record { template: inner_template, fields: vec![c] }, false).unwrap();
    let outer_template = ctx.allocate(RecordTemplate(vec![]), false).unwrap();
    let outer = ctx.allocate(Record { template: outer_template, fields: vec![inner] }, false).unwrap();

    let result = common::run(&mut ctx, f, &[outer]).unwrap();
    assert_eq!(result.as_embedded_int(), Some(42));
}
