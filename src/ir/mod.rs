//! SSA IR generation (§4.B-§4.D): lowers a validated AST into per-function
//! SSA form, then runs the small fixed pipeline of local analyses the rest
//! of the compiler depends on (dominators, handler-observer wiring, dead
//! code elimination). Bytecode emission from this IR is out of scope here.

pub mod builder;
pub mod constfold;
pub mod dce;
pub mod dominators;
pub mod function;
pub mod observers;

pub use builder::FunctionIrGen;
pub use dominators::DominatorTree;
pub use function::{BinaryOp, Block, BlockId, CondKind, Constant, ContainerKind, Function, Inst, InstId, LValue, ParamId, Terminator, UnaryOp, ValueKind};

/// Runs the post-construction pipeline on a finished function: observer
/// wiring first (it needs the original `ObserveAssign` placeholders DCE
/// would otherwise consider dead), then dead code elimination.
pub fn finalize(function: &mut Function) {
    let resolved = observers::ObserverPass::run(function);
    for (observe_inst, publishers) in resolved {
        if let ValueKind::ObserveAssign(_, operands) = &mut function.inst_mut(observe_inst).value {
            *operands = publishers;
        }
    }
    dce::run(function);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringTable;

    #[test]
    fn finalize_resolves_observe_assign_to_its_publisher() {
        let mut gen = FunctionIrGen::new(None);
        let mut table = StringTable::new();
        let x = table.insert("x").unwrap();

        let body = gen.body();
        gen.seal_block(body);

        // A trivial `defer` whose handler observes `x` and writes it
        // somewhere, so DCE sees a live use of the `ObserveAssign` the
        // observer pass has to resolve (an unused observation would
        // otherwise be pruned before we get to inspect it).
        gen.defer(body, move |gen, block| {
            let observed = gen.read_variable(x, block);
            gen.emit_write(block, LValue::Param(ParamId::new(0)), observed);
            block
        });

        let value = gen.emit_constant(body, Constant::Integer(42));
        gen.emit_publish_assign(body, x, value);

        let mut function = gen.into_function();
        finalize(&mut function);

        let handler_block = function.block_ids().find(|&b| function.block(b).is_handler).expect("defer created a handler block");
        let observe = function
            .block(handler_block)
            .insts
            .iter()
            .copied()
            .find(|&id| matches!(function.inst(id).value, ValueKind::ObserveAssign(..)))
            .expect("read_variable in a handler block emits an ObserveAssign");

        match &function.inst(observe).value {
            ValueKind::ObserveAssign(_, publishers) => assert_eq!(publishers, &[value]),
            other => panic!("expected an ObserveAssign, got {other:?}"),
        }
    }
}
