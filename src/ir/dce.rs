//! Dead code elimination (§4.D.3): remove instructions with no observable
//! effect and no live user.
//!
//! An instruction is live if it has side effects (`ValueKind::has_side_effects`)
//! or a terminator references it, or it is a transitive operand of another
//! live instruction. Unreferenced `PublishAssign`s left behind once their
//! `ObserveAssign` consumer's operand list has been pruned elsewhere are
//! cleaned up here too, as §4.D.2 notes.

use std::collections::HashSet;

use super::function::{Function, InstId};

pub fn run(function: &mut Function) {
    let live = find_live(function);

    for block in function.block_ids().collect::<Vec<_>>() {
        let dead: Vec<InstId> = function
            .block(block)
            .insts
            .iter()
            .copied()
            .filter(|inst| !live.contains(inst))
            .collect();
        for inst in dead {
            function.remove_inst(block, inst);
        }
    }
}

fn find_live(function: &Function) -> HashSet<InstId> {
    let mut live = HashSet::new();
    let mut worklist: Vec<InstId> = Vec::new();

    for block in function.block_ids() {
        for &inst_id in &function.block(block).insts {
            if function.inst(inst_id).value.has_side_effects() {
                worklist.push(inst_id);
            }
        }
        for target_inst in terminator_operand(function, block) {
            worklist.push(target_inst);
        }
    }

    while let Some(inst_id) = worklist.pop() {
        if !live.insert(inst_id) {
            continue;
        }
        for operand in function.inst(inst_id).value.operands() {
            if !live.contains(&operand) {
                worklist.push(operand);
            }
        }
    }

    live
}

fn terminator_operand(function: &Function, block: super::function::BlockId) -> Vec<InstId> {
    use super::function::Terminator;
    match &function.block(block).terminator {
        Terminator::Branch { value, .. } => vec![*value],
        Terminator::Return(value, _) => vec![*value],
        Terminator::AssertFail { message: Some(msg), .. } => vec![*msg],
        _ => Vec::new(),
    }
}
