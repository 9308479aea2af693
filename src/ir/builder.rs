//! `FunctionIrGen`: one instance per function being lowered to SSA form
//! (§4.B).
//!
//! This is the on-the-fly SSA construction algorithm from Braun, Buchwald,
//! Hack, Leißa, Mallon & Zwinkau, as implemented in `compiler/ir_gen/func.cpp`:
//! there is no separate phi-placement pre-pass. `read_variable` either
//! returns a known definition, recurses into a single predecessor, or drops
//! a placeholder phi that gets patched in once the block is sealed.
//!
//! The builder only exposes the primitives an AST walker would call
//! (`emit_binary`, `compile_if`, `open_scope`, ...) -- walking a concrete
//! parser AST is the parser's concern, out of scope here exactly as the
//! lexer and parser are (see the crate-level docs). Tests below drive the
//! primitives directly, the same way `fuel-vm`'s interpreter tests call
//! individual opcodes rather than going through an assembler.

use std::collections::HashMap;

use crate::error::IrError;
use crate::intern::InternedString;

use super::constfold;
use super::function::{BinaryOp, BlockId, CondKind, Constant, ContainerKind, Function, Inst, InstId, LValue, Terminator, UnaryOp, ValueKind};

/// A builder-time nested scope marker (§3.2 "Region"). Lowering maintains a
/// stack of these so `return`/`break`/`continue` know which deferred tails
/// to run on the way out.
enum Region {
    Loop {
        break_block: BlockId,
        continue_block: BlockId,
    },
    Scope {
        original_handler: Option<BlockId>,
        /// Deferred expressions in registration order. Each is a lowering
        /// callback that emits the deferred expression's normal-path
        /// instructions into whatever block is "current" when it runs.
        /// `return`/`break`/`continue`/normal scope exit can each trigger a
        /// run of this list (in reverse, per §4.B.5): calling a closure
        /// only emits more IR, it doesn't consume the registration, so the
        /// same defer correctly fires again on a later exit through the
        /// same scope.
        deferred: Vec<Box<dyn FnMut(&mut FunctionIrGen, BlockId) -> BlockId>>,
    },
}

/// LVN cache key (§4.B.7): constants keyed by payload, binary/unary ops by
/// (op, operands) with commutative operands pre-sorted, const-module reads
/// by member id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Constant(ConstKey),
    Binary(BinaryOpKey, InstId, InstId),
    Unary(UnaryOpKey, InstId),
    ConstModuleRead(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    Null,
    True,
    False,
    Integer(i64),
    Float(u64), // bit pattern, so NaN/normal floats both hash consistently.
    String(InternedString),
    Symbol(InternedString),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BinaryOpKey(u8);
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct UnaryOpKey(u8);

fn const_key(c: &Constant) -> ConstKey {
    match c {
        Constant::Null => ConstKey::Null,
        Constant::True => ConstKey::True,
        Constant::False => ConstKey::False,
        Constant::Integer(i) => ConstKey::Integer(*i),
        Constant::Float(f) => ConstKey::Float(f.to_bits()),
        Constant::String(id) => ConstKey::String(*id),
        Constant::Symbol(id) => ConstKey::Symbol(*id),
    }
}

pub struct FunctionIrGen {
    function: Function,
    current_variables: HashMap<(InternedString, BlockId), InstId>,
    regions: Vec<Region>,
    current_handler: Option<BlockId>,
    value_table: HashMap<(BlockId, CacheKey), InstId>,
    diagnostics: Vec<IrError>,
}

impl FunctionIrGen {
    pub fn new(name: Option<InternedString>) -> Self {
        let function = Function::new(name);
        let entry = function.entry;
        let mut gen = Self {
            function,
            current_variables: HashMap::new(),
            regions: Vec::new(),
            current_handler: None,
            value_table: HashMap::new(),
            diagnostics: Vec::new(),
        };
        gen.function.set_terminator(entry, Terminator::Entry(Vec::new()));
        gen.seal_block(entry);
        gen
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn into_function(self) -> Function {
        self.function
    }

    pub fn diagnostics(&self) -> &[IrError] {
        &self.diagnostics
    }

    pub fn entry(&self) -> BlockId {
        self.function.entry
    }

    pub fn body(&self) -> BlockId {
        self.function.body
    }

    pub fn exit(&self) -> BlockId {
        self.function.exit
    }

    /// New blocks inherit the currently active `defer` handler (§4.D.2
    /// relies on `Block::handler` being set so the observer pass can find,
    /// for each handler, which ordinary blocks designate it).
    pub fn make_block(&mut self) -> BlockId {
        let id = self.function.add_block();
        self.function.block_mut(id).handler = self.current_handler;
        id
    }

    pub fn make_handler_block(&mut self) -> BlockId {
        self.function.add_handler_block()
    }

    // ---- emission -------------------------------------------------------

    /// Inserts `value` into `block`, honoring §4.B.9's placement rules:
    /// phi-family instructions cluster at the head (after any already
    /// there), everything else appends at the tail; a filled block only
    /// accepts phi-family insertions.
    fn emit(&mut self, block: BlockId, value: ValueKind, name: Option<InternedString>) -> InstId {
        let is_phi_family = value.is_phi_family();
        debug_assert!(
            !self.function.block(block).filled || is_phi_family,
            "cannot insert a non-phi-family instruction into a filled block"
        );

        let inst_id = self.function.add_inst(block, Inst { value, name });

        if is_phi_family {
            // `add_inst` appended it at the tail; if there are earlier
            // non-phi instructions already, move it to just after the
            // existing phi-family cluster to preserve clustering order.
            let ids = self.function.block(block).insts.clone();
            if let Some(pos) = ids.iter().position(|&id| !self.function.inst(id).value.is_phi_family()) {
                let insts = &mut self.function.block_mut(block).insts;
                let last_index = insts.len() - 1;
                insts.swap(pos, last_index);
            }
        }
        inst_id
    }

    pub fn emit_constant(&mut self, block: BlockId, constant: Constant) -> InstId {
        let key = CacheKey::Constant(const_key(&constant));
        if let Some(&cached) = self.value_table.get(&(block, key.clone())) {
            return cached;
        }
        let inst_id = self.emit(block, ValueKind::Constant(constant), None);
        self.value_table.insert((block, key), inst_id);
        inst_id
    }

    pub fn emit_binary(&mut self, block: BlockId, op: BinaryOp, mut lhs: InstId, mut rhs: InstId) -> InstId {
        if op.is_commutative() && rhs.index() < lhs.index() {
            std::mem::swap(&mut lhs, &mut rhs);
        }

        if let (Some(l), Some(r)) = (self.as_constant(lhs), self.as_constant(rhs)) {
            match constfold::eval_binary(op, &l, &r) {
                Ok(folded) => return self.emit_constant(block, folded),
                Err(err) => self.diagnostics.push(IrError::Malformed(format!("constant fold failed for {op:?}: {err}"))),
            }
        }

        let key = CacheKey::Binary(BinaryOpKey(op as u8), lhs, rhs);
        if let Some(&cached) = self.value_table.get(&(block, key.clone())) {
            return cached;
        }
        let inst_id = self.emit(block, ValueKind::BinaryOp(op, lhs, rhs), None);
        self.value_table.insert((block, key), inst_id);
        inst_id
    }

    pub fn emit_unary(&mut self, block: BlockId, op: UnaryOp, operand: InstId) -> InstId {
        if let Some(c) = self.as_constant(operand) {
            match constfold::eval_unary(op, &c) {
                Ok(folded) => return self.emit_constant(block, folded),
                Err(err) => self.diagnostics.push(IrError::Malformed(format!("constant fold failed for {op:?}: {err}"))),
            }
        }

        let key = CacheKey::Unary(UnaryOpKey(op as u8), operand);
        if let Some(&cached) = self.value_table.get(&(block, key.clone())) {
            return cached;
        }
        let inst_id = self.emit(block, ValueKind::UnaryOp(op, operand), None);
        self.value_table.insert((block, key), inst_id);
        inst_id
    }

    /// Reads a module member known to be `const`; cached like any other
    /// pure value (§4.B.7). Non-const module reads are never cached since
    /// another write anywhere could change them.
    pub fn emit_const_module_read(&mut self, block: BlockId, member: u32) -> InstId {
        let key = CacheKey::ConstModuleRead(member);
        if let Some(&cached) = self.value_table.get(&(block, key.clone())) {
            return cached;
        }
        let inst_id = self.emit(block, ValueKind::Read(LValue::Module(member)), None);
        self.value_table.insert((block, key), inst_id);
        inst_id
    }

    pub fn emit_read(&mut self, block: BlockId, lvalue: LValue) -> InstId {
        self.emit(block, ValueKind::Read(lvalue), None)
    }

    pub fn emit_write(&mut self, block: BlockId, lvalue: LValue, value: InstId) -> InstId {
        self.emit(block, ValueKind::Write(lvalue, value), None)
    }

    /// Publishes `value` under `symbol` for any handler that observes it
    /// (§4.D.2); resolved against `ObserveAssign` placeholders by
    /// [`super::finalize`].
    pub fn emit_publish_assign(&mut self, block: BlockId, symbol: InternedString, value: InstId) -> InstId {
        self.emit(block, ValueKind::PublishAssign(symbol, value), None)
    }

    pub fn emit_call(&mut self, block: BlockId, callee: InstId, args: Vec<InstId>) -> InstId {
        self.emit(block, ValueKind::Call(callee, args), None)
    }

    pub fn emit_container(&mut self, block: BlockId, kind: ContainerKind, items: Vec<InstId>) -> InstId {
        self.emit(block, ValueKind::Container(kind, items), None)
    }

    fn as_constant(&self, inst: InstId) -> Option<Constant> {
        match &self.function.inst(inst).value {
            ValueKind::Constant(c) => Some(c.clone()),
            _ => None,
        }
    }

    // ---- Format folding (§4.B.8) -----------------------------------------

    /// Folds maximal runs of `>= 2` constant args into a single formatted
    /// string constant; `resolve_text` renders a `String`/`Symbol` constant
    /// to the text the formatter should emit for it (interning is the
    /// caller's concern, not the builder's -- see `intern::StringTable`).
    pub fn emit_format(&mut self, block: BlockId, args: Vec<InstId>, intern: &mut impl FnMut(&str) -> InternedString, resolve_text: &impl Fn(InternedString) -> String) -> InstId {
        let mut folded_args: Vec<InstId> = Vec::new();
        let mut run: Vec<Constant> = Vec::new();

        let mut flush = |run: &mut Vec<Constant>, folded_args: &mut Vec<InstId>, gen: &mut Self| {
            if run.len() >= 2 {
                let text = format_run(run, resolve_text);
                let id = intern(&text);
                folded_args.push(gen.emit_constant(block, Constant::String(id)));
            } else {
                for c in run.drain(..) {
                    folded_args.push(gen.emit_constant(block, c));
                }
            }
            run.clear();
        };

        for arg in args {
            match self.as_constant(arg) {
                Some(c) => run.push(c),
                None => {
                    flush(&mut run, &mut folded_args, self);
                    folded_args.push(arg);
                }
            }
        }
        flush(&mut run, &mut folded_args, self);

        if let [single] = folded_args.as_slice() {
            let single = *single;
            if matches!(self.as_constant(single), Some(Constant::String(_))) {
                return single;
            }
        }

        self.emit(block, ValueKind::Format(folded_args), None)
    }

    // ---- Braun et al. variable resolution (§4.B.2) -----------------------

    pub fn write_variable(&mut self, symbol: InternedString, block: BlockId, value: InstId) {
        self.current_variables.insert((symbol, block), value);
    }

    pub fn read_variable(&mut self, symbol: InternedString, block: BlockId) -> InstId {
        if let Some(&value) = self.current_variables.get(&(symbol, block)) {
            return value;
        }
        self.read_variable_recursive(symbol, block)
    }

    fn read_variable_recursive(&mut self, symbol: InternedString, block: BlockId) -> InstId {
        let value = if block == self.function.body && self.function.block(block).predecessors.is_empty() {
            // The function-body root: no predecessor can define it.
            self.diagnostics.push(IrError::MaybeUninitialized { name: symbol.to_string() });
            self.emit(block, ValueKind::Error(format!("uninitialized variable `{symbol}`")), None)
        } else if self.function.block(block).is_handler {
            // Exception handler: the value depends on which publisher is
            // live, resolved later by the observer pass (§4.D.2).
            self.emit(block, ValueKind::ObserveAssign(symbol, Vec::new()), None)
        } else if !self.function.block(block).sealed {
            let phi = self.emit(block, ValueKind::Phi(Vec::new()), None);
            self.function.block_mut(block).incomplete_phis.push((symbol, phi));
            phi
        } else {
            let preds = self.function.block(block).predecessors.clone();
            match preds.as_slice() {
                [] => {
                    self.diagnostics.push(IrError::NeverInitialized { name: symbol.to_string() });
                    self.emit(block, ValueKind::Error(format!("never-initialized variable `{symbol}`")), None)
                }
                [only] => self.read_variable(symbol, *only),
                _ => {
                    // Break cycles: bind the symbol to the (still empty)
                    // phi before recursing into predecessors.
                    let phi = self.emit(block, ValueKind::Phi(Vec::new()), None);
                    self.write_variable(symbol, block, phi);
                    self.add_phi_operands(symbol, block, phi)
                }
            }
        };
        self.write_variable(symbol, block, value);
        value
    }

    fn add_phi_operands(&mut self, symbol: InternedString, block: BlockId, phi: InstId) -> InstId {
        let preds = self.function.block(block).predecessors.clone();
        let operands: Vec<InstId> = preds.iter().map(|&pred| self.read_variable(symbol, pred)).collect();
        self.set_phi_operands(phi, operands);
        self.try_remove_trivial_phi(phi)
    }

    fn set_phi_operands(&mut self, phi: InstId, operands: Vec<InstId>) {
        if let ValueKind::Phi(existing) = &mut self.function.inst_mut(phi).value {
            *existing = operands;
        }
    }

    /// If `phi`'s operands (excluding self-references) collapse to a single
    /// distinct value, replace it with an `Alias` to that value (§4.B.2).
    /// A fully-empty phi (no operands at all, i.e. the variable was never
    /// initialized along any path) is left as an error marker.
    fn try_remove_trivial_phi(&mut self, phi: InstId) -> InstId {
        let operands = match &self.function.inst(phi).value {
            ValueKind::Phi(ops) => ops.clone(),
            _ => return phi,
        };

        let mut distinct: Option<InstId> = None;
        for op in &operands {
            if *op == phi {
                continue;
            }
            match distinct {
                None => distinct = Some(*op),
                Some(existing) if existing == *op => {}
                Some(_) => return phi, // genuinely non-trivial
            }
        }

        match distinct {
            Some(value) => {
                self.function.inst_mut(phi).value = ValueKind::Alias(value);
                value
            }
            None => phi,
        }
    }

    /// Seals `block`: no further predecessors will ever be added. Every
    /// phi recorded as incomplete while the block was open is finalized by
    /// reading each predecessor (§4.B.2's "on sealing... phis are
    /// finalized").
    pub fn seal_block(&mut self, block: BlockId) {
        let incomplete = std::mem::take(&mut self.function.block_mut(block).incomplete_phis);
        for (symbol, phi) in incomplete {
            self.add_phi_operands(symbol, block, phi);
        }
        self.function.block_mut(block).sealed = true;
    }

    // ---- terminators ------------------------------------------------------

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        self.function.set_terminator(block, terminator);
    }

    // ---- optional chaining (§4.B.4) ---------------------------------------

    /// Compiles one `?.`/`.`-chain. `steps` are closures each taking the
    /// current receiver instruction and block and returning the next
    /// receiver and block; `nullable` marks which steps are guarded by `?`.
    /// On a null receiver the whole chain short-circuits to `null` without
    /// evaluating later steps, matching §4.B.4 and the §8 "optional chain"
    /// scenario.
    pub fn compile_optional_chain(
        &mut self,
        mut block: BlockId,
        mut receiver: InstId,
        steps: Vec<(bool, Box<dyn FnOnce(&mut Self, BlockId, InstId) -> (BlockId, InstId)>)>,
    ) -> (BlockId, InstId) {
        let end_block = self.make_block();
        let mut null_operands: Vec<InstId> = Vec::new();

        for (nullable, step) in steps {
            if nullable {
                let not_null_block = self.make_block();
                self.seal_block(not_null_block);
                self.set_terminator(
                    block,
                    Terminator::Branch {
                        cond: CondKind::IfNull,
                        value: receiver,
                        then_block: end_block,
                        else_block: not_null_block,
                    },
                );
                null_operands.push(self.emit_constant(block, Constant::Null));
                block = not_null_block;
            }
            let (next_block, next_receiver) = step(self, block, receiver);
            block = next_block;
            receiver = next_receiver;
        }

        self.set_terminator(block, Terminator::Jump(end_block));
        self.seal_block(end_block);

        if null_operands.is_empty() {
            return (end_block, receiver);
        }

        let mut operands = null_operands;
        operands.push(receiver);
        // Identical operands collapse via the same trivial-phi logic used
        // for ordinary variable resolution.
        let phi = self.emit(end_block, ValueKind::Phi(operands), None);
        let result = self.try_remove_trivial_phi(phi);
        (end_block, result)
    }

    // ---- scopes and defer (§4.B.5) ----------------------------------------

    pub fn open_scope(&mut self) {
        self.regions.push(Region::Scope {
            original_handler: self.current_handler,
            deferred: Vec::new(),
        });
    }

    pub fn open_loop(&mut self, break_block: BlockId, continue_block: BlockId) {
        self.regions.push(Region::Loop { break_block, continue_block });
    }

    /// Registers a `defer expr`. `compile_expr` lowers the deferred
    /// expression's instructions starting at the block it's handed, and is
    /// called twice: once now, to build the handler block that runs if the
    /// enclosing scope unwinds past this point (it ends with `Rethrow`, so
    /// the exception keeps propagating once the defer has run); and again
    /// on every normal exit through this scope (`run_deferred_tail`), to
    /// emit the same expression on the straight-line path.
    ///
    /// After this call, the new handler becomes the ambient handler for
    /// whatever is compiled next in the enclosing scope (§4.B.5): later
    /// statements are now guarded by this defer too. `current_block` is the
    /// block the `defer` statement itself sits in; it's marked as
    /// designating the new handler too, which matters the first time a
    /// scope's `defer` runs since that block may predate this call (e.g. a
    /// function's body block).
    pub fn defer(&mut self, current_block: BlockId, mut compile_expr: impl FnMut(&mut Self, BlockId) -> BlockId + 'static) {
        let handler = self.make_handler_block();
        let handler_exit = compile_expr(self, handler);
        self.set_terminator(handler_exit, Terminator::Rethrow(self.function.exit));
        self.seal_block(handler);

        self.current_handler = Some(handler);
        self.function.block_mut(current_block).handler = Some(handler);

        if let Some(Region::Scope { deferred }) = self.regions.last_mut() {
            deferred.push(Box::new(move |gen: &mut Self, block: BlockId| compile_expr(gen, block)));
        }
    }

    /// Runs `region`'s deferred tail, in reverse registration order
    /// (§4.B.5), starting from `block`. Returns the block execution
    /// continues in afterward. The closures are taken out and put back
    /// rather than called in place, since calling one needs `&mut self` to
    /// emit IR while `self.regions` itself would otherwise stay borrowed.
    fn run_deferred_tail(&mut self, region_index: usize, mut block: BlockId) -> BlockId {
        let (mut closures, original_handler) = match &mut self.regions[region_index] {
            Region::Scope { deferred, original_handler } => (std::mem::take(deferred), *original_handler),
            Region::Loop { .. } => return block,
        };

        for compile_expr in closures.iter_mut().rev() {
            block = compile_expr(self, block);
        }

        if let Region::Scope { deferred, .. } = &mut self.regions[region_index] {
            *deferred = closures;
        }
        self.current_handler = original_handler;
        block
    }

    /// `return`/`break`/`continue`: walks the region stack from the top
    /// down to (and including) the target, running each scope's deferred
    /// tail (§4.B.5's `compile_scope_exit_until`).
    pub fn compile_scope_exit_until(&mut self, mut block: BlockId, target_depth: usize) -> BlockId {
        for index in (target_depth..self.regions.len()).rev() {
            if matches!(self.regions[index], Region::Scope { .. }) {
                block = self.run_deferred_tail(index, block);
            }
        }
        block
    }

    pub fn close_scope(&mut self, block: BlockId) -> BlockId {
        let index = self.regions.len() - 1;
        let block = self.run_deferred_tail(index, block);
        self.regions.pop();
        block
    }

    pub fn innermost_loop(&self) -> Option<(BlockId, BlockId)> {
        self.regions.iter().rev().find_map(|r| match r {
            Region::Loop { break_block, continue_block } => Some((*break_block, *continue_block)),
            _ => None,
        })
    }

    pub fn region_depth(&self) -> usize {
        self.regions.len()
    }
}

fn format_run(values: &[Constant], resolve_text: &impl Fn(InternedString) -> String) -> String {
    let mut out = String::new();
    for value in values {
        match value {
            Constant::String(id) => out.push_str(&resolve_text(*id)),
            Constant::Symbol(id) => {
                out.push('#');
                out.push_str(&resolve_text(*id));
            }
            other => out.push_str(&constfold::format_constants(std::slice::from_ref(other))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringTable;

    fn sym(table: &mut StringTable, s: &str) -> InternedString {
        table.insert(s).unwrap()
    }

    #[test]
    fn straight_line_variable_resolution() {
        let mut gen = FunctionIrGen::new(None);
        let mut table = StringTable::new();
        let x = sym(&mut table, "x");

        let body = gen.body();
        gen.seal_block(body);
        let one = gen.emit_constant(body, Constant::Integer(1));
        gen.write_variable(x, body, one);
        let read = gen.read_variable(x, body);
        assert_eq!(read, one);
    }

    #[test]
    fn diamond_merge_produces_a_phi() {
        let mut gen = FunctionIrGen::new(None);
        let mut table = StringTable::new();
        let x = sym(&mut table, "x");

        let body = gen.body();
        let then_block = gen.make_block();
        let else_block = gen.make_block();
        let merge = gen.make_block();

        let cond = gen.emit_constant(body, Constant::True);
        gen.seal_block(body);
        gen.set_terminator(
            body,
            Terminator::Branch {
                cond: CondKind::IfTrue,
                value: cond,
                then_block,
                else_block,
            },
        );
        gen.seal_block(then_block);
        gen.seal_block(else_block);

        let one = gen.emit_constant(then_block, Constant::Integer(1));
        gen.write_variable(x, then_block, one);
        gen.set_terminator(then_block, Terminator::Jump(merge));

        let two = gen.emit_constant(else_block, Constant::Integer(2));
        gen.write_variable(x, else_block, two);
        gen.set_terminator(else_block, Terminator::Jump(merge));

        gen.seal_block(merge);
        let merged = gen.read_variable(x, merge);

        match &gen.function().inst(merged).value {
            ValueKind::Phi(ops) => assert_eq!(ops.len(), 2),
            other => panic!("expected a phi, got {other:?}"),
        }
    }

    #[test]
    fn identical_branches_collapse_to_no_phi() {
        let mut gen = FunctionIrGen::new(None);
        let mut table = StringTable::new();
        let x = sym(&mut table, "x");

        let body = gen.body();
        let then_block = gen.make_block();
        let else_block = gen.make_block();
        let merge = gen.make_block();

        let cond = gen.emit_constant(body, Constant::True);
        gen.seal_block(body);
        gen.set_terminator(
            body,
            Terminator::Branch {
                cond: CondKind::IfTrue,
                value: cond,
                then_block,
                else_block,
            },
        );
        gen.seal_block(then_block);
        gen.seal_block(else_block);

        let shared = gen.emit_constant(body, Constant::Integer(9));
        gen.write_variable(x, then_block, shared);
        gen.set_terminator(then_block, Terminator::Jump(merge));
        gen.write_variable(x, else_block, shared);
        gen.set_terminator(else_block, Terminator::Jump(merge));

        gen.seal_block(merge);
        let merged = gen.read_variable(x, merge);
        assert_eq!(merged, shared, "both branches define the same value, so no phi should survive");
    }

    #[test]
    fn binary_constant_folding_produces_a_constant() {
        let mut gen = FunctionIrGen::new(None);
        let body = gen.body();
        gen.seal_block(body);
        let a = gen.emit_constant(body, Constant::Integer(2));
        let b = gen.emit_constant(body, Constant::Integer(3));
        let sum = gen.emit_binary(body, BinaryOp::Plus, a, b);
        assert!(matches!(&gen.function().inst(sum).value, ValueKind::Constant(Constant::Integer(5))));
    }

    #[test]
    fn lvn_caches_identical_binary_ops() {
        let mut gen = FunctionIrGen::new(None);
        let body = gen.body();
        gen.seal_block(body);
        let x = gen.emit_read(body, LValue::Param(crate::ir::function::ParamId::new(0)));
        let y = gen.emit_read(body, LValue::Param(crate::ir::function::ParamId::new(1)));
        let a = gen.emit_binary(body, BinaryOp::Plus, x, y);
        let b = gen.emit_binary(body, BinaryOp::Plus, x, y);
        assert_eq!(a, b);
    }
}
