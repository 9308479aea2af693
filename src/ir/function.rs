//! Per-function SSA IR entities: blocks, instructions, and the arenas that
//! own them (§3.2, §9 "Cyclic data").
//!
//! Every node is referenced by a typed 32-bit id into a `Function`-owned
//! arena rather than by pointer or `Rc`, so that the naturally cyclic phi
//! graph (a block dominated by itself through a back edge) never needs
//! `Rc<RefCell<_>>` or unsafe aliasing: a cycle is just two ids pointing at
//! each other's owning vectors. Grounded on `compiler/ir_gen/func.cpp` and
//! the IR entity definitions it builds against.

use std::fmt;

use crate::intern::InternedString;

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            /// Only meant for arena internals and test fixtures; regular
            /// code should obtain ids from the arena that owns them.
            pub(crate) fn new(index: u32) -> Self {
                Self(index)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(BlockId);
arena_id!(InstId);
arena_id!(ParamId);
arena_id!(LocalListId);
arena_id!(RecordTemplateId);

/// A binary operator, shared by the IR and the constant evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Power,
    LeftShift,
    RightShift,
    BitAnd,
    BitOr,
    BitXor,
    Equals,
    NotEquals,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    /// Commutative ops get their operands sorted by id for LVN caching
    /// (§4.B.7, §3.2 "normalised so left <= right").
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Plus | BinaryOp::Multiply | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Equals | BinaryOp::NotEquals
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Plus,
    Minus,
    BitNot,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Array,
    Tuple,
    Set,
    Map,
}

/// A folded or literal constant, reused verbatim as an operand once folded
/// (§3.2 "the result is itself stored as a Constant").
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    True,
    False,
    Integer(i64),
    Float(f64),
    String(InternedString),
    Symbol(InternedString),
}

/// An assignable location a `Read`/`Write` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LValue {
    Module(u32),
    Param(ParamId),
    /// `level` counts environment hops from the current closure env up to
    /// the environment that owns `index` (§4.B.6).
    Closure { env: InstId, level: u32, index: u32 },
    Field(InstId, InternedString),
    TupleField(InstId, u32),
    Index(InstId, InstId),
}

/// The tagged union every SSA instruction's payload is drawn from (§3.2,
/// §9 "tagged union with a tag enum... one central switch").
#[derive(Debug, Clone)]
pub enum ValueKind {
    Read(LValue),
    Write(LValue, InstId),
    /// Trivial identity, left behind by phi simplification (§4.B.2).
    Alias(InstId),
    Constant(Constant),
    OuterEnvironment,
    BinaryOp(BinaryOp, InstId, InstId),
    UnaryOp(UnaryOp, InstId),
    Call(InstId, Vec<InstId>),
    MethodCall(InstId, Vec<InstId>),
    Aggregate { instance: InstId, name: InternedString },
    GetAggregateMember(InstId, u32),
    MakeEnvironment { parent: Option<InstId>, size: u32 },
    MakeClosure { env: InstId, template: u32 },
    MakeIterator(InstId),
    Record(RecordTemplateId),
    Container(ContainerKind, Vec<InstId>),
    Format(Vec<InstId>),
    Phi(Vec<InstId>),
    PublishAssign(InternedString, InstId),
    ObserveAssign(InternedString, Vec<InstId>),
    Nop,
    Error(String),
}

impl ValueKind {
    /// The direct operands of this value, for DCE liveness propagation and
    /// dominator-independent "does this use X" queries. Mirrors §9's single
    /// central dispatch point rather than scattering matches everywhere.
    pub fn operands(&self) -> Vec<InstId> {
        match self {
            ValueKind::Read(lvalue) => lvalue_operands(lvalue),
            ValueKind::Write(lvalue, value) => {
                let mut ops = lvalue_operands(lvalue);
                ops.push(*value);
                ops
            }
            ValueKind::Alias(inst) | ValueKind::UnaryOp(_, inst) | ValueKind::MakeIterator(inst) => vec![*inst],
            ValueKind::BinaryOp(_, a, b) => vec![*a, *b],
            ValueKind::Call(callee, args) => {
                let mut ops = vec![*callee];
                ops.extend(args);
                ops
            }
            ValueKind::MethodCall(aggregate, args) => {
                let mut ops = vec![*aggregate];
                ops.extend(args);
                ops
            }
            ValueKind::Aggregate { instance, .. } => vec![*instance],
            ValueKind::GetAggregateMember(inst, _) => vec![*inst],
            ValueKind::MakeEnvironment { parent, .. } => parent.iter().copied().collect(),
            ValueKind::MakeClosure { env, .. } => vec![*env],
            ValueKind::Container(_, items) | ValueKind::Format(items) | ValueKind::Phi(items) | ValueKind::ObserveAssign(_, items) => {
                items.clone()
            }
            ValueKind::PublishAssign(_, inst) => vec![*inst],
            ValueKind::Constant(_) | ValueKind::OuterEnvironment | ValueKind::Record(_) | ValueKind::Nop | ValueKind::Error(_) => {
                Vec::new()
            }
        }
    }

    /// Whether this instruction has effects beyond producing a value: a
    /// call, a write, or a publish. Used by DCE (§4.D.3).
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            ValueKind::Write(..) | ValueKind::Call(..) | ValueKind::MethodCall(..) | ValueKind::PublishAssign(..) | ValueKind::Error(_)
        )
    }

    pub fn is_phi_family(&self) -> bool {
        matches!(self, ValueKind::Phi(_) | ValueKind::ObserveAssign(..) | ValueKind::Error(_))
    }
}

fn lvalue_operands(lvalue: &LValue) -> Vec<InstId> {
    match lvalue {
        LValue::Closure { env, .. } => vec![*env],
        LValue::Field(inst, _) | LValue::TupleField(inst, _) => vec![*inst],
        LValue::Index(base, index) => vec![*base, *index],
        LValue::Module(_) | LValue::Param(_) => Vec::new(),
    }
}

#[derive(Debug, Clone)]
pub struct Inst {
    pub value: ValueKind,
    pub name: Option<InternedString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    IfTrue,
    IfFalse,
    IfNull,
    IfNotNull,
}

#[derive(Debug, Clone)]
pub enum Terminator {
    None,
    Jump(BlockId),
    Branch {
        cond: CondKind,
        value: InstId,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(InstId, BlockId),
    AssertFail {
        expr_text: String,
        message: Option<InstId>,
        exit: BlockId,
    },
    Rethrow(BlockId),
    Never(BlockId),
    Entry(Vec<BlockId>),
}

impl Terminator {
    pub fn is_set(&self) -> bool {
        !matches!(self, Terminator::None)
    }

    /// The set of blocks this terminator can transfer control to, used to
    /// build predecessor edges and the dominator tree's CFG view.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::None => Vec::new(),
            Terminator::Jump(b) => vec![*b],
            Terminator::Branch { then_block, else_block, .. } => vec![*then_block, *else_block],
            Terminator::Return(_, exit)
            | Terminator::AssertFail { exit, .. }
            | Terminator::Rethrow(exit)
            | Terminator::Never(exit) => vec![*exit],
            Terminator::Entry(handlers) => handlers.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub label: Option<InternedString>,
    pub insts: Vec<InstId>,
    pub terminator: Terminator,
    pub predecessors: Vec<BlockId>,
    pub handler: Option<BlockId>,
    pub sealed: bool,
    pub filled: bool,
    pub is_handler: bool,
    /// Incomplete phis recorded while this block was not yet sealed
    /// (§4.B.2); `(symbol, phi inst)` pairs, finalized on `seal`.
    pub incomplete_phis: Vec<(InternedString, InstId)>,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::None
    }
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One compiled function's SSA body: block/inst arenas plus the designated
/// entry/body/exit blocks every function has (§3.2).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<InternedString>,
    blocks: Vec<Block>,
    insts: Vec<Inst>,
    pub params: Vec<ParamId>,
    pub record_templates: Vec<Vec<InternedString>>,
    pub entry: BlockId,
    pub body: BlockId,
    pub exit: BlockId,
}

impl Function {
    pub fn new(name: Option<InternedString>) -> Self {
        let mut blocks = Vec::new();
        let entry = BlockId(0);
        blocks.push(Block::new());
        let body = BlockId(1);
        blocks.push(Block::new());
        let exit = BlockId(2);
        blocks.push(Block::new());

        Self {
            name,
            blocks,
            insts: Vec::new(),
            params: Vec::new(),
            record_templates: Vec::new(),
            entry,
            body,
            exit,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Block::new());
        BlockId((self.blocks.len() - 1) as u32)
    }

    pub fn add_handler_block(&mut self) -> BlockId {
        let id = self.add_block();
        self.block_mut(id).is_handler = true;
        id
    }

    pub fn add_inst(&mut self, block: BlockId, inst: Inst) -> InstId {
        self.insts.push(inst);
        let id = InstId((self.insts.len() - 1) as u32);
        self.block_mut(block).insts.push(id);
        id
    }

    pub fn add_param(&mut self) -> ParamId {
        let id = ParamId(self.params.len() as u32);
        self.params.push(id);
        id
    }

    pub fn add_record_template(&mut self, keys: Vec<InternedString>) -> RecordTemplateId {
        self.record_templates.push(keys);
        RecordTemplateId((self.record_templates.len() - 1) as u32)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.insts[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> {
        (0..self.insts.len() as u32).map(InstId)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Records `from` as a predecessor of every block `terminator` targets,
    /// per §4.B.9 ("setting a terminator... adds the current block to each
    /// target's predecessor list").
    pub fn set_terminator(&mut self, from: BlockId, terminator: Terminator) {
        let targets = terminator.targets();
        self.block_mut(from).terminator = terminator;
        self.block_mut(from).filled = true;
        for target in targets {
            debug_assert!(!self.block(target).sealed, "cannot add a predecessor edge into a sealed block");
            self.block_mut(target).predecessors.push(from);
        }
    }

    /// Removes a dead instruction's presence from its block's instruction
    /// list (the arena slot itself is left in place so ids stay stable;
    /// DCE only prunes block membership).
    pub fn remove_inst(&mut self, block: BlockId, inst: InstId) {
        self.block_mut(block).insts.retain(|&id| id != inst);
    }
}
