//! Shared scaffolding for the end-to-end scenarios (spec §8). Bytecode
//! emission is out of this crate's scope, so these tests hand-assemble the
//! bytecode a compiler would have produced for each scenario's source
//! snippet, the same way `interpreter::tests` does for its narrower cases.

#![allow(dead_code)]

use tendril_vm::context::{Context, ContextConfig};
use tendril_vm::coroutine::Scheduler;
use tendril_vm::error::VmResult;
use tendril_vm::interpreter::BytecodeInterpreter;
use tendril_vm::module::{FunctionTemplate, HandlerEntry, MemberKind, ModuleDef};
use tendril_vm::objects::{CodeFunctionTemplate, HeapString, NativeFunction};
use tendril_vm::value::Value;

// `BinaryOp`/`UnaryOp`/`CondKind` tags, matching `interpreter::opcode`'s
// encoding exactly (kept as plain constants here since that module's
// encoder is private to the crate).
pub const PLUS: u8 = 0;
pub const MINUS: u8 = 1;
pub const MULTIPLY: u8 = 2;
pub const LESS_EQUAL: u8 = 14;

pub const IF_TRUE: u8 = 0;
pub const IF_FALSE: u8 = 1;
pub const IF_NULL: u8 = 2;
pub const IF_NOT_NULL: u8 = 3;

/// A small bytecode assembler so test bodies read like the source they
/// stand in for, instead of raw byte offsets.
#[derive(Default)]
pub struct Asm(pub Vec<u8>);

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pos(&self) -> u32 {
        self.0.len() as u32
    }

    pub fn load_null(&mut self) -> &mut Self {
        self.0.push(0);
        self
    }

    pub fn load_int(&mut self, v: i64) -> &mut Self {
        self.0.push(3);
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn load_local(&mut self, slot: u16) -> &mut Self {
        self.0.push(5);
        self.0.extend_from_slice(&slot.to_le_bytes());
        self
    }

    pub fn store_local(&mut self, slot: u16) -> &mut Self {
        self.0.push(6);
        self.0.extend_from_slice(&slot.to_le_bytes());
        self
    }

    pub fn load_module_member(&mut self, index: u32) -> &mut Self {
        self.0.push(7);
        self.0.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn load_field(&mut self, index: u32) -> &mut Self {
        self.0.push(15);
        self.0.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn store_field(&mut self, index: u32) -> &mut Self {
        self.0.push(16);
        self.0.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn binary(&mut self, tag: u8) -> &mut Self {
        self.0.push(9);
        self.0.push(tag);
        self
    }

    pub fn make_tuple(&mut self, count: u32) -> &mut Self {
        self.0.push(12);
        self.0.extend_from_slice(&count.to_le_bytes());
        self
    }

    pub fn load_index(&mut self) -> &mut Self {
        self.0.push(17);
        self
    }

    pub fn store_index(&mut self) -> &mut Self {
        self.0.push(18);
        self
    }

    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.0.push(20);
        self.0.extend_from_slice(&argc.to_le_bytes());
        self
    }

    pub fn jump(&mut self, target: u32) -> &mut Self {
        self.0.push(22);
        self.0.extend_from_slice(&target.to_le_bytes());
        self
    }

    pub fn branch(&mut self, cond_tag: u8, target: u32) -> &mut Self {
        self.0.push(23);
        self.0.push(cond_tag);
        self.0.extend_from_slice(&target.to_le_bytes());
        self
    }

    pub fn ret(&mut self) -> &mut Self {
        self.0.push(24);
        self
    }

    pub fn assert_fail(&mut self) -> &mut Self {
        self.0.push(25);
        self
    }

    pub fn rethrow(&mut self) -> &mut Self {
        self.0.push(26);
        self
    }

    pub fn pop(&mut self) -> &mut Self {
        self.0.push(27);
        self
    }

    pub fn extend(&mut self, other: Asm) -> &mut Self {
        self.0.extend(other.0);
        self
    }

    pub fn into_code(self) -> Vec<u8> {
        self.0
    }
}

/// What one module member should materialize to; closes over what a real
/// compiler's constant pool would have already resolved.
pub enum Member {
    Function(u32),
    /// Installed after loading, since `MemberKind` has no "native function"
    /// encoding of its own (natives are embedder-provided, not produced by
    /// compilation) -- the member materializes to `null` first, then gets
    /// overwritten via `set_member_value`.
    Native(NativeFunction),
    StringConst(&'static str),
}

/// Loads a single module with the given function templates and members,
/// returning its interned name plus a `FunctionRef` for each declared
/// function, in declaration order.
pub fn load_module(
    ctx: &mut Context,
    module_name: &str,
    functions: Vec<FunctionTemplate>,
    members: Vec<Member>,
) -> (tendril_vm::intern::InternedString, Vec<tendril_vm::objects::FunctionRef>) {
    let name = ctx.strings.insert(module_name).unwrap();
    let member_kinds: Vec<MemberKind> = members
        .iter()
        .map(|m| match m {
            Member::Function(idx) => MemberKind::Function(*idx),
            Member::Native(_) => MemberKind::Variable,
            Member::StringConst(s) => MemberKind::String(ctx.strings.insert(s).unwrap()),
        })
        .collect();

    let def = ModuleDef {
        name,
        members: member_kinds,
        function_templates: functions,
        exports: Vec::new(),
        initializer: None,
    };

    let natives: Vec<Option<NativeFunction>> = members
        .into_iter()
        .map(|m| match m {
            Member::Native(n) => Some(n),
            _ => None,
        })
        .collect();

    ctx.load_modules(vec![def], |member, _registry, _strings, heap| match member {
        MemberKind::Function(idx) => {
            let function_ref = tendril_vm::objects::FunctionRef { module: name, index: *idx };
            let roots: &[Value] = &[];
            heap.allocate(CodeFunctionTemplate(function_ref), false, roots)
        }
        MemberKind::String(id) => {
            let roots: &[Value] = &[];
            heap.allocate(HeapString(*id), false, roots)
        }
        MemberKind::Variable => Ok(Value::null()),
        _ => Ok(Value::null()),
    })
    .unwrap();

    for (index, native) in natives.into_iter().enumerate() {
        if let Some(native) = native {
            let roots: &[Value] = &[];
            let value = ctx.heap.allocate(native, false, roots).unwrap();
            ctx.modules.set_member_value(name, index as u32, value).unwrap();
        }
    }

    let count = ctx.modules.get(name).unwrap().function_templates.len();
    let refs = (0..count as u32).map(|index| tendril_vm::objects::FunctionRef { module: name, index }).collect();
    (name, refs)
}

pub fn function_template(params_count: u32, locals_count: u32, code: Vec<u8>, handlers: Vec<HandlerEntry>) -> FunctionTemplate {
    FunctionTemplate { params_count, locals_count, handlers, code }
}

/// Runs `function` to completion on a fresh coroutine, returning its result
/// or the propagated error.
pub fn run(ctx: &mut Context, function: tendril_vm::objects::FunctionRef, args: &[Value]) -> VmResult<Value> {
    let mut scheduler = Scheduler::new();
    let id = scheduler.spawn();
    let locals_count = ctx.modules.get(function.module).unwrap().function_templates[function.index as usize].locals_count;
    scheduler.get_mut(id).stack.push_user_frame(function, Value::null(), locals_count, args);
    let mut interpreter = BytecodeInterpreter::new();
    interpreter.run(ctx, &mut scheduler, id).map(|v| v.unwrap_or(Value::null()))
}

pub fn fresh_context() -> Context {
    Context::new(ContextConfig::default())
}
