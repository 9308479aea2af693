//! The bytecode interpreter and its call/exception-unwinding machinery
//! (§4.I, §5, §7).
//!
//! [`BytecodeInterpreter::step`] executes exactly one opcode on a
//! coroutine's topmost `UserFrame`, exiting the loop on every call, return,
//! and yield; [`BytecodeInterpreter::run`] drains `step` until the
//! coroutine suspends or finishes, matching the closure shape
//! [`crate::coroutine::Scheduler::run_ready`] expects. A reentrant call from
//! inside a native function body (`std.catch_panic` invoking its argument)
//! goes through [`BytecodeInterpreter::call_sync`] instead, which pushes a
//! marker frame (`Sync` or `Catch`) and runs nested `step`s until that
//! marker is exposed again at the top of the stack.

pub mod arith;
mod native;
pub mod opcode;

pub use native::{catch_panic, panic, NativeCallContext};

use crate::context::Context;
use crate::coroutine::{CoroutineId, CoroutineStack, Frame, Scheduler};
use crate::error::{Exception, VmError, VmResult};
use crate::intern::InternedString;
use crate::ir::function::CondKind;
use crate::module::FunctionTemplate;
use crate::objects::{Array, ExceptionObject, FunctionRef, HeapBool, HeapFloat, HeapInteger, HeapMap, HeapSymbol, NativeFunction, Record, RecordTemplate, Tuple};
use crate::value::Value;
use opcode::{Opcode, Reader};

/// What a just-completed boundary-crossing call (return or unwind) left
/// behind for [`BytecodeInterpreter::run_until_boundary`] to collect, once
/// its marker frame is exposed at the top of the stack again.
enum PendingOutcome {
    Returned(Value),
    Unwound(Exception),
}

/// The result of executing one opcode.
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    Suspended,
    Finished(Value),
}

/// The result of a boundary-crossing call made through
/// [`BytecodeInterpreter::call_sync`].
#[derive(Debug)]
pub enum SyncCallOutcome {
    Value(Value),
    Caught(Exception),
}

/// A callee value, resolved past any `BoundMethod`/`Closure` indirection.
enum Callable {
    User(FunctionRef, Value),
    Native(crate::objects::NativeSyncFn),
}

fn malformed(offset: u32, reason: impl Into<String>) -> VmError {
    VmError::MalformedBytecode { offset: offset as usize, reason: reason.into() }
}

fn template<'c>(ctx: &'c Context, function: FunctionRef) -> VmResult<&'c FunctionTemplate> {
    ctx.modules
        .get(function.module)
        .and_then(|m| m.function_templates.get(function.index as usize))
        .ok_or_else(|| malformed(0, format!("no function template for {function:?}")))
}

fn truthy(ctx: &Context, value: Value) -> bool {
    if value.is_null() {
        return false;
    }
    match ctx.heap.get::<HeapBool>(value) {
        Some(b) => b.0,
        None => true,
    }
}

/// Unwraps `BoundMethod`/`Closure` wrappers down to either a plain bytecode
/// function (with its closure environment, `null` for a top-level
/// function) or a native callback, prepending a bound receiver onto `args`
/// along the way.
fn resolve_callable(ctx: &Context, mut callee: Value, mut args: Vec<Value>) -> VmResult<(Callable, Vec<Value>)> {
    loop {
        if let Some(bound) = ctx.heap.get::<crate::objects::BoundMethod>(callee) {
            args.insert(0, bound.receiver);
            callee = bound.function;
            continue;
        }
        if let Some(closure) = ctx.heap.get::<crate::objects::Closure>(callee) {
            let template_obj = ctx
                .heap
                .get::<crate::objects::CodeFunctionTemplate>(closure.template)
                .ok_or_else(|| malformed(0, "closure template is not a CodeFunctionTemplate"))?;
            return Ok((Callable::User(template_obj.0, closure.env), args));
        }
        if let Some(template_obj) = ctx.heap.get::<crate::objects::CodeFunctionTemplate>(callee) {
            return Ok((Callable::User(template_obj.0, Value::null()), args));
        }
        if let Some(native) = ctx.heap.get::<NativeFunction>(callee) {
            return Ok((Callable::Native(native.func), args));
        }
        return Err(malformed(0, "value is not callable"));
    }
}

/// `LoadField`/`StoreField` address a fixed, compile-time-known slot --
/// either a named `Record` field or a `Tuple` element (the source
/// language's `Field(inst, name_id)` and `TupleField(inst, index)` lvalues
/// both lower to the same pair of opcodes, since the interpreter only needs
/// an index either way).
fn load_field(ctx: &Context, receiver: Value, index: u32, fault_pc: u32) -> VmResult<Value> {
    if let Some(record) = ctx.heap.get::<Record>(receiver) {
        return record.fields.get(index as usize).copied().ok_or_else(|| malformed(fault_pc, "LoadField index out of range"));
    }
    if let Some(tuple) = ctx.heap.get::<Tuple>(receiver) {
        return tuple.0.get(index as usize).copied().ok_or_else(|| malformed(fault_pc, "LoadField index out of range"));
    }
    Err(malformed(fault_pc, "LoadField on a value with no fields"))
}

fn store_field(ctx: &mut Context, receiver: Value, index: u32, value: Value, fault_pc: u32) -> VmResult<()> {
    if let Some(record) = ctx.heap.get_mut::<Record>(receiver) {
        let slot = record.fields.get_mut(index as usize).ok_or_else(|| malformed(fault_pc, "StoreField index out of range"))?;
        *slot = value;
        return Ok(());
    }
    if let Some(tuple) = ctx.heap.get_mut::<Tuple>(receiver) {
        let slot = tuple.0.get_mut(index as usize).ok_or_else(|| malformed(fault_pc, "StoreField index out of range"))?;
        *slot = value;
        return Ok(());
    }
    Err(malformed(fault_pc, "StoreField on a value with no fields"))
}

fn load_index(ctx: &Context, receiver: Value, index: Value, fault_pc: u32) -> VmResult<Value> {
    if let Some(array) = ctx.heap.get::<Array>(receiver) {
        let i = index.as_embedded_int().ok_or_else(|| malformed(fault_pc, "array index is not an integer"))?;
        return array.0.get(i as usize).copied().ok_or_else(|| malformed(fault_pc, "array index out of range"));
    }
    if let Some(tuple) = ctx.heap.get::<Tuple>(receiver) {
        let i = index.as_embedded_int().ok_or_else(|| malformed(fault_pc, "tuple index is not an integer"))?;
        return tuple.0.get(i as usize).copied().ok_or_else(|| malformed(fault_pc, "tuple index out of range"));
    }
    if let Some(map) = ctx.heap.get::<HeapMap>(receiver) {
        return map
            .0
            .iter()
            .find(|(k, _)| arith::values_equal(ctx, *k, index))
            .map(|(_, v)| *v)
            .ok_or_else(|| malformed(fault_pc, "map has no entry for this key"));
    }
    Err(malformed(fault_pc, "value does not support indexing"))
}

fn store_index(ctx: &mut Context, receiver: Value, index: Value, value: Value, fault_pc: u32) -> VmResult<()> {
    if ctx.heap.get::<Array>(receiver).is_some() {
        let i = index.as_embedded_int().ok_or_else(|| malformed(fault_pc, "array index is not an integer"))?;
        let array = ctx.heap.get_mut::<Array>(receiver).expect("checked above");
        let slot = array.0.get_mut(i as usize).ok_or_else(|| malformed(fault_pc, "array index out of range"))?;
        *slot = value;
        return Ok(());
    }
    if ctx.heap.get::<HeapMap>(receiver).is_some() {
        let existing = {
            let map = ctx.heap.get::<HeapMap>(receiver).expect("checked above");
            map.0.iter().position(|(k, _)| arith::values_equal(ctx, *k, index))
        };
        let map = ctx.heap.get_mut::<HeapMap>(receiver).expect("checked above");
        match existing {
            Some(i) => map.0[i].1 = value,
            None => map.0.push((index, value)),
        }
        return Ok(());
    }
    Err(malformed(fault_pc, "value does not support index assignment"))
}

/// Resolves a `LoadMethod` operand: the module member it names must be a
/// `Symbol`, looked up among `receiver`'s record-template fields. Always
/// binds the receiver (§6 allows a bare-function, unbound form too, but
/// nothing in this pass's record model produces one).
fn load_method(ctx: &Context, module: InternedString, member_index: u32, receiver: Value, fault_pc: u32) -> VmResult<(Value, Value)> {
    let symbol_value = ctx.modules.member_value(module, member_index)?;
    let name = ctx
        .heap
        .get::<HeapSymbol>(symbol_value)
        .map(|s| s.0)
        .ok_or_else(|| malformed(fault_pc, "LoadMethod operand is not a Symbol member"))?;
    let record = ctx.heap.get::<Record>(receiver).ok_or_else(|| malformed(fault_pc, "LoadMethod receiver is not a record"))?;
    let record_template = ctx.heap.get::<RecordTemplate>(record.template).ok_or_else(|| malformed(fault_pc, "record has no template"))?;
    let field_index = record_template
        .0
        .iter()
        .position(|&field_name| field_name == name)
        .ok_or_else(|| malformed(fault_pc, "record has no field with this name"))?;
    Ok((record.fields[field_index], receiver))
}

#[derive(Default)]
pub struct BytecodeInterpreter {
    pending: Option<PendingOutcome>,
    /// `(frame_index, exception_value)` for each frame currently running a
    /// handler it dispatched into but hasn't yet returned from or re-raised
    /// (§7). Consulted by `unwind` to tell a secondary exception -- one
    /// raised by the handler body itself -- apart from that same exception
    /// continuing to propagate via `Rethrow`.
    active_handlers: Vec<(u32, Value)>,
}

impl BytecodeInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains `step` until the coroutine suspends (`Ok(None)`) or finishes
    /// (`Ok(Some(value))`); matches the closure
    /// [`Scheduler::run_ready`](crate::coroutine::Scheduler::run_ready) expects.
    pub fn run(&mut self, ctx: &mut Context, scheduler: &mut Scheduler, id: CoroutineId) -> VmResult<Option<Value>> {
        loop {
            match self.step(ctx, scheduler, id)? {
                StepOutcome::Continue => {}
                StepOutcome::Suspended => return Ok(None),
                StepOutcome::Finished(value) => return Ok(Some(value)),
            }
        }
    }

    /// Executes exactly one opcode on the coroutine's topmost frame, or
    /// delivers a resolved async completion (§4.I, §4.H).
    pub fn step(&mut self, ctx: &mut Context, scheduler: &mut Scheduler, id: CoroutineId) -> VmResult<StepOutcome> {
        let Some(frame_index) = scheduler.get(id).stack.top_frame_index() else {
            return Ok(StepOutcome::Finished(Value::null()));
        };

        match *scheduler.get(id).stack.frame(frame_index) {
            Frame::Async(async_frame) => match async_frame.completion {
                Some(value) => {
                    scheduler.get_mut(id).stack.pop_frame();
                    let stack = &mut scheduler.get_mut(id).stack;
                    Ok(self.deliver_return(stack, value))
                }
                None => Ok(StepOutcome::Suspended),
            },
            Frame::Sync(_) | Frame::Catch(_) => {
                unreachable!("marker frames are only exposed to run_until_boundary, which never calls step again once exposed")
            }
            Frame::User(_) => self.step_user_frame(ctx, scheduler, id, frame_index),
        }
    }

    fn step_user_frame(&mut self, ctx: &mut Context, scheduler: &mut Scheduler, id: CoroutineId, frame_index: u32) -> VmResult<StepOutcome> {
        let mut user = *scheduler.get(id).stack.frame(frame_index).as_user().expect("caller checked this is a User frame");
        let fault_pc = user.pc;
        let opcode = {
            let tmpl = template(ctx, user.function)?;
            let mut reader = Reader::new(&tmpl.code, user.pc);
            let op = opcode::decode(&mut reader)?;
            user.pc = reader.pc;
            op
        };

        macro_rules! stack {
            () => {
                scheduler.get_mut(id).stack
            };
        }

        match opcode {
            Opcode::LoadNull => stack!().push_operand(&mut user, Value::null()),
            Opcode::LoadTrue => {
                let v = ctx.well_known_bool(true);
                stack!().push_operand(&mut user, v);
            }
            Opcode::LoadFalse => {
                let v = ctx.well_known_bool(false);
                stack!().push_operand(&mut user, v);
            }
            Opcode::LoadInt(i) => {
                let v = match Value::from_embedded_int(i) {
                    Some(v) => v,
                    None => ctx.allocate_rooted(HeapInteger(i), false, &*scheduler)?,
                };
                stack!().push_operand(&mut user, v);
            }
            Opcode::LoadFloat(f) => {
                let v = ctx.allocate_rooted(HeapFloat(f), false, &*scheduler)?;
                stack!().push_operand(&mut user, v);
            }
            Opcode::LoadLocal(slot) => {
                let v = scheduler.get(id).stack.local(&user, slot as u32);
                stack!().push_operand(&mut user, v);
            }
            Opcode::StoreLocal(slot) => {
                let v = stack!().pop_operand(&mut user);
                scheduler.get_mut(id).stack.set_local(&user, slot as u32, v);
            }
            Opcode::LoadModuleMember(index) => {
                let v = ctx.modules.member_value(user.function.module, index)?;
                stack!().push_operand(&mut user, v);
            }
            Opcode::StoreModuleMember(index) => {
                let v = stack!().pop_operand(&mut user);
                ctx.modules.set_member_value(user.function.module, index, v)?;
            }
            Opcode::Binary(op) => {
                let rhs = stack!().pop_operand(&mut user);
                let lhs = stack!().pop_operand(&mut user);
                let result = arith::binary(ctx, op, lhs, rhs)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::Unary(op) => {
                let v = stack!().pop_operand(&mut user);
                let result = arith::unary(ctx, op, v)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::Format(count) => {
                let values = stack!().pop_operands(&mut user, count);
                let result = arith::format(ctx, &values)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::MakeTuple(count) => {
                let values = stack!().pop_operands(&mut user, count);
                let result = ctx.allocate_rooted(Tuple(values), false, &*scheduler)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::MakeArray(count) => {
                let values = stack!().pop_operands(&mut user, count);
                let result = ctx.allocate_rooted(Array(values), false, &*scheduler)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::MakeRecord { template_member, field_count } => {
                let fields = stack!().pop_operands(&mut user, field_count);
                let template_value = ctx.modules.member_value(user.function.module, template_member)?;
                let result = ctx.allocate_rooted(Record { template: template_value, fields }, false, &*scheduler)?;
                stack!().push_operand(&mut user, result);
            }
            Opcode::LoadField(index) => {
                let receiver = stack!().pop_operand(&mut user);
                let value = load_field(ctx, receiver, index, fault_pc)?;
                stack!().push_operand(&mut user, value);
            }
            Opcode::StoreField(index) => {
                let value = stack!().pop_operand(&mut user);
                let receiver = stack!().pop_operand(&mut user);
                store_field(ctx, receiver, index, value, fault_pc)?;
            }
            Opcode::LoadIndex => {
                let index = stack!().pop_operand(&mut user);
                let receiver = stack!().pop_operand(&mut user);
                let value = load_index(ctx, receiver, index, fault_pc)?;
                stack!().push_operand(&mut user, value);
            }
            Opcode::StoreIndex => {
                let value = stack!().pop_operand(&mut user);
                let index = stack!().pop_operand(&mut user);
                let receiver = stack!().pop_operand(&mut user);
                store_index(ctx, receiver, index, value, fault_pc)?;
            }
            Opcode::LoadMethod(member_index) => {
                let receiver = stack!().pop_operand(&mut user);
                let (function, instance) = load_method(ctx, user.function.module, member_index, receiver, fault_pc)?;
                stack!().push_operand(&mut user, function);
                stack!().push_operand(&mut user, instance);
            }
            Opcode::Call(argc) => {
                let args = stack!().pop_operands(&mut user, argc);
                let callee = stack!().pop_operand(&mut user);
                *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
                return self.dispatch_call(ctx, scheduler, id, frame_index, callee, args, fault_pc);
            }
            Opcode::CallMethod(argc) => {
                let mut args = stack!().pop_operands(&mut user, argc);
                let instance = stack!().pop_operand(&mut user);
                let function = stack!().pop_operand(&mut user);
                if !instance.is_null() {
                    args.insert(0, instance);
                }
                *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
                return self.dispatch_call(ctx, scheduler, id, frame_index, function, args, fault_pc);
            }
            Opcode::Jump(target) => user.pc = target,
            Opcode::Branch(cond, target) => {
                let v = stack!().pop_operand(&mut user);
                let take = match cond {
                    CondKind::IfTrue => truthy(ctx, v),
                    CondKind::IfFalse => !truthy(ctx, v),
                    CondKind::IfNull => v.is_null(),
                    CondKind::IfNotNull => !v.is_null(),
                };
                if take {
                    user.pc = target;
                }
            }
            Opcode::Return => {
                let value = stack!().pop_operand(&mut user);
                *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
                scheduler.get_mut(id).stack.pop_frame();
                // A handler that returns instead of re-raising (not how
                // `defer` compiles today, but the opcode doesn't forbid it)
                // must not leave a stale entry behind for a later call to
                // trip over if this frame index gets reused.
                self.active_handlers.retain(|&(frame, _)| frame != frame_index);
                let stack = &mut scheduler.get_mut(id).stack;
                return Ok(self.deliver_return(stack, value));
            }
            Opcode::AssertFail => {
                user.pc = fault_pc;
                *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
                // `Terminator::AssertFail` carries the source text of the
                // failing expression, but this opcode takes no operand for
                // it -- bytecode emission never lowers that text into the
                // instruction stream. Until it does, every assertion failure
                // reports this fixed placeholder instead of naming the
                // expression that failed.
                let exception = Exception::assert_failed("<assertion>", None);
                return self.unwind(ctx, scheduler, id, exception, None);
            }
            Opcode::Rethrow => {
                let value = stack!().pop_operand(&mut user);
                user.pc = fault_pc;
                *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
                let exception = ctx.heap.get::<ExceptionObject>(value).map(|e| e.0.clone()).unwrap_or_else(|| Exception::new(arith::describe(ctx, value)));
                return self.unwind(ctx, scheduler, id, exception, Some(value));
            }
            Opcode::Pop => {
                stack!().pop_operand(&mut user);
            }
            Opcode::Dup => {
                let v = stack!().pop_operand(&mut user);
                stack!().push_operand(&mut user, v);
                stack!().push_operand(&mut user, v);
            }
        }

        *scheduler.get_mut(id).stack.frame_mut(frame_index) = Frame::User(user);
        Ok(StepOutcome::Continue)
    }

    /// Resolves `callee` and either runs a native function to completion
    /// inline, or pushes a `UserFrame` for a bytecode callee (§4.I, §6).
    fn dispatch_call(
        &mut self,
        ctx: &mut Context,
        scheduler: &mut Scheduler,
        id: CoroutineId,
        caller_frame: u32,
        callee: Value,
        args: Vec<Value>,
        fault_pc: u32,
    ) -> VmResult<StepOutcome> {
        let (callable, args) = resolve_callable(ctx, callee, args)?;
        match callable {
            Callable::Native(native_fn) => {
                let mut cx = NativeCallContext { ctx, scheduler, coroutine: id, interpreter: self, args };
                match native_fn(&mut cx) {
                    Ok(value) => {
                        let stack = &mut scheduler.get_mut(id).stack;
                        Ok(self.deliver_return(stack, value))
                    }
                    Err(VmError::Unhandled(exception)) => {
                        if let Frame::User(caller) = scheduler.get_mut(id).stack.frame_mut(caller_frame) {
                            caller.pc = fault_pc;
                        }
                        self.unwind(ctx, scheduler, id, exception, None)
                    }
                    Err(other) => Err(other),
                }
            }
            Callable::User(function, env) => {
                let locals_count = template(ctx, function)?.locals_count;
                scheduler.get_mut(id).stack.push_user_frame(function, env, locals_count, &args);
                Ok(StepOutcome::Continue)
            }
        }
    }

    /// Delivers a return value into whatever is now the top of the stack:
    /// a caller `UserFrame` gets it pushed as an operand; a `Sync`/`Catch`
    /// marker records it as `self.pending` for
    /// [`run_until_boundary`](Self::run_until_boundary) to collect; an
    /// empty stack means the coroutine itself is finished.
    fn deliver_return(&mut self, stack: &mut CoroutineStack, value: Value) -> StepOutcome {
        match stack.top_frame_index() {
            None => StepOutcome::Finished(value),
            Some(idx) => match *stack.frame(idx) {
                Frame::User(mut caller) => {
                    stack.push_operand(&mut caller, value);
                    *stack.frame_mut(idx) = Frame::User(caller);
                    StepOutcome::Continue
                }
                Frame::Sync(_) | Frame::Catch(_) => {
                    self.pending = Some(PendingOutcome::Returned(value));
                    StepOutcome::Continue
                }
                Frame::Async(_) => unreachable!("an async frame cannot itself be the target of a call return"),
            },
        }
    }

    /// Walks frames top-down looking for a handler whose `[from_pc, to_pc)`
    /// covers the faulting pc (§4.I, §7). A match resumes normal execution
    /// at `target_pc` with the exception pushed as an operand; no match
    /// pops the frame and keeps unwinding. Reaching a `Sync`/`Catch` marker
    /// stops unwinding and records the outcome as `self.pending`; reaching
    /// an empty stack makes the exception fatal.
    ///
    /// `rethrown_value` is `Some` only when this unwind started from a
    /// `Rethrow` of an already-in-flight exception's own value; it lets a
    /// frame that dispatched into its own handler tell that expected
    /// continuation apart from a genuinely new exception raised by the
    /// handler body itself. The latter is a secondary exception (§7): it
    /// attaches to the original instead of replacing it, and unwinding
    /// continues with the original.
    fn unwind(&mut self, ctx: &mut Context, scheduler: &mut Scheduler, id: CoroutineId, exception: Exception, rethrown_value: Option<Value>) -> VmResult<StepOutcome> {
        let mut exception = exception;
        loop {
            let Some(top) = scheduler.get(id).stack.top_frame_index() else {
                return Err(VmError::Unhandled(exception));
            };
            match *scheduler.get(id).stack.frame(top) {
                Frame::User(user) => {
                    let handler = {
                        let tmpl = template(ctx, user.function)?;
                        tmpl.handlers.iter().find(|h| user.pc >= h.from_pc && user.pc < h.to_pc).copied()
                    };
                    match handler {
                        Some(handler) => {
                            let exception_value = ctx.allocate_rooted(ExceptionObject(exception), false, &*scheduler)?;
                            self.active_handlers.push((top, exception_value));
                            let mut user = user;
                            user.pc = handler.target_pc;
                            let stack = &mut scheduler.get_mut(id).stack;
                            stack.push_operand(&mut user, exception_value);
                            *stack.frame_mut(top) = Frame::User(user);
                            return Ok(StepOutcome::Continue);
                        }
                        None => {
                            if let Some(&(active_frame, active_value)) = self.active_handlers.last() {
                                if active_frame == top {
                                    self.active_handlers.pop();
                                    if rethrown_value != Some(active_value) {
                                        if let Some(original) = ctx.heap.get_mut::<ExceptionObject>(active_value) {
                                            original.0.attach_secondary(exception);
                                        }
                                        exception = ctx
                                            .heap
                                            .get::<ExceptionObject>(active_value)
                                            .map(|e| e.0.clone())
                                            .unwrap_or_else(|| Exception::new("lost in-flight exception"));
                                    }
                                }
                            }
                            scheduler.get_mut(id).stack.pop_frame();
                            continue;
                        }
                    }
                }
                Frame::Sync(_) | Frame::Catch(_) => {
                    self.pending = Some(PendingOutcome::Unwound(exception));
                    return Ok(StepOutcome::Continue);
                }
                Frame::Async(_) => unreachable!("an exception cannot unwind into a suspended async frame"),
            }
        }
    }

    /// Invokes `callee` synchronously from inside a native function body,
    /// for `std.catch_panic`'s argument call (§4.I, §6). Pushes a `Sync` or
    /// `Catch` marker frame (depending on `catches`), runs the callee to
    /// completion via nested `step`s, then reports its outcome.
    pub(crate) fn call_sync(
        &mut self,
        ctx: &mut Context,
        scheduler: &mut Scheduler,
        id: CoroutineId,
        callee: Value,
        args: &[Value],
        catches: bool,
    ) -> VmResult<SyncCallOutcome> {
        let caller = scheduler.get(id).stack.top_frame_index().unwrap_or(0);
        let marker_index =
            if catches { scheduler.get_mut(id).stack.push_catch_frame(caller) } else { scheduler.get_mut(id).stack.push_sync_frame(caller) };
        let target_depth = marker_index + 1;

        let resolved = resolve_callable(ctx, callee, args.to_vec());
        let (callable, args) = match resolved {
            Ok(v) => v,
            Err(e) => {
                scheduler.get_mut(id).stack.pop_frame();
                return Err(e);
            }
        };

        match callable {
            Callable::Native(native_fn) => {
                let mut cx = NativeCallContext { ctx, scheduler, coroutine: id, interpreter: self, args };
                let result = native_fn(&mut cx);
                scheduler.get_mut(id).stack.pop_frame();
                match result {
                    Ok(value) => Ok(SyncCallOutcome::Value(value)),
                    Err(VmError::Unhandled(exception)) => {
                        if catches {
                            Ok(SyncCallOutcome::Caught(exception))
                        } else {
                            Err(VmError::Unhandled(exception))
                        }
                    }
                    Err(other) => Err(other),
                }
            }
            Callable::User(function, env) => {
                let locals_count = match template(ctx, function) {
                    Ok(tmpl) => tmpl.locals_count,
                    Err(e) => {
                        scheduler.get_mut(id).stack.pop_frame();
                        return Err(e);
                    }
                };
                scheduler.get_mut(id).stack.push_user_frame(function, env, locals_count, &args);
                self.run_until_boundary(ctx, scheduler, id, target_depth, catches)
            }
        }
    }

    /// Runs nested `step`s until the marker frame pushed at `target_depth - 1`
    /// is exposed at the top of the stack again, then pops it and converts
    /// `self.pending` into this call's outcome.
    fn run_until_boundary(&mut self, ctx: &mut Context, scheduler: &mut Scheduler, id: CoroutineId, target_depth: u32, catches: bool) -> VmResult<SyncCallOutcome> {
        loop {
            match self.step(ctx, scheduler, id)? {
                StepOutcome::Continue => {}
                StepOutcome::Suspended => return Err(VmError::SuspendDuringSyncCall),
                StepOutcome::Finished(_) => unreachable!("a synchronous call boundary never exposes the coroutine's root frame"),
            }
            if scheduler.get(id).stack.frame_count() == target_depth {
                let pending = self.pending.take().expect("the boundary frame always leaves a pending outcome behind");
                scheduler.get_mut(id).stack.pop_frame();
                return match pending {
                    PendingOutcome::Returned(value) => Ok(SyncCallOutcome::Value(value)),
                    PendingOutcome::Unwound(exception) => {
                        if catches {
                            Ok(SyncCallOutcome::Caught(exception))
                        } else {
                            Err(VmError::Unhandled(exception))
                        }
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use crate::module::{FunctionTemplate as Tmpl, HandlerEntry, ModuleDef};

    fn with_module(ctx: &mut Context, code: Vec<u8>, locals_count: u32, handlers: Vec<HandlerEntry>) -> FunctionRef {
        let module_name = ctx.strings.insert("test").unwrap();
        let def = ModuleDef {
            name: module_name,
            members: Vec::new(),
            function_templates: vec![Tmpl { params_count: 0, locals_count, handlers, code }],
            exports: Vec::new(),
            initializer: None,
        };
        let Context { strings, modules, .. } = ctx;
        modules.load_all(vec![def], strings, |_, _, _| Ok(Value::null())).unwrap();
        FunctionRef { module: module_name, index: 0 }
    }

    fn run_function(ctx: &mut Context, function: FunctionRef, args: &[Value]) -> VmResult<Value> {
        let mut scheduler = Scheduler::new();
        let id = scheduler.spawn();
        let locals_count = template(ctx, function).unwrap().locals_count;
        scheduler.get_mut(id).stack.push_user_frame(function, Value::null(), locals_count, args);
        let mut interpreter = BytecodeInterpreter::new();
        interpreter.run(ctx, &mut scheduler, id).map(|v| v.unwrap_or(Value::null()))
    }

    #[test]
    fn adds_two_locals_and_returns() {
        let mut ctx = Context::new(ContextConfig::default());
        let mut code = Vec::new();
        code.push(5u8);
        code.extend_from_slice(&0u16.to_le_bytes()); // LoadLocal 0
        code.push(5u8);
        code.extend_from_slice(&1u16.to_le_bytes()); // LoadLocal 1
        code.push(9u8); // Binary
        code.push(0u8); // BinaryOp::Plus
        code.push(24u8); // Return

        let function = with_module(&mut ctx, code, 2, Vec::new());
        let a = Value::from_embedded_int(3).unwrap();
        let b = Value::from_embedded_int(4).unwrap();
        let result = run_function(&mut ctx, function, &[a, b]).unwrap();
        assert_eq!(result.as_embedded_int(), Some(7));
    }

    #[test]
    fn assert_fail_without_a_handler_is_unhandled() {
        let mut ctx = Context::new(ContextConfig::default());
        let code = vec![25u8]; // AssertFail
        let function = with_module(&mut ctx, code, 0, Vec::new());
        let err = run_function(&mut ctx, function, &[]).unwrap_err();
        assert!(matches!(err, VmError::Unhandled(_)));
    }

    #[test]
    fn a_handler_covering_the_faulting_pc_catches_the_exception() {
        let mut ctx = Context::new(ContextConfig::default());
        let code = vec![25u8, 24u8, 27u8, 24u8]; // 0: AssertFail, 1: Return, 2: Pop, 3: Return
        let handlers = vec![HandlerEntry { from_pc: 0, to_pc: 1, target_pc: 2 }];
        let function = with_module(&mut ctx, code, 0, handlers);
        let result = run_function(&mut ctx, function, &[]).unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn a_new_exception_raised_inside_a_handler_attaches_as_secondary() {
        use crate::module::MemberKind;
        use crate::objects::{HeapString, NativeFunction};

        let mut ctx = Context::new(ContextConfig::default());
        let panic_name = ctx.strings.insert("panic").unwrap();
        let first = ctx.strings.insert("first").unwrap();
        let second = ctx.strings.insert("second").unwrap();

        let mut code = Vec::new();
        code.push(7u8);
        code.extend_from_slice(&0u32.to_le_bytes()); // LoadModuleMember(0): panic fn
        code.push(7u8);
        code.extend_from_slice(&1u32.to_le_bytes()); // LoadModuleMember(1): "first"
        let fault_pc = code.len() as u32;
        code.push(20u8);
        code.extend_from_slice(&1u32.to_le_bytes()); // Call(1) -- raises "first"
        let target_pc = code.len() as u32;
        code.push(27u8); // Pop the in-flight exception operand
        code.push(7u8);
        code.extend_from_slice(&0u32.to_le_bytes()); // LoadModuleMember(0): panic fn
        code.push(7u8);
        code.extend_from_slice(&2u32.to_le_bytes()); // LoadModuleMember(2): "second"
        code.push(20u8);
        code.extend_from_slice(&1u32.to_le_bytes()); // Call(1) -- raises "second" mid-handler

        let handlers = vec![HandlerEntry { from_pc: fault_pc, to_pc: fault_pc + 5, target_pc }];
        let module_name = ctx.strings.insert("secondary_test").unwrap();
        let def = ModuleDef {
            name: module_name,
            members: vec![MemberKind::Variable, MemberKind::String(first), MemberKind::String(second)],
            function_templates: vec![Tmpl { params_count: 0, locals_count: 0, handlers, code }],
            exports: Vec::new(),
            initializer: None,
        };
        ctx.load_modules(vec![def], |member, _registry, _strings, heap| match member {
            MemberKind::String(id) => heap.allocate(HeapString(*id), false),
            _ => Ok(Value::null()),
        })
        .unwrap();
        let native_value = ctx.heap.allocate(NativeFunction { name: panic_name, func: panic }, false).unwrap();
        ctx.modules.set_member_value(module_name, 0, native_value).unwrap();

        let function = FunctionRef { module: module_name, index: 0 };
        let err = run_function(&mut ctx, function, &[]).unwrap_err();
        let VmError::Unhandled(exception) = err else {
            panic!("expected an unhandled exception, got {err:?}");
        };
        assert!(exception.message().contains("first"), "message was: {}", exception.message());
        assert_eq!(exception.secondary().len(), 1);
        assert!(exception.secondary()[0].message().contains("second"));
    }
}
