//! The native-function ABI (§6) and the two runtime primitives this pass
//! requires: `std.panic` and `std.catch_panic` (§7, §8).
//!
//! Grounded on the sync half of the ABI only: "`(Frame&) -> void` with
//! result in a dedicated register". A native runs to completion on the
//! caller's own turn; when it needs to call back into bytecode (as
//! `catch_panic` does, to invoke its argument), it does so through
//! [`NativeCallContext::call_sync`]/[`call_and_catch`], which re-enter the
//! interpreter recursively on the same coroutine stack rather than going
//! through the scheduler.

use crate::context::Context;
use crate::coroutine::CoroutineId;
use crate::error::{Exception, VmError, VmResult};
use crate::objects::{ExceptionObject, Tuple};
use crate::value::Value;

use super::{arith, BytecodeInterpreter, SyncCallOutcome};

/// The view a native function body gets of the call in progress: its
/// arguments, and a way to invoke another callable value synchronously.
pub struct NativeCallContext<'a> {
    pub(super) ctx: &'a mut Context,
    pub(super) scheduler: &'a mut crate::coroutine::Scheduler,
    pub(super) coroutine: CoroutineId,
    pub(super) interpreter: &'a mut BytecodeInterpreter,
    pub(super) args: Vec<Value>,
}

impl<'a> NativeCallContext<'a> {
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn ctx(&mut self) -> &mut Context {
        self.ctx
    }

    /// Invokes `callee` with `args` and runs it to completion. A raised
    /// exception propagates out as `Err(VmError::Unhandled)`, same as an
    /// ordinary uncaught panic (this native does not catch).
    pub fn call_sync(&mut self, callee: Value, args: &[Value]) -> VmResult<Value> {
        match self.interpreter.call_sync(self.ctx, self.scheduler, self.coroutine, callee, args, false)? {
            SyncCallOutcome::Value(v) => Ok(v),
            SyncCallOutcome::Caught(e) => Err(VmError::Unhandled(e)),
        }
    }

    /// Like [`call_sync`](Self::call_sync), but a raised exception is
    /// reported back as `Ok(SyncCallOutcome::Caught)` instead of
    /// propagating, for `std.catch_panic`'s use.
    pub fn call_and_catch(&mut self, callee: Value, args: &[Value]) -> VmResult<SyncCallOutcome> {
        self.interpreter.call_sync(self.ctx, self.scheduler, self.coroutine, callee, args, true)
    }
}

/// `std.panic(value)`: raises `value` as an `Exception`, uncatchable except
/// by an enclosing `std.catch_panic` (§7).
pub fn panic(cx: &mut NativeCallContext<'_>) -> VmResult<Value> {
    let payload = cx.args().first().copied().unwrap_or(Value::null());
    let message = arith::describe(cx.ctx(), payload);
    Err(VmError::Unhandled(Exception::with_payload(message, payload)))
}

/// `std.catch_panic(f)`: calls `f()` and returns a two-element `Tuple`
/// `(ok, payload)` -- `(true, value)` on success, `(false, exception)` on a
/// caught panic (§7). Represented as a plain tagged tuple rather than a
/// dedicated `Result` heap type since nothing else in this pass needs one.
pub fn catch_panic(cx: &mut NativeCallContext<'_>) -> VmResult<Value> {
    let callee = cx.args().first().copied().unwrap_or(Value::null());
    match cx.call_and_catch(callee, &[])? {
        SyncCallOutcome::Value(value) => {
            let ok = cx.ctx.well_known_bool(true);
            cx.ctx.allocate_rooted(Tuple(vec![ok, value]), false, cx.scheduler)
        }
        SyncCallOutcome::Caught(exception) => {
            let not_ok = cx.ctx.well_known_bool(false);
            let exception_value = cx.ctx.allocate_rooted(ExceptionObject(exception), false, cx.scheduler)?;
            cx.ctx.allocate_rooted(Tuple(vec![not_ok, exception_value]), false, cx.scheduler)
        }
    }
}
