//! Error taxonomy for the IR builder, the heap, and the interpreter.
//!
//! Following §7 of the design, failures come in four flavours: user panics
//! (catchable, carry an [`Exception`]), runtime errors (uncatchable, abort
//! the coroutine's host call), compile-time warnings (constant folding
//! failures, logged and recovered from), and compile-time errors (malformed
//! IR, abort generation of the current function).

use std::fmt;

use thiserror::Error;

use crate::intern::InternedString;
use crate::value::Value;

/// A user-visible exception, as produced by `std.panic` or a runtime trap.
///
/// Carries a message and, per §7, a list of secondary exceptions raised by
/// `defer` handlers while this exception was already unwinding.
#[derive(Debug, Clone)]
pub struct Exception {
    message: String,
    payload: Option<Value>,
    secondary: Vec<Exception>,
}

impl Exception {
    /// Builds an exception from a user-panic payload's rendered message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
            secondary: Vec::new(),
        }
    }

    /// Builds an exception carrying the original panic value, for `reason()`.
    pub fn with_payload(message: impl Into<String>, payload: Value) -> Self {
        Self {
            message: message.into(),
            payload: Some(payload),
            secondary: Vec::new(),
        }
    }

    /// Assertion failure, identifying the failing expression's source text.
    pub fn assert_failed(expr_text: &str, user_message: Option<&str>) -> Self {
        let message = match user_message {
            Some(msg) => format!("assertion failed: {expr_text} ({msg})"),
            None => format!("assertion failed: {expr_text}"),
        };
        Self::new(message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn secondary(&self) -> &[Exception] {
        &self.secondary
    }

    /// Attaches a secondary exception, raised by a `defer` handler while this
    /// one was already in flight.
    pub fn attach_secondary(&mut self, other: Exception) {
        self.secondary.push(other);
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Exception {}

/// Failures the constant evaluator (§4.C) can produce for an op on folded
/// constants. These are never fatal: the IR builder falls back to emitting
/// the unfolded instruction and logs a diagnostic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("division by zero")]
    DivideByZero,
    #[error("negative shift amount")]
    NegativeShift,
    #[error("imaginary result (0 raised to a negative power)")]
    ImaginaryPower,
    #[error("operand type does not support this operation")]
    TypeError,
}

/// Errors that abort construction of a single function's IR.
#[derive(Debug, Error)]
pub enum IrError {
    #[error("variable `{name}` may be uninitialized at this point")]
    MaybeUninitialized { name: String },

    #[error("variable `{name}` was never initialized")]
    NeverInitialized { name: String },

    #[error("malformed IR: {0}")]
    Malformed(String),
}

/// Fatal runtime errors: heap exhaustion, stack overflow, malformed
/// bytecode. These terminate the VM; they are not catchable from user code.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("heap allocation of {requested} bytes failed: {reason}")]
    HeapExhausted { requested: usize, reason: String },

    #[error("coroutine stack overflow (requested {requested} additional slots)")]
    StackOverflow { requested: usize },

    #[error("malformed bytecode at offset {offset}: {reason}")]
    MalformedBytecode { offset: usize, reason: String },

    #[error("module load failed: {0}")]
    ModuleLoad(#[from] ModuleLoadError),

    #[error("unhandled exception: {0}")]
    Unhandled(Exception),

    #[error("string table exhausted: id space for {attempted} entries is full")]
    StringTableExhausted { attempted: u32 },

    /// A runtime arithmetic failure (§4.C's fold rules, reapplied to values
    /// the folder never saw). Uncatchable per §7: only `std.panic` and
    /// assertion failures produce a catchable `Exception`.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] EvalError),

    #[error("coroutine attempted to suspend inside a synchronous native call")]
    SuspendDuringSyncCall,
}

/// Errors produced while resolving and linking a module's import graph (§6).
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("unresolved import `{name}`: no module exports it")]
    UnresolvedImport { name: String },

    #[error("dependency cycle detected among modules: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("duplicate export for symbol {symbol:?}")]
    DuplicateExport { symbol: InternedString },
}

/// Convenience alias for fallible interpreter operations.
pub type VmResult<T> = Result<T, VmError>;
