//! Concrete heap-resident value layouts (§4.G, §3.3).
//!
//! Every tag in [`crate::value::ValueType`] needs a [`HeapObject`] impl
//! somewhere; this module collects the small, mostly-trivial ones in one
//! place rather than scattering a dozen one-off files, the way
//! `vm/objects/all.hpp` groups its POD layouts. `String` and `Symbol` stay
//! thin wrappers around an [`InternedString`] rather than owning their own
//! bytes, so there is exactly one canonical copy of any piece of text and
//! constant folding (`ir::constfold::format_constants`) and these runtime
//! objects agree on it by construction.

use std::any::Any;
use std::fmt;

use crate::error::Exception;
use crate::heap::{cells_for_bytes, HeapObject, Trace, Tracer, CELL_SIZE};
use crate::intern::InternedString;
use crate::value::{Value, ValueType};

/// Identifies one compiled function: the module that defines it and its
/// index into that module's function-template table (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRef {
    pub module: InternedString,
    pub index: u32,
}

macro_rules! fixed_size_heap_object {
    ($ty:ty, $value_type:expr) => {
        impl HeapObject for $ty {
            fn value_type(&self) -> ValueType {
                $value_type
            }
            fn cell_count(&self, _cell_size: usize) -> u32 {
                1
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

/// An integer too large for [`Value`]'s embedded 63-bit representation.
#[derive(Debug, Clone, Copy)]
pub struct HeapInteger(pub i64);
impl Trace for HeapInteger {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(HeapInteger, ValueType::HeapInteger);

#[derive(Debug, Clone, Copy)]
pub struct HeapFloat(pub f64);
impl Trace for HeapFloat {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(HeapFloat, ValueType::Float);

/// `true`/`false` are heap-allocated singletons (§4.G: "Null and embedded
/// integers have no heap-allocated header at all", implying booleans do);
/// `Context` interns exactly one of each and hands out `Handle`s to them.
#[derive(Debug, Clone, Copy)]
pub struct HeapBool(pub bool);
impl Trace for HeapBool {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(HeapBool, ValueType::Boolean);

#[derive(Debug, Clone, Copy)]
pub struct HeapString(pub InternedString);
impl Trace for HeapString {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(HeapString, ValueType::String);

#[derive(Debug, Clone, Copy)]
pub struct HeapSymbol(pub InternedString);
impl Trace for HeapSymbol {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(HeapSymbol, ValueType::Symbol);

/// A placeholder materialized for an `Import` member during loading,
/// replaced once the registry resolves it (§6).
#[derive(Debug, Clone, Copy)]
pub struct UnresolvedImportObject;
impl Trace for UnresolvedImportObject {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(UnresolvedImportObject, ValueType::UnresolvedImport);

/// A handle onto a loaded module, e.g. the value an `import` expression
/// evaluates to.
#[derive(Debug, Clone, Copy)]
pub struct ModuleObject(pub InternedString);
impl Trace for ModuleObject {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(ModuleObject, ValueType::Module);

fn variable_cell_count(value_count: usize) -> u32 {
    cells_for_bytes(value_count * std::mem::size_of::<Value>()).max(1)
}

#[derive(Debug, Clone)]
pub struct Tuple(pub Vec<Value>);
impl Trace for Tuple {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit_all(self.0.iter().copied());
    }
}
impl HeapObject for Tuple {
    fn value_type(&self) -> ValueType {
        ValueType::Tuple
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.len())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct Array(pub Vec<Value>);
impl Trace for Array {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit_all(self.0.iter().copied());
    }
}
impl HeapObject for Array {
    fn value_type(&self) -> ValueType {
        ValueType::Array
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.len())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Naive linear-scan set. Good enough for the primitive set this crate's
/// interpreter needs to support; a hashed implementation would need `Value`
/// equality semantics the surface language defines, which is out of scope
/// here (the interpreter only needs somewhere to put `Set` literals).
#[derive(Debug, Clone, Default)]
pub struct HeapSet(pub Vec<Value>);
impl Trace for HeapSet {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit_all(self.0.iter().copied());
    }
}
impl HeapObject for HeapSet {
    fn value_type(&self) -> ValueType {
        ValueType::Set
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.len())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeapMap(pub Vec<(Value, Value)>);
impl Trace for HeapMap {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        for &(k, v) in &self.0 {
            tracer.visit(k);
            tracer.visit(v);
        }
    }
}
impl HeapObject for HeapMap {
    fn value_type(&self) -> ValueType {
        ValueType::Map
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.len() * 2)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The keys of a record literal, in declaration order (§6 `RecordTemplate`).
#[derive(Debug, Clone)]
pub struct RecordTemplate(pub Vec<InternedString>);
impl Trace for RecordTemplate {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
impl HeapObject for RecordTemplate {
    fn value_type(&self) -> ValueType {
        ValueType::RecordTemplate
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.len())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub template: Value,
    pub fields: Vec<Value>,
}
impl Trace for Record {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit(self.template);
        tracer.visit_all(self.fields.iter().copied());
    }
}
impl HeapObject for Record {
    fn value_type(&self) -> ValueType {
        ValueType::Record
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.fields.len() + 1)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A closure's captured variables, linked to its defining scope's
/// environment the way `ir::function::LValue::Closure` addresses them
/// (`{env, level, index}`): `level` walks `parent` links from the innermost
/// environment outward.
#[derive(Debug, Clone)]
pub struct Environment {
    pub parent: Option<Value>,
    pub slots: Vec<Value>,
}
impl Trace for Environment {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(parent) = self.parent {
            tracer.visit(parent);
        }
        tracer.visit_all(self.slots.iter().copied());
    }
}
impl HeapObject for Environment {
    fn value_type(&self) -> ValueType {
        ValueType::Environment
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.slots.len() + 1)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The raw compiled form of a function, before it is closed over an
/// environment. A plain top-level function and a `Closure` with an empty
/// environment both point at the same `CodeFunctionTemplate`.
#[derive(Debug, Clone, Copy)]
pub struct CodeFunctionTemplate(pub FunctionRef);
impl Trace for CodeFunctionTemplate {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(CodeFunctionTemplate, ValueType::CodeFunctionTemplate);

#[derive(Debug, Clone, Copy)]
pub struct Closure {
    pub template: Value,
    pub env: Value,
}
impl Trace for Closure {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit(self.template);
        tracer.visit(self.env);
    }
}
fixed_size_heap_object!(Closure, ValueType::Closure);

#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}
impl Trace for BoundMethod {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit(self.receiver);
        tracer.visit(self.function);
    }
}
fixed_size_heap_object!(BoundMethod, ValueType::BoundMethod);

/// A native callback, in the sync half of the two-shape ABI (§6): runs to
/// completion on the caller's frame and reports its result through `cx`.
pub type NativeSyncFn = fn(&mut crate::interpreter::NativeCallContext<'_>) -> crate::error::VmResult<Value>;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: InternedString,
    pub func: NativeSyncFn,
}
impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({:?})", self.name)
    }
}
impl Trace for NativeFunction {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(NativeFunction, ValueType::NativeFunction);

/// A caught (or in-flight) exception, reified as a value so `catch_panic`
/// can hand it back wrapped in a `Result`.
#[derive(Debug, Clone)]
pub struct ExceptionObject(pub Exception);
impl Trace for ExceptionObject {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        if let Some(payload) = self.0.payload() {
            tracer.visit(*payload);
        }
    }
}
impl HeapObject for ExceptionObject {
    fn value_type(&self) -> ValueType {
        ValueType::Exception
    }
    fn cell_count(&self, _cell_size: usize) -> u32 {
        variable_cell_count(self.0.secondary().len() + 1)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A first-class reference to a coroutine (§3.4, §4.H). The coroutine's
/// actual stack and state live in `coroutine::Scheduler`'s side table,
/// indexed by `CoroutineId`, the same indirection the heap itself uses for
/// large objects; the scheduler roots every live coroutine's stack
/// directly rather than through this wrapper's (empty) `trace`.
#[derive(Debug, Clone, Copy)]
pub struct CoroutineHandle(pub crate::coroutine::CoroutineId);
impl Trace for CoroutineHandle {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(CoroutineHandle, ValueType::Coroutine);

/// A single-use permission to resume a waiting coroutine (§4.H). Liveness
/// is tracked by the coroutine's own state (`Waiting` vs. anything else)
/// rather than by a flag on the token, so a second resume attempt is
/// simply a no-op instead of needing interior mutability here.
#[derive(Debug, Clone, Copy)]
pub struct CoroutineTokenHandle(pub crate::coroutine::CoroutineId);
impl Trace for CoroutineTokenHandle {
    fn trace(&self, _tracer: &mut Tracer<'_>) {}
}
fixed_size_heap_object!(CoroutineTokenHandle, ValueType::CoroutineToken);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, HeapConfig, RootSet};

    struct NoRoots;
    impl RootSet for NoRoots {
        fn trace_roots(&self, _tracer: &mut Tracer<'_>) {}
    }

    #[test]
    fn tuple_traces_its_elements() {
        let mut heap = Heap::new(HeapConfig::default());
        let inner = heap.allocate(HeapInteger(9_000_000_000), false, &NoRoots).unwrap();
        let tuple = heap.allocate(Tuple(vec![inner, Value::null()]), false, &NoRoots).unwrap();
        assert_eq!(heap.value_type(tuple), ValueType::Tuple);
        assert_eq!(heap.get::<Tuple>(tuple).unwrap().0.len(), 2);
    }
}
