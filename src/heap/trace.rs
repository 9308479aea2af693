//! The tracing interface every heap-allocated object implements (§3.3/§4.E.4).
//!
//! Grounded on `vm/heap/new_collector.cpp`'s `Tracer`, which overloads
//! `operator()` for each field kind a layout can contain. Rust has no
//! overload set to hang that on, so `Tracer::visit` takes a single `Value`
//! and each object's `trace` implementation calls it once per child
//! reference it owns.

use std::any::Any;
use std::fmt;

use crate::value::{Value, ValueType};

/// Implemented by every concrete heap object layout. `cell_count` lets the
/// heap compute how many cells an object needs before it exists; `trace`
/// lets the collector find its children without knowing its concrete type.
pub trait HeapObject: Trace + fmt::Debug {
    fn value_type(&self) -> ValueType;

    /// Cells required to store this object, *not* counting the header cell.
    fn cell_count(&self, cell_size: usize) -> u32;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub trait Trace {
    fn trace(&self, tracer: &mut Tracer<'_>);
}

/// Collects the values reachable from one object (or from a root set) during
/// the mark phase. The collector drains `pending` iteratively rather than
/// recursing, so deeply nested structures (long linked lists of tuples)
/// don't blow the native stack.
pub struct Tracer<'a> {
    pending: &'a mut Vec<Value>,
}

impl<'a> Tracer<'a> {
    pub fn new(pending: &'a mut Vec<Value>) -> Self {
        Self { pending }
    }

    pub fn visit(&mut self, value: Value) {
        if value.is_heap_ref() {
            self.pending.push(value);
        }
    }

    pub fn visit_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for v in values {
            self.visit(v);
        }
    }
}

/// A set of externally-rooted values: handles, coroutine stacks, global
/// variables. The collector treats this as the starting worklist, matching
/// `Collector::collect`'s call into `RootSet::trace` before it walks pages.
pub trait RootSet {
    fn trace_roots(&self, tracer: &mut Tracer<'_>);
}

impl RootSet for [Value] {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        tracer.visit_all(self.iter().copied());
    }
}
