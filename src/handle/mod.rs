//! The rooting system: typed handles into the heap that the collector scans
//! as part of its root set (§3.3, §4.F).
//!
//! Grounded on `vm/handles/handle.hpp`, which defines four handle flavors
//! distinguished by who owns the backing storage and when it's released:
//!
//! - [`HandleScope`] ("Scope"/"Local"): stack-discipline, freed all at once
//!   when the scope is dropped. The common case inside native function
//!   implementations.
//! - [`GlobalHandles`] ("Global"): persists until explicitly freed; used for
//!   values a `Context` needs to keep alive indefinitely (interned type
//!   objects, the root module table).
//! - [`ExternalHandles`] ("External"): same lifecycle as Global, reserved
//!   for roots held by native calls that are suspended across a yield.
//! - [`FrameHandles`] ("Frame"): owned by one coroutine call frame, freed
//!   when that frame is popped; embedded directly in `coroutine::Frame`.
//!
//! The C++ original layers `EnableUpcast`/`EnableDowncast` templates on top
//! of each flavor to let a `Handle<Derived>` convert to `Handle<Base>`. This
//! crate's heap objects aren't organized in a class hierarchy -- a value's
//! concrete Rust type *is* its most specific type -- so that machinery has
//! no counterpart here: narrowing a handle is just `Heap::get::<T>`, which
//! already returns `None` on a type mismatch instead of needing a distinct
//! "maybe" handle template for it.

mod storage;

pub use storage::HandleStorage;

use std::marker::PhantomData;

use crate::heap::{Heap, HeapObject, RootSet, Tracer};
use crate::value::Value;

/// Anything that owns a [`HandleStorage`] and can be indexed by slot.
pub trait HandleSource {
    fn value(&self, slot: u32) -> Value;
    fn set_value(&mut self, slot: u32, value: Value);
}

macro_rules! handle_source_for {
    ($ty:ty) => {
        impl HandleSource for $ty {
            fn value(&self, slot: u32) -> Value {
                self.storage.get(slot)
            }
            fn set_value(&mut self, slot: u32, value: Value) {
                self.storage.set(slot, value)
            }
        }

        impl RootSet for $ty {
            fn trace_roots(&self, tracer: &mut Tracer<'_>) {
                self.storage.trace_roots(tracer);
            }
        }
    };
}

/// A read-only handle that is guaranteed to reference a live, non-null `T`.
#[derive(Debug)]
pub struct Handle<T> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A handle that may additionally be null (e.g. an optional out parameter
/// that was never written, or a lookup that can miss).
#[derive(Debug)]
pub struct MaybeHandle<T> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A handle the holder is allowed to overwrite in place, e.g. to rebind a
/// local variable's root to a new value after a GC-triggering call.
#[derive(Debug)]
pub struct MutHandle<T> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

/// A write-only out parameter: the callee fills it in, the caller never
/// reads it through this handle.
#[derive(Debug)]
pub struct OutHandle<T> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

pub type MaybeMutHandle<T> = MutHandle<T>;
pub type MaybeOutHandle<T> = OutHandle<T>;

impl<T: HeapObject + 'static> Handle<T> {
    fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn get<'h, S: HandleSource>(&self, source: &S, heap: &'h Heap) -> &'h T {
        heap.get::<T>(source.value(self.slot))
            .expect("Handle<T> invariant: slot always holds a live, well-typed value")
    }

    pub fn value<S: HandleSource>(&self, source: &S) -> Value {
        source.value(self.slot)
    }
}

impl<T: HeapObject + 'static> MaybeHandle<T> {
    fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn get<'h, S: HandleSource>(&self, source: &S, heap: &'h Heap) -> Option<&'h T> {
        let value = source.value(self.slot);
        if value.is_null() {
            return None;
        }
        heap.get::<T>(value)
    }

    pub fn is_null<S: HandleSource>(&self, source: &S) -> bool {
        source.value(self.slot).is_null()
    }
}

impl<T: HeapObject + 'static> MutHandle<T> {
    fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn get<'h, S: HandleSource>(&self, source: &S, heap: &'h Heap) -> &'h T {
        Handle::<T>::new(self.slot).get(source, heap)
    }

    pub fn set<S: HandleSource>(&self, source: &mut S, value: Value) {
        source.set_value(self.slot, value);
    }
}

impl<T> OutHandle<T> {
    fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn set<S: HandleSource>(&self, source: &mut S, value: Value) {
        source.set_value(self.slot, value);
    }
}

/// Stack-discipline handle storage. Intended to be created at the start of
/// a native function body and dropped at its end, the same way the
/// original's `HandleScope` is instantiated on the C++ call stack.
#[derive(Debug, Default)]
pub struct HandleScope {
    storage: HandleStorage,
}

handle_source_for!(HandleScope);

impl HandleScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local<T: HeapObject + 'static>(&mut self, value: Value) -> Handle<T> {
        Handle::new(self.storage.alloc(value))
    }

    pub fn local_maybe<T: HeapObject + 'static>(&mut self, value: Value) -> MaybeHandle<T> {
        MaybeHandle::new(self.storage.alloc(value))
    }

    pub fn local_mut<T: HeapObject + 'static>(&mut self, value: Value) -> MutHandle<T> {
        MutHandle::new(self.storage.alloc(value))
    }

    pub fn local_out<T>(&mut self) -> OutHandle<T> {
        OutHandle::new(self.storage.alloc(Value::null()))
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// Handles that persist until explicitly released, used for values a
/// [`crate::context::Context`] keeps alive for its whole lifetime.
#[derive(Debug, Default)]
pub struct GlobalHandles {
    storage: HandleStorage,
}

handle_source_for!(GlobalHandles);

impl GlobalHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<T: HeapObject + 'static>(&mut self, value: Value) -> Handle<T> {
        Handle::new(self.storage.alloc(value))
    }

    pub fn release<T>(&mut self, handle: Handle<T>) {
        self.storage.free(handle.slot);
    }
}

/// Roots held by a native call suspended mid-coroutine-yield, released when
/// the call resumes and returns. Same representation as [`GlobalHandles`];
/// kept as a distinct type so call sites can't mix the two up.
#[derive(Debug, Default)]
pub struct ExternalHandles {
    storage: HandleStorage,
}

handle_source_for!(ExternalHandles);

impl ExternalHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<T: HeapObject + 'static>(&mut self, value: Value) -> Handle<T> {
        Handle::new(self.storage.alloc(value))
    }

    pub fn release<T>(&mut self, handle: Handle<T>) {
        self.storage.free(handle.slot);
    }
}

/// Roots scoped to one coroutine call frame; embedded in
/// `coroutine::Frame` and cleared in one shot when the frame is popped.
#[derive(Debug, Default)]
pub struct FrameHandles {
    storage: HandleStorage,
}

handle_source_for!(FrameHandles);

impl FrameHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local<T: HeapObject + 'static>(&mut self, value: Value) -> Handle<T> {
        Handle::new(self.storage.alloc(value))
    }

    pub fn clear(&mut self) {
        self.storage.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{HeapConfig, Trace};
    use std::any::Any;

    #[derive(Debug)]
    struct Thing(u32);
    impl Trace for Thing {
        fn trace(&self, _tracer: &mut Tracer<'_>) {}
    }
    impl HeapObject for Thing {
        fn value_type(&self) -> crate::value::ValueType {
            crate::value::ValueType::String
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

    #[test]
    fn local_handle_resolves_through_scope_and_heap() {
        let mut heap = Heap::new(HeapConfig::default());
        let mut scope = HandleScope::new();
        let value = heap.allocate(Thing(7), false, &scope).unwrap();
        let handle: Handle<Thing> = scope.local(value);
        assert_eq!(handle.get(&scope, &heap).0, 7);
    }

    #[test]
    fn maybe_handle_reports_null() {
        let mut scope = HandleScope::new();
        let handle: MaybeHandle<Thing> = scope.local_maybe(Value::null());
        assert!(handle.is_null(&scope));
    }

    #[test]
    fn scope_drop_clears_all_slots_at_once() {
        let mut scope = HandleScope::new();
        let _a: OutHandle<Thing> = scope.local_out();
        let _b: OutHandle<Thing> = scope.local_out();
        assert_eq!(scope.len(), 2);
        drop(scope);
    }
}
