//! The `Context`: the one piece of mutable state every other part of the
//! VM is handed explicitly (§9, "Global mutable state"). Bundles the string
//! table, the heap, the persistent handle table, and the module registry.
//! No part of this crate reaches for a process-wide singleton; multiple
//! `Context`s may coexist in one process, each fully independent.

use crate::heap::{CollectionStats, Heap, HeapConfig, HeapObject, RootSet, Tracer};
use crate::intern::StringTable;
use crate::module::{ModuleDef, ModuleRegistry};
use crate::objects::HeapBool;
use crate::value::{type_of, PublicType, Value};
use crate::{error::VmResult, handle::GlobalHandles};

#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    pub heap: HeapConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { heap: HeapConfig::default() }
    }
}

/// Owns everything a running program needs that must outlive any single
/// call frame: interned strings, the managed heap, handles kept alive for
/// the context's whole lifetime, and the modules that have been loaded.
pub struct Context {
    pub strings: StringTable,
    pub heap: Heap,
    pub globals: GlobalHandles,
    pub modules: ModuleRegistry,
    /// The two boolean singletons (§4.G: booleans are heap-allocated, unlike
    /// null and embedded integers). Allocated once at construction and
    /// handed out by [`Context::well_known_bool`] instead of reallocating a
    /// fresh `HeapBool` on every comparison.
    true_value: Value,
    false_value: Value,
}

/// A view of the parts of a `Context` the heap needs to scan as GC roots,
/// borrowed separately from `heap` itself so `Context::allocate` and
/// `Context::collect` don't need to hand the heap a root set that contains
/// the heap.
struct ContextRoots<'a> {
    globals: &'a GlobalHandles,
    modules: &'a ModuleRegistry,
    true_value: Value,
    false_value: Value,
}

impl RootSet for ContextRoots<'_> {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        self.globals.trace_roots(tracer);
        self.modules.trace_roots(tracer);
        tracer.visit(self.true_value);
        tracer.visit(self.false_value);
    }
}

/// Joins the context-wide roots with a caller-supplied extra root set
/// (the scheduler's live coroutine stacks, during interpretation) without
/// needing `ContextRoots` itself to know about the scheduler.
struct CombinedRoots<'a> {
    context: ContextRoots<'a>,
    extra: &'a dyn RootSet,
}

impl RootSet for CombinedRoots<'_> {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        self.context.trace_roots(tracer);
        self.extra.trace_roots(tracer);
    }
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        let mut heap = Heap::new(config.heap);
        let globals = GlobalHandles::new();
        let modules = ModuleRegistry::new();
        let bootstrap_roots = ContextRoots {
            globals: &globals,
            modules: &modules,
            true_value: Value::null(),
            false_value: Value::null(),
        };
        let true_value = heap.allocate(HeapBool(true), false, &bootstrap_roots).expect("allocating the boolean singletons cannot fail on a fresh heap");
        let false_value = heap.allocate(HeapBool(false), false, &bootstrap_roots).expect("allocating the boolean singletons cannot fail on a fresh heap");
        Self {
            strings: StringTable::new(),
            heap,
            globals,
            modules,
            true_value,
            false_value,
        }
    }

    /// The shared `true`/`false` singleton (§4.G).
    pub fn well_known_bool(&self, value: bool) -> Value {
        if value {
            self.true_value
        } else {
            self.false_value
        }
    }

    /// Allocates a heap object, rooted against everything this context
    /// currently keeps alive (globals and loaded modules). Coroutine-local
    /// and scope-local roots are the caller's responsibility to fold in
    /// (§4.F); a bare `Context::allocate` only sees the context-wide roots.
    pub fn allocate<T: HeapObject + 'static>(&mut self, object: T, has_finalizer: bool) -> VmResult<Value> {
        let roots = ContextRoots {
            globals: &self.globals,
            modules: &self.modules,
            true_value: self.true_value,
            false_value: self.false_value,
        };
        self.heap.allocate(object, has_finalizer, &roots)
    }

    /// Like [`allocate`](Self::allocate), additionally rooting `extra` --
    /// the interpreter's way of keeping every live coroutine's stack slots
    /// alive across an allocation triggered mid-instruction (§4.F, §9).
    pub fn allocate_rooted<T: HeapObject + 'static>(&mut self, object: T, has_finalizer: bool, extra: &dyn RootSet) -> VmResult<Value> {
        let roots = CombinedRoots {
            context: ContextRoots {
                globals: &self.globals,
                modules: &self.modules,
                true_value: self.true_value,
                false_value: self.false_value,
            },
            extra,
        };
        self.heap.allocate(object, has_finalizer, &roots)
    }

    /// Forces a collection against the context-wide root set. Real
    /// collections triggered during a call also need the live coroutine's
    /// frame and handle roots; those are folded in by the interpreter,
    /// which extends this root set rather than replacing it.
    pub fn collect(&mut self) -> CollectionStats {
        let roots = ContextRoots {
            globals: &self.globals,
            modules: &self.modules,
            true_value: self.true_value,
            false_value: self.false_value,
        };
        self.heap.collect(&roots)
    }

    /// Like [`collect`](Self::collect), additionally rooting `extra`.
    pub fn collect_rooted(&mut self, extra: &dyn RootSet) -> CollectionStats {
        let roots = CombinedRoots {
            context: ContextRoots {
                globals: &self.globals,
                modules: &self.modules,
                true_value: self.true_value,
                false_value: self.false_value,
            },
            extra,
        };
        self.heap.collect(&roots)
    }

    /// The user-visible type of any value (§4.G), resolving the heap-backed
    /// case through this context's own heap.
    pub fn value_type(&self, value: Value) -> PublicType {
        type_of(value, |v| self.heap.value_type(v))
    }

    /// Loads a batch of modules in dependency order (§6). `materialize`
    /// turns one member into a runtime `Value`, typically allocating
    /// `String`/`Symbol`/`Record` heap objects through `self` and resolving
    /// `Import` members by reading the already-loaded dependency's exports
    /// out of `registry`.
    pub fn load_modules(
        &mut self,
        defs: Vec<ModuleDef>,
        mut materialize: impl FnMut(&crate::module::MemberKind, &ModuleRegistry, &mut StringTable, &mut Heap) -> VmResult<Value>,
    ) -> VmResult<()> {
        let Context { strings, heap, modules, .. } = self;
        modules.load_all(defs, strings, |member, registry, strings| materialize(member, registry, strings, heap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Trace;
    use crate::value::ValueType;
    use std::any::Any;

    #[derive(Debug)]
    struct Counter(i64);
    impl Trace for Counter {
        fn trace(&self, _tracer: &mut Tracer<'_>) {}
    }
    impl HeapObject for Counter {
        fn value_type(&self) -> ValueType {
            ValueType::HeapInteger
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
    fn allocate_and_type_of_round_trip() {
        let mut ctx = Context::new(ContextConfig::default());
        let value = ctx.allocate(Counter(5), false).unwrap();
        assert_eq!(ctx.value_type(value), PublicType::Integer);
        assert_eq!(ctx.heap.get::<Counter>(value).unwrap().0, 5);
    }

    #[test]
    fn null_and_embedded_integers_need_no_heap() {
        let ctx = Context::new(ContextConfig::default());
        assert_eq!(ctx.value_type(Value::null()), PublicType::Null);
        assert_eq!(ctx.value_type(Value::from_embedded_int(7).unwrap()), PublicType::Integer);
    }

    #[test]
    fn a_global_handle_keeps_its_value_alive_across_collection() {
        let mut ctx = Context::new(ContextConfig::default());
        let value = ctx.allocate(Counter(9), false).unwrap();
        let handle = ctx.globals.create::<Counter>(value);
        ctx.collect();
        assert_eq!(handle.get(&ctx.globals, &ctx.heap).0, 9);
    }
}
