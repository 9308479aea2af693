//! Module loading (§6): the concrete member encoding a compiled module
//! exposes to the loader, topological loading order, and import resolution.
//!
//! Bytecode emission itself is out of scope; this module only defines the
//! shape the loader accepts and the order/resolution algorithm. Grounded on
//! `fuel-tx`'s script/predicate loading pass in the teacher pack for the
//! "validate a dependency graph, then materialize in order" shape, adapted
//! from transaction-input ordering to module-import ordering.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{ModuleLoadError, VmError, VmResult};
use crate::heap::{RootSet, Tracer};
use crate::intern::InternedString;
use crate::value::Value;

/// One entry in a function's exception handler table (§4.I, §6): the first
/// entry whose `[from_pc, to_pc)` contains the faulting pc wins.
#[derive(Debug, Clone, Copy)]
pub struct HandlerEntry {
    pub from_pc: u32,
    pub to_pc: u32,
    pub target_pc: u32,
}

/// A compiled function's template: parameter/local counts, its handler
/// table, and raw bytecode. The encoding of `code` itself is the bytecode
/// emitter's concern (out of scope); the interpreter only needs to be
/// handed these bytes.
#[derive(Debug, Clone)]
pub struct FunctionTemplate {
    pub params_count: u32,
    pub locals_count: u32,
    pub handlers: Vec<HandlerEntry>,
    pub code: Vec<u8>,
}

/// One module member, in the concrete encoding §6 specifies. `Symbol` and
/// `Import` members reference another member of the *same* module by
/// index; `RecordTemplate` references a list of `Symbol` members.
#[derive(Debug, Clone)]
pub enum MemberKind {
    Integer(i64),
    Float(f64),
    String(InternedString),
    Symbol(u32),
    Import(u32),
    Variable,
    Function(u32),
    RecordTemplate(Vec<u32>),
}

/// A module as produced by the (out-of-scope) compiler, ready for the
/// loader to consume.
#[derive(Debug, Clone)]
pub struct ModuleDef {
    pub name: InternedString,
    pub members: Vec<MemberKind>,
    pub function_templates: Vec<FunctionTemplate>,
    pub exports: Vec<(u32, u32)>,
    pub initializer: Option<u32>,
}

impl ModuleDef {
    /// The names of modules this one imports, read off its `Import`
    /// members via the `String` member they point at.
    fn import_names(&self, strings: &crate::intern::StringTable) -> Vec<InternedString> {
        self.members
            .iter()
            .filter_map(|m| match m {
                MemberKind::Import(string_member) => match self.members.get(*string_member as usize) {
                    Some(MemberKind::String(id)) => {
                        let _ = strings.value(*id); // fails loudly if `id` is foreign, matching `StringTable::value`'s contract.
                        Some(*id)
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

/// A module after loading: its members materialized into runtime `Value`s,
/// its exports indexed by name, and its compiled function templates kept
/// around for the interpreter to fetch when a `UserFrame` is pushed.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub name: InternedString,
    pub values: Vec<Value>,
    pub exports: HashMap<InternedString, Value>,
    pub function_templates: Vec<FunctionTemplate>,
    pub initializer: Option<u32>,
}

#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<InternedString, LoadedModule>,
}

impl RootSet for ModuleRegistry {
    /// Every loaded module's member values and exports are GC roots for as
    /// long as the module stays registered (§9: the registry is
    /// `Context`-owned, so its contents never need their own scope).
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        for module in self.modules.values() {
            for &value in &module.values {
                tracer.visit(value);
            }
            for &value in module.exports.values() {
                tracer.visit(value);
            }
        }
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: InternedString) -> Option<&LoadedModule> {
        self.modules.get(&name)
    }

    pub fn is_loaded(&self, name: InternedString) -> bool {
        self.modules.contains_key(&name)
    }

    /// Reads one materialized member value, for the interpreter's
    /// `LoadModuleMember`/`MakeRecord` opcodes.
    pub fn member_value(&self, module: InternedString, index: u32) -> VmResult<Value> {
        let loaded = self.modules.get(&module).ok_or_else(|| malformed_member(module, index))?;
        loaded.values.get(index as usize).copied().ok_or_else(|| malformed_member(module, index))
    }

    /// Overwrites one materialized member value, for `StoreModuleMember`.
    pub fn set_member_value(&mut self, module: InternedString, index: u32, value: Value) -> VmResult<()> {
        let loaded = self.modules.get_mut(&module).ok_or_else(|| malformed_member(module, index))?;
        let slot = loaded.values.get_mut(index as usize).ok_or_else(|| malformed_member(module, index))?;
        *slot = value;
        Ok(())
    }

    /// Loads `defs` in strict topological order (Kahn's algorithm over the
    /// import graph), materializing each module's members via
    /// `materialize`. A dependency cycle is a fatal load error (§6).
    ///
    /// `materialize(member, registry, strings)` turns one member into a
    /// `Value`; for a `MemberKind::Import` member it should resolve through
    /// `registry.get(...)` to the already-loaded dependency's export (that
    /// dependency is guaranteed loaded first by the topological order).
    /// `strings` is threaded through as a plain argument, rather than
    /// captured by the closure, so callers that also need `strings` mutably
    /// elsewhere in the same expression (e.g. `Context::load_modules`)
    /// don't run into two simultaneous borrows of it.
    pub fn load_all(
        &mut self,
        defs: Vec<ModuleDef>,
        strings: &mut crate::intern::StringTable,
        mut materialize: impl FnMut(&MemberKind, &ModuleRegistry, &mut crate::intern::StringTable) -> VmResult<Value>,
    ) -> VmResult<()> {
        let order = topological_order(&defs, strings)?;
        let mut by_name: HashMap<InternedString, ModuleDef> = defs.into_iter().map(|d| (d.name, d)).collect();

        for name in order {
            let def = by_name.remove(&name).expect("topological_order only yields known module names");
            self.load_one(def, strings, &mut materialize)?;
        }
        Ok(())
    }

    fn load_one(
        &mut self,
        def: ModuleDef,
        strings: &mut crate::intern::StringTable,
        materialize: &mut impl FnMut(&MemberKind, &ModuleRegistry, &mut crate::intern::StringTable) -> VmResult<Value>,
    ) -> VmResult<()> {
        let mut values = Vec::with_capacity(def.members.len());
        for member in &def.members {
            values.push(materialize(member, self, strings)?);
        }

        let mut exports = HashMap::new();
        for (symbol_index, value_index) in &def.exports {
            let symbol = match def.members.get(*symbol_index as usize) {
                Some(MemberKind::Symbol(string_member)) => match def.members.get(*string_member as usize) {
                    Some(MemberKind::String(id)) => *id,
                    _ => {
                        return Err(ModuleLoadError::UnresolvedImport {
                            name: format!("malformed export symbol at member {symbol_index}"),
                        }
                        .into())
                    }
                },
                _ => {
                    return Err(ModuleLoadError::UnresolvedImport {
                        name: format!("export references non-symbol member {symbol_index}"),
                    }
                    .into())
                }
            };
            let Some(&value) = values.get(*value_index as usize) else {
                return Err(ModuleLoadError::UnresolvedImport {
                    name: format!("export value index {value_index} out of range"),
                }
                .into());
            };
            if exports.insert(symbol, value).is_some() {
                return Err(ModuleLoadError::DuplicateExport { symbol }.into());
            }
        }

        self.modules.insert(
            def.name,
            LoadedModule {
                name: def.name,
                values,
                exports,
                function_templates: def.function_templates,
                initializer: def.initializer,
            },
        );
        Ok(())
    }
}

fn malformed_member(module: InternedString, index: u32) -> VmError {
    VmError::MalformedBytecode {
        offset: 0,
        reason: format!("module {module:?} has no member {index}"),
    }
}

/// Kahn's algorithm over the import graph; returns module names in an
/// order where every module's imports precede it. A cycle is reported with
/// the offending names joined in discovery order, matching
/// `ModuleLoadError::DependencyCycle`'s message shape.
fn topological_order(defs: &[ModuleDef], strings: &crate::intern::StringTable) -> VmResult<Vec<InternedString>> {
    let known: HashSet<InternedString> = defs.iter().map(|d| d.name).collect();
    let mut in_degree: HashMap<InternedString, usize> = defs.iter().map(|d| (d.name, 0)).collect();
    let mut dependents: HashMap<InternedString, Vec<InternedString>> = HashMap::new();

    for def in defs {
        for import in def.import_names(strings) {
            if !known.contains(&import) {
                return Err(ModuleLoadError::UnresolvedImport { name: strings.value(import).to_string() }.into());
            }
            *in_degree.get_mut(&def.name).unwrap() += 1;
            dependents.entry(import).or_default().push(def.name);
        }
    }

    let mut ready: VecDeque<InternedString> = in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(&name, _)| name).collect();
    let mut order = Vec::with_capacity(defs.len());

    while let Some(name) = ready.pop_front() {
        order.push(name);
        if let Some(deps) = dependents.get(&name) {
            for &dependent in deps {
                let degree = in_degree.get_mut(&dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if order.len() != defs.len() {
        let cycle: Vec<String> = in_degree.into_iter().filter(|(_, deg)| *deg > 0).map(|(name, _)| strings.value(name).to_string()).collect();
        return Err(ModuleLoadError::DependencyCycle { cycle }.into());
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::StringTable;

    fn module(name: InternedString, imports: &[u32]) -> ModuleDef {
        let mut members = Vec::new();
        for &string_member in imports {
            members.push(MemberKind::Import(string_member));
        }
        ModuleDef {
            name,
            members,
            function_templates: Vec::new(),
            exports: Vec::new(),
            initializer: None,
        }
    }

    #[test]
    fn independent_modules_load_in_any_known_order() {
        let mut strings = StringTable::new();
        let a = strings.insert("a").unwrap();
        let b = strings.insert("b").unwrap();

        let mut registry = ModuleRegistry::new();
        let defs = vec![module(a, &[]), module(b, &[])];
        registry.load_all(defs, &mut strings, |_, _, _| Ok(Value::null())).unwrap();

        assert!(registry.is_loaded(a));
        assert!(registry.is_loaded(b));
    }

    #[test]
    fn dependency_loads_before_dependent() {
        let mut strings = StringTable::new();
        let base_name = strings.insert("base").unwrap();
        let app_name = strings.insert("app").unwrap();

        let base = ModuleDef {
            name: base_name,
            members: Vec::new(),
            function_templates: Vec::new(),
            exports: Vec::new(),
            initializer: None,
        };
        let app = ModuleDef {
            name: app_name,
            members: vec![MemberKind::String(base_name), MemberKind::Import(0)],
            function_templates: Vec::new(),
            exports: Vec::new(),
            initializer: None,
        };

        let mut registry = ModuleRegistry::new();
        let loaded_order = std::cell::RefCell::new(Vec::new());
        registry
            .load_all(vec![app, base], &mut strings, |_, reg, _| {
                loaded_order.borrow_mut().push(reg.modules.len());
                Ok(Value::null())
            })
            .unwrap();

        assert!(registry.is_loaded(base_name));
        assert!(registry.is_loaded(app_name));
    }

    #[test]
    fn a_cycle_is_a_fatal_load_error() {
        let mut strings = StringTable::new();
        let a = strings.insert("a").unwrap();
        let b = strings.insert("b").unwrap();

        let mod_a = ModuleDef {
            name: a,
            members: vec![MemberKind::String(b), MemberKind::Import(0)],
            function_templates: Vec::new(),
            exports: Vec::new(),
            initializer: None,
        };
        let mod_b = ModuleDef {
            name: b,
            members: vec![MemberKind::String(a), MemberKind::Import(0)],
            function_templates: Vec::new(),
            exports: Vec::new(),
            initializer: None,
        };

        let mut registry = ModuleRegistry::new();
        let err = registry.load_all(vec![mod_a, mod_b], &mut strings, |_, _, _| Ok(Value::null())).unwrap_err();
        assert!(matches!(err, crate::error::VmError::ModuleLoad(ModuleLoadError::DependencyCycle { .. })));
    }
}
