//! SSA IR construction, a paged mark-sweep heap, and a coroutine-based
//! bytecode interpreter for the Tendril scripting language.
//!
//! The crate is organized around the three subsystems described by the
//! design: [`ir`] lowers a validated AST into per-function SSA form,
//! [`heap`] and [`handle`] implement the managed heap and its rooting
//! system, and [`coroutine`]/[`interpreter`] run compiled bytecode.
//! [`value`] and [`intern`] are shared across all three.

pub mod context;
pub mod coroutine;
pub mod error;
pub mod handle;
pub mod heap;
pub mod interpreter;
pub mod intern;
pub mod ir;
pub mod module;
pub mod objects;
pub mod value;

pub mod prelude {
    pub use crate::context::{Context, ContextConfig};
    pub use crate::error::{Exception, VmError};
    pub use crate::heap::{Heap, HeapConfig};
    pub use crate::intern::{InternedString, StringTable};
    pub use crate::ir::builder::FunctionIrGen;
    pub use crate::ir::function::Function;
    pub use crate::value::Value;
}
