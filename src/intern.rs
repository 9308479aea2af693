//! Deduplicated string interning (§3.1, §4.A).
//!
//! Ids are 32-bit and 1-based; `0` is reserved to mean "invalid" so that
//! [`InternedString`] can be stored inline in IR structures without an
//! `Option` wrapper. Insertion is idempotent and strings are immutable once
//! interned, mirroring `common/text/string_table.cpp`'s two-map design
//! (content -> id, id -> entry) over a monotonic arena.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use crate::error::VmError;

/// A 32-bit, 1-based handle to an interned string. `None`-like values are
/// represented by simply not holding an `InternedString` (callers that need
/// an "absent" interned string use `Option<InternedString>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InternedString(NonZeroU32);

impl InternedString {
    fn from_index(index: u32) -> Self {
        Self(NonZeroU32::new(index).expect("string table ids are 1-based"))
    }

    pub fn index(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "str#{}", self.0)
    }
}

/// Deduplicated, append-only string storage with stable ids.
///
/// `insert` is idempotent: interning the same bytes twice returns the same
/// id. `find` performs an idempotent lookup without allocating. Once
/// interned, a string's bytes never change and are never freed for the
/// lifetime of the table.
#[derive(Debug, Default)]
pub struct StringTable {
    // Owns the actual bytes; entries are never removed or mutated.
    by_index: Vec<Box<str>>,
    by_content: HashMap<Box<str>, InternedString>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning an existing id if one already matches.
    ///
    /// Mirrors the C++ implementation's rollback discipline: the content map
    /// is only populated once the index map insertion has succeeded, so the
    /// two maps never observe a torn update even though here, in safe Rust,
    /// the only failure mode is exhausting the id space before either map is
    /// touched.
    pub fn insert(&mut self, s: &str) -> Result<InternedString, VmError> {
        if let Some(id) = self.by_content.get(s) {
            return Ok(*id);
        }

        let next_index = u32::try_from(self.by_index.len() + 1).map_err(|_| VmError::StringTableExhausted {
            attempted: u32::MAX,
        })?;
        let id = InternedString::from_index(next_index);

        let boxed: Box<str> = s.into();
        self.by_index.push(boxed.clone());
        self.by_content.insert(boxed, id);
        Ok(id)
    }

    /// Looks up an already-interned string without inserting it.
    pub fn find(&self, s: &str) -> Option<InternedString> {
        self.by_content.get(s).copied()
    }

    /// Returns the bytes for a previously interned id.
    ///
    /// # Panics
    /// Panics if `id` was not produced by this table (ids from a different
    /// `Context`'s table are a caller bug, not a recoverable error).
    pub fn value(&self, id: InternedString) -> &str {
        &self.by_index[(id.index() - 1) as usize]
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut table = StringTable::new();
        let a = table.insert("hello").unwrap();
        let b = table.insert("hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_matches_insert() {
        let mut table = StringTable::new();
        let id = table.insert("world").unwrap();
        assert_eq!(table.find("world"), Some(id));
        assert_eq!(table.find("nope"), None);
    }

    #[test]
    fn value_round_trips() {
        let mut table = StringTable::new();
        let id = table.insert("round-trip").unwrap();
        assert_eq!(table.value(id), "round-trip");
    }

    #[test]
    fn distinct_content_gets_distinct_ids() {
        let mut table = StringTable::new();
        let a = table.insert("a").unwrap();
        let b = table.insert("b").unwrap();
        assert_ne!(a, b);
    }
}
