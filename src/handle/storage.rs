//! Slot storage shared by every handle flavor.
//!
//! Each flavor differs only in who owns the storage and when slots are
//! freed; the slot array itself, and its participation in GC rooting via
//! [`RootSet`], is identical. Mirrors how `handle.hpp`'s flavors all bottom
//! out in the same `HandleData` slot representation.

use crate::heap::{RootSet, Tracer};
use crate::value::Value;

/// A free-list-backed slot array of rooted values.
#[derive(Debug, Default)]
pub struct HandleStorage {
    slots: Vec<Value>,
    free: Vec<u32>,
}

impl HandleStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: Value) -> u32 {
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = value;
            slot
        } else {
            self.slots.push(value);
            (self.slots.len() - 1) as u32
        }
    }

    pub fn free(&mut self, slot: u32) {
        self.slots[slot as usize] = Value::null();
        self.free.push(slot);
    }

    pub fn get(&self, slot: u32) -> Value {
        self.slots[slot as usize]
    }

    pub fn set(&mut self, slot: u32, value: Value) {
        self.slots[slot as usize] = value;
    }

    /// Drops every slot at once, e.g. when a `HandleScope` exits. Cheaper
    /// than freeing one at a time since no slot needs to be individually
    /// recycled -- the whole array is reset.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootSet for HandleStorage {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        tracer.visit_all(self.slots.iter().copied());
    }
}
