//! A single heap page: fixed-size cell storage plus the block/mark bitmaps
//! that describe it (§3.3, §4.E.1).
//!
//! Grounded on `vm/heap/chunks.hpp`'s `Page`. The C++ layout packs header,
//! bitmaps and cells into one contiguous allocation computed by
//! `PageLayout`; here the bitmaps are real ([`Bitset`]) but the cell
//! contents live in a sparse `HashMap` keyed by the block's starting cell,
//! since Rust object storage doesn't need (or want) raw byte placement to
//! get the same bitmap-driven bookkeeping. See `Value`'s module docs for
//! why this crate represents heap references as indices rather than
//! pointers.

use std::collections::HashMap;

use super::bitset::Bitset;
use super::trace::{HeapObject, Tracer};
use crate::value::Value;

/// A block/mark bitmap pair and the objects they describe, for one page.
///
/// `block_bitmap` has a set bit at every cell that starts an allocated (or
/// free-listed) block; the next `cell_count - 1` bits after it are clear,
/// marking the rest of the block's extent, exactly as §3.3 describes the
/// joint encoding. `mark_bitmap` is only meaningful between a collection's
/// mark and sweep phases.
#[derive(Debug)]
pub struct Page {
    pub id: u32,
    cells_total: u32,
    block_bitmap: Bitset,
    mark_bitmap: Bitset,
    objects: HashMap<u32, Box<dyn HeapObject>>,
    finalizers: Vec<u32>,
    allocated_cells: u32,
}

pub struct SweepStats {
    pub reclaimed_cells: u32,
    pub objects_swept: u32,
    pub finalized: Vec<Box<dyn HeapObject>>,
}

impl Page {
    pub fn new(id: u32, cells_total: u32) -> Self {
        Self {
            id,
            cells_total,
            block_bitmap: Bitset::with_len(cells_total as usize),
            mark_bitmap: Bitset::with_len(cells_total as usize),
            objects: HashMap::new(),
            finalizers: Vec::new(),
            allocated_cells: 0,
        }
    }

    pub fn cells_total(&self) -> u32 {
        self.cells_total
    }

    pub fn allocated_cells(&self) -> u32 {
        self.allocated_cells
    }

    pub fn free_cells(&self) -> u32 {
        self.cells_total - self.allocated_cells
    }

    pub fn is_block_start(&self, cell: u32) -> bool {
        self.block_bitmap.get(cell as usize)
    }

    /// Places `object` at `start`, marking its cell extent in the block
    /// bitmap. `has_finalizer` records the cell for `invoke_finalizers`.
    pub fn place(&mut self, start: u32, cells: u32, object: Box<dyn HeapObject>, has_finalizer: bool) {
        self.block_bitmap.set(start as usize);
        self.allocated_cells += cells;
        if has_finalizer {
            self.finalizers.push(start);
        }
        self.objects.insert(start, object);
    }

    pub fn get(&self, start: u32) -> Option<&dyn HeapObject> {
        self.objects.get(&start).map(|b| b.as_ref())
    }

    pub fn get_mut(&mut self, start: u32) -> Option<&mut Box<dyn HeapObject>> {
        self.objects.get_mut(&start)
    }

    pub fn mark(&mut self, start: u32) -> bool {
        let already = self.mark_bitmap.get(start as usize);
        if !already {
            self.mark_bitmap.set(start as usize);
        }
        already
    }

    pub fn is_marked(&self, start: u32) -> bool {
        self.mark_bitmap.get(start as usize)
    }

    /// Calls `trace` on every live object in the page, handing each a
    /// `Tracer` writing into `pending`. Used by the collector's mark phase.
    pub fn trace_all(&self, pending: &mut Vec<Value>) {
        for object in self.objects.values() {
            let mut tracer = Tracer::new(pending);
            object.trace(&mut tracer);
        }
    }

    pub fn trace_marked(&self, pending: &mut Vec<Value>) {
        for (&start, object) in &self.objects {
            if self.mark_bitmap.get(start as usize) {
                let mut tracer = Tracer::new(pending);
                object.trace(&mut tracer);
            }
        }
    }

    /// Reclaims every unmarked block, clearing the mark bitmap for the next
    /// cycle and running any due finalizers (§4.E.5). Returns freed runs
    /// via `on_free_run` so the caller can thread them into `FreeSpace`.
    pub fn sweep(&mut self, mut on_free_run: impl FnMut(u32, u32)) -> SweepStats {
        let mut reclaimed = 0u32;
        let mut swept = 0u32;
        let mut finalized = Vec::new();
        let starts: Vec<u32> = self.objects.keys().copied().collect();

        for start in starts {
            if self.mark_bitmap.get(start as usize) {
                continue;
            }
            let object = self.objects.remove(&start).expect("start came from objects.keys()");
            let cells = object.cell_count(super::CELL_SIZE) + 1;
            self.block_bitmap.clear_run(start as usize, cells as usize);
            self.allocated_cells -= cells;
            reclaimed += cells;
            swept += 1;
            on_free_run(start, cells);
            if self.finalizers.contains(&start) {
                self.finalizers.retain(|&c| c != start);
                finalized.push(object);
            }
        }

        self.mark_bitmap = Bitset::with_len(self.cells_total as usize);
        SweepStats {
            reclaimed_cells: reclaimed,
            objects_swept: swept,
            finalized,
        }
    }
}
