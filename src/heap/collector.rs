//! The mark-sweep collector proper (§3.3, §4.E.4-5).
//!
//! Grounded on `vm/heap/new_collector.cpp`'s `Collector`: `collect` marks
//! from the root set with an explicit worklist (never recursing over the
//! object graph), then sweeps every page and large object, then recomputes
//! the next collection threshold by doubling until the live set again fits
//! under two thirds of it.

use tracing::{debug, trace};

use crate::value::HeapRef;

use super::trace::RootSet;
use super::Heap;

#[derive(Debug, Default, Clone, Copy)]
pub struct CollectionStats {
    pub objects_marked: usize,
    pub objects_reclaimed: u32,
    pub cells_reclaimed: u32,
}

/// Owns nothing but the next-collection threshold; the live worklist is
/// transient and allocated fresh per collection, matching the original's
/// `to_trace_` member being cleared at the end of every cycle.
#[derive(Debug)]
pub struct Collector {
    next_threshold: usize,
}

impl Collector {
    pub fn new(initial_threshold: usize) -> Self {
        Self {
            next_threshold: initial_threshold,
        }
    }

    pub fn next_threshold(&self) -> usize {
        self.next_threshold
    }

    /// Runs one full mark-sweep cycle over `heap`, using `roots` as the
    /// initial worklist seed.
    pub fn collect(&mut self, heap: &mut Heap, roots: &dyn RootSet) -> CollectionStats {
        let mut stats = CollectionStats::default();
        let mut pending = Vec::new();
        {
            let mut tracer = super::trace::Tracer::new(&mut pending);
            roots.trace_roots(&mut tracer);
        }

        while let Some(value) = pending.pop() {
            let Some(reference) = value.heap_ref() else { continue };
            match reference {
                HeapRef::Page { page, cell } => {
                    let Some(page) = heap.pages.get_mut(page as usize) else { continue };
                    if page.mark(cell) {
                        continue;
                    }
                    stats.objects_marked += 1;
                    let mut children = Vec::new();
                    if let Some(object) = page.get(cell) {
                        let mut tracer = super::trace::Tracer::new(&mut children);
                        object.trace(&mut tracer);
                    }
                    pending.extend(children);
                }
                HeapRef::Large(index) => {
                    let Some(Some(lob)) = heap.large_objects.get_mut(index as usize) else {
                        continue;
                    };
                    if lob.mark() {
                        continue;
                    }
                    stats.objects_marked += 1;
                    let mut children = Vec::new();
                    let mut tracer = super::trace::Tracer::new(&mut children);
                    lob.object.trace(&mut tracer);
                    pending.extend(children);
                }
            }
        }

        trace!(marked = stats.objects_marked, "mark phase complete");

        let (reclaimed, objects) = heap.sweep_all();
        stats.cells_reclaimed = reclaimed;
        stats.objects_reclaimed = objects;

        self.recompute_threshold(heap.live_cells());
        debug!(
            reclaimed_cells = stats.cells_reclaimed,
            reclaimed_objects = stats.objects_reclaimed,
            next_threshold = self.next_threshold,
            "collection complete"
        );
        stats
    }

    /// Doubles the threshold until the live set sits under two thirds of
    /// it, so the next collection isn't triggered almost immediately.
    fn recompute_threshold(&mut self, live_cells: usize) {
        while live_cells * 3 > self.next_threshold * 2 {
            self.next_threshold = self.next_threshold.saturating_mul(2).max(1);
        }
    }
}
