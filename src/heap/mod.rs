//! The managed heap: paged mark-sweep allocation with segregated free lists
//! and large-object chunks (§3.3, §4.E).
//!
//! See the module docs on [`crate::value::Value`] for why heap references
//! are slot indices rather than raw pointers here. Everything else follows
//! `vm/heap/heap.cpp` and `vm/heap/new_collector.cpp` closely: allocation
//! tries the free lists first, triggers a collection once the configured
//! threshold is crossed, and only grows the page table when collection
//! alone can't satisfy the request.

mod bitset;
mod collector;
mod free_space;
mod large_object;
mod page;
mod trace;

pub use collector::{CollectionStats, Collector};
pub use free_space::{class_index, class_size, FreeSpace};
pub use large_object::LargeObject;
pub use page::Page;
pub use trace::{HeapObject, RootSet, Trace, Tracer};

use crate::error::VmError;
use crate::value::{HeapRef, Value, ValueType};

/// Cells are two machine words, matching `tagged_ptr.hpp`'s choice that the
/// cell alignment leave the pointer's low 4 bits free on a 64-bit target.
pub const CELL_SIZE: usize = 2 * std::mem::size_of::<usize>();

pub fn cell_align() -> usize {
    CELL_SIZE
}

pub fn cells_for_bytes(bytes: usize) -> u32 {
    ((bytes + CELL_SIZE - 1) / CELL_SIZE) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Cells per page. `chunks.hpp` derives this from a target page size in
    /// bytes; here it's configured directly since there's no raw OS page to
    /// size against.
    pub page_cells: u32,
    /// Bytes of live data allowed before the first automatic collection.
    pub initial_threshold_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            page_cells: 4096,
            initial_threshold_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStats {
    pub pages_allocated: u32,
    pub large_objects_allocated: u32,
    pub collections_run: u32,
}

pub struct Heap {
    pages: Vec<Page>,
    large_objects: Vec<Option<LargeObject>>,
    free_space: FreeSpace,
    collector: Collector,
    config: HeapConfig,
    stats: HeapStats,
}

impl Heap {
    pub fn new(config: HeapConfig) -> Self {
        let initial_threshold = cells_for_bytes(config.initial_threshold_bytes) as usize;
        Self {
            pages: Vec::new(),
            large_objects: Vec::new(),
            free_space: FreeSpace::new(),
            collector: Collector::new(initial_threshold.max(1)),
            config,
            stats: HeapStats::default(),
        }
    }

    pub fn config(&self) -> HeapConfig {
        self.config
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Total cells currently holding live (or not-yet-swept) data across all
    /// pages, plus one cell per large object as a rough equivalent.
    pub fn live_cells(&self) -> usize {
        let page_cells: usize = self.pages.iter().map(|p| p.allocated_cells() as usize).sum();
        let lob_cells: usize = self
            .large_objects
            .iter()
            .flatten()
            .map(|l| l.object.cell_count(CELL_SIZE) as usize + 1)
            .sum();
        page_cells + lob_cells
    }

    /// Total bytes currently allocated, for diagnostics and the §8 GC-reclaim
    /// test (`allocated_bytes` returning to baseline after a forced sweep).
    pub fn allocated_bytes(&self) -> usize {
        self.live_cells() * CELL_SIZE
    }

    /// Allocates `object`, collecting first if the configured threshold
    /// would otherwise be crossed, and growing the page table if neither
    /// the free lists nor a collection can make room.
    pub fn allocate<T: HeapObject + 'static>(
        &mut self,
        object: T,
        has_finalizer: bool,
        roots: &dyn RootSet,
    ) -> Result<Value, VmError> {
        let cells = object.cell_count(CELL_SIZE) + 1;

        if large_object::is_large(cells, self.config.page_cells) {
            return Ok(self.allocate_large(object, has_finalizer));
        }

        if self.live_cells() + cells as usize > self.collector.next_threshold() {
            self.collect(roots);
        }

        if let Some(run) = self.free_space.allocate_exact(cells).or_else(|| self.free_space.allocate_first_fit(cells)) {
            return Ok(self.place(run.location, cells, Box::new(object), has_finalizer));
        }

        self.add_page()?;
        let page_id = (self.pages.len() - 1) as u32;
        self.free_space.insert_free(HeapRef::Page { page: page_id, cell: 0 }, self.config.page_cells);
        let run = self
            .free_space
            .allocate_first_fit(cells)
            .expect("a freshly added page can satisfy any in-page-sized request");
        Ok(self.place(run.location, cells, Box::new(object), has_finalizer))
    }

    fn place(&mut self, location: HeapRef, cells: u32, object: Box<dyn HeapObject>, has_finalizer: bool) -> Value {
        match location {
            HeapRef::Page { page, cell } => {
                self.pages[page as usize].place(cell, cells - 1, object, has_finalizer);
                Value::from_page_cell(page, cell)
            }
            HeapRef::Large(_) => unreachable!("large objects never come from the free list"),
        }
    }

    fn allocate_large<T: HeapObject + 'static>(&mut self, object: T, has_finalizer: bool) -> Value {
        let index = self.large_objects.len() as u32;
        self.large_objects.push(Some(LargeObject::new(Box::new(object), has_finalizer)));
        self.stats.large_objects_allocated += 1;
        Value::from_large_object(index)
    }

    fn add_page(&mut self) -> Result<(), VmError> {
        let id = self.pages.len() as u32;
        self.pages.push(Page::new(id, self.config.page_cells));
        self.stats.pages_allocated += 1;
        tracing::debug!(page = id, cells = self.config.page_cells, "added heap page");
        Ok(())
    }

    pub fn collect(&mut self, roots: &dyn RootSet) -> CollectionStats {
        self.stats.collections_run += 1;
        let mut collector = std::mem::replace(&mut self.collector, Collector::new(1));
        let stats = collector.collect(self, roots);
        self.collector = collector;
        stats
    }

    /// Sweeps every page and large object, returning total reclaimed cells
    /// and swept object count. Called by [`Collector::collect`]; also handy
    /// directly for tests that want to sweep without a full mark phase.
    pub(crate) fn sweep_all(&mut self) -> (u32, u32) {
        let mut reclaimed = 0;
        let mut objects = 0;

        self.free_space.clear();
        let page_ids: Vec<u32> = self.pages.iter().map(|p| p.id).collect();
        for page_id in page_ids {
            let stats = self.pages[page_id as usize].sweep(|_, _| {});
            reclaimed += stats.reclaimed_cells;
            objects += stats.objects_swept;
            drop(stats.finalized); // finalizer invocation hooks in at the interpreter layer
            self.rebuild_free_list_for(page_id);
        }

        for slot in &mut self.large_objects {
            if let Some(lob) = slot {
                if lob.is_marked() {
                    lob.reset_mark();
                } else {
                    objects += 1;
                    *slot = None;
                }
            }
        }

        (reclaimed, objects)
    }

    fn rebuild_free_list_for(&mut self, page_id: u32) {
        let page = &self.pages[page_id as usize];
        let mut cell = 0u32;
        while cell < page.cells_total() {
            if page.is_block_start(cell) {
                let object = page.get(cell).expect("block start always has an object");
                cell += object.cell_count(CELL_SIZE) + 1;
            } else {
                let run_start = cell;
                while cell < page.cells_total() && !page.is_block_start(cell) {
                    cell += 1;
                }
                self.free_space
                    .insert_free(HeapRef::Page { page: page_id, cell: run_start }, cell - run_start);
            }
        }
    }

    pub fn value_type(&self, value: Value) -> ValueType {
        match value.heap_ref().expect("value_type is only meaningful for heap references") {
            HeapRef::Page { page, cell } => self.pages[page as usize].get(cell).expect("dangling heap reference").value_type(),
            HeapRef::Large(index) => self.large_objects[index as usize]
                .as_ref()
                .expect("dangling large-object reference")
                .object
                .value_type(),
        }
    }

    pub fn get<T: 'static>(&self, value: Value) -> Option<&T> {
        let object: &dyn HeapObject = match value.heap_ref()? {
            HeapRef::Page { page, cell } => self.pages.get(page as usize)?.get(cell)?,
            HeapRef::Large(index) => self.large_objects.get(index as usize)?.as_ref()?.object.as_ref(),
        };
        object.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self, value: Value) -> Option<&mut T> {
        let object: &mut Box<dyn HeapObject> = match value.heap_ref()? {
            HeapRef::Page { page, cell } => self.pages.get_mut(page as usize)?.get_mut(cell)?,
            HeapRef::Large(index) => self.large_objects.get_mut(index as usize)?.as_mut()?.object_mut(),
        };
        object.as_any_mut().downcast_mut::<T>()
    }
}

impl LargeObject {
    fn object_mut(&mut self) -> &mut Box<dyn HeapObject> {
        &mut self.object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    #[derive(Debug)]
    struct TestString(String);

    impl Trace for TestString {
        fn trace(&self, _tracer: &mut Tracer<'_>) {}
    }

    impl HeapObject for TestString {
        fn value_type(&self) -> ValueType {
            ValueType::String
        }

        fn cell_count(&self, cell_size: usize) -> u32 {
            cells_for_bytes(self.0.len()).max(cells_for_bytes(cell_size))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct NoRoots;
    impl RootSet for NoRoots {
        fn trace_roots(&self, _tracer: &mut Tracer<'_>) {}
    }

    #[test]
    fn allocate_and_read_back() {
        let mut heap = Heap::new(HeapConfig::default());
        let value = heap.allocate(TestString("hi".to_string()), false, &NoRoots).unwrap();
        assert_eq!(heap.value_type(value), ValueType::String);
        assert_eq!(heap.get::<TestString>(value).unwrap().0, "hi");
    }

    #[test]
    fn unreachable_objects_are_reclaimed_on_collect() {
        let mut heap = Heap::new(HeapConfig::default());
        let _kept = heap.allocate(TestString("kept".to_string()), false, &NoRoots).unwrap();
        let _dropped = heap.allocate(TestString("dropped".to_string()), false, &NoRoots).unwrap();

        struct OneRoot(Value);
        impl RootSet for OneRoot {
            fn trace_roots(&self, tracer: &mut Tracer<'_>) {
                tracer.visit(self.0);
            }
        }

        let baseline_pages = heap.pages.len();
        heap.collect(&OneRoot(_kept));
        assert_eq!(heap.pages.len(), baseline_pages);
        assert!(heap.get::<TestString>(_kept).is_some());
    }

    #[test]
    fn large_allocations_bypass_pages() {
        let mut heap = Heap::new(HeapConfig {
            page_cells: 16,
            ..HeapConfig::default()
        });
        #[derive(Debug)]
        struct Big([u8; 256]);
        impl Trace for Big {
            fn trace(&self, _tracer: &mut Tracer<'_>) {}
        }
        impl HeapObject for Big {
            fn value_type(&self) -> ValueType {
                ValueType::String
            }
            fn cell_count(&self, cell_size: usize) -> u32 {
                cells_for_bytes(self.0.len()).max(cells_for_bytes(cell_size))
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
        let value = heap.allocate(Big([0; 256]), false, &NoRoots).unwrap();
        assert!(matches!(value.heap_ref(), Some(HeapRef::Large(_))));
    }
}
