//! Segregated free-list size classes (§3.3, §4.E.2).
//!
//! Grounded on `vm/heap/heap.cpp`'s `FreeSpace`: an exact size class per
//! cell count from 1 to [`EXACT_CLASSES`], then two classes per power of
//! two beyond that (so the worst-case internal fragmentation for a large
//! free run never exceeds 50%). Each class is a LIFO stack of free-block
//! locations; `allocate_exact` only ever pops from the class matching the
//! requested size or larger, splitting the remainder back into the free
//! lists.

use std::collections::HashMap;

use crate::value::HeapRef;

/// Exact size classes cover block sizes of 1..=31 cells.
const EXACT_CLASSES: u32 = 31;

/// Splits each octave beyond the exact classes into two sub-classes, giving
/// a tighter fit than a single "next power of two" class would.
const SUBCLASSES_PER_OCTAVE: u32 = 2;

/// Maps a cell count to the size class that should hold a free block of
/// exactly that size (used when inserting a free run back into the lists).
///
/// Beyond the exact classes, class `EXACT_CLASSES + 2*o + sub` covers an
/// octave `(EXACT_CLASSES*2^o, EXACT_CLASSES*2^(o+1)]`, split by `sub` at
/// its midpoint (`1.5x` the octave's lower bound), so any run in the octave
/// is over-allocated by at most 50%.
pub fn class_index(cells: u32) -> usize {
    debug_assert!(cells >= 1);
    if cells <= EXACT_CLASSES {
        return (cells - 1) as usize;
    }
    let mut octave = 0u32;
    while (EXACT_CLASSES << (octave + 1)) < cells {
        octave += 1;
    }
    let pow = EXACT_CLASSES << octave;
    let midpoint = pow + (pow + 1) / 2;
    let sub = if cells <= midpoint { 0 } else { 1 };
    (EXACT_CLASSES + SUBCLASSES_PER_OCTAVE * octave + sub) as usize
}

/// The minimum cell count guaranteed to be servable by class `index`; the
/// invariant the allocator depends on is `class_size(class_index(n)) >= n`.
pub fn class_size(index: usize) -> u32 {
    let index = index as u32;
    if index < EXACT_CLASSES {
        return index + 1;
    }
    let beyond = index - EXACT_CLASSES;
    let octave = beyond / SUBCLASSES_PER_OCTAVE;
    let sub = beyond % SUBCLASSES_PER_OCTAVE;
    let pow = EXACT_CLASSES << octave;
    if sub == 0 {
        pow + (pow + 1) / 2
    } else {
        pow * 2
    }
}

/// A free run: `cells` consecutive free cells starting at `location`.
#[derive(Debug, Clone, Copy)]
pub struct FreeRun {
    pub location: HeapRef,
    pub cells: u32,
}

/// Segregated free lists. Holds only page-resident free runs; large-object
/// chunks are never split or reused, they are freed and re-allocated whole.
#[derive(Debug, Default)]
pub struct FreeSpace {
    classes: HashMap<usize, Vec<FreeRun>>,
    free_cells: usize,
}

impl FreeSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn free_cells(&self) -> usize {
        self.free_cells
    }

    /// Inserts a free run, filing it under the largest class it can fully
    /// satisfy (matches `FreeSpace::insert_free` in the original).
    pub fn insert_free(&mut self, location: HeapRef, cells: u32) {
        if cells == 0 {
            return;
        }
        self.free_cells += cells as usize;
        let class = class_index(cells);
        self.classes.entry(class).or_default().push(FreeRun { location, cells });
    }

    /// Pops a run from the exact class, if any are available without
    /// searching larger classes. Used as the fast path before falling back
    /// to `allocate_first_fit`.
    ///
    /// Beyond [`EXACT_CLASSES`] a class is shared by a range of run sizes
    /// (`insert_free` files by round-up), so the popped run isn't
    /// necessarily big enough for `cells` -- check before handing it out,
    /// pushing it back and reporting no match otherwise so the caller falls
    /// through to `allocate_first_fit`.
    pub fn allocate_exact(&mut self, cells: u32) -> Option<FreeRun> {
        let class = class_index(cells);
        let bucket = self.classes.get_mut(&class)?;
        let run = bucket.pop()?;
        if run.cells < cells {
            bucket.push(run);
            return None;
        }
        self.free_cells -= run.cells as usize;
        if run.cells > cells {
            if let HeapRef::Page { page, cell } = run.location {
                let leftover_cells = run.cells - cells;
                let leftover_start = cell + cells;
                self.insert_free(HeapRef::Page { page, cell: leftover_start }, leftover_cells);
            }
            return Some(FreeRun { location: run.location, cells });
        }
        Some(run)
    }

    /// First-fit search across size classes large enough to satisfy
    /// `cells`, splitting the remainder back into the free lists.
    pub fn allocate_first_fit(&mut self, cells: u32) -> Option<FreeRun> {
        let start_class = class_index(cells);
        let mut classes: Vec<usize> = self.classes.keys().copied().filter(|&c| c >= start_class).collect();
        classes.sort_unstable();
        for class in classes {
            if let Some(bucket) = self.classes.get_mut(&class) {
                if let Some(pos) = bucket.iter().position(|run| run.cells >= cells) {
                    let run = bucket.swap_remove(pos);
                    self.free_cells -= run.cells as usize;
                    if run.cells > cells {
                        if let HeapRef::Page { page, cell } = run.location {
                            let leftover_cells = run.cells - cells;
                            let leftover_start = cell + cells;
                            self.insert_free(
                                HeapRef::Page {
                                    page,
                                    cell: leftover_start,
                                },
                                leftover_cells,
                            );
                        }
                    }
                    return Some(FreeRun {
                        location: run.location,
                        cells,
                    });
                }
            }
        }
        None
    }

    /// Drops every free run, e.g. when a page is about to be fully rebuilt
    /// by a sweep.
    pub fn clear(&mut self) {
        self.classes.clear();
        self.free_cells = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_classes_round_trip() {
        for cells in 1..=EXACT_CLASSES {
            assert_eq!(class_size(class_index(cells)), cells);
        }
    }

    #[test]
    fn every_class_satisfies_its_own_size() {
        for index in 0..80 {
            let size = class_size(index);
            assert!(class_index(size) <= index, "class {index} advertises size {size} it can't find itself");
        }
    }

    #[test]
    fn allocate_exact_then_first_fit() {
        let mut free = FreeSpace::new();
        free.insert_free(HeapRef::Page { page: 0, cell: 10 }, 4);
        let run = free.allocate_exact(4).expect("exact match");
        assert_eq!(run.cells, 4);
        assert_eq!(free.free_cells(), 0);

        free.insert_free(HeapRef::Page { page: 0, cell: 0 }, 20);
        let run = free.allocate_first_fit(5).expect("first fit");
        assert_eq!(run.cells, 5);
        // Leftover 15 cells should have been reinserted.
        assert_eq!(free.free_cells(), 15);
    }

    #[test]
    fn allocate_exact_refuses_an_undersized_run_sharing_its_class() {
        // 50 and 62 both round up to class 32, per `class_size`/`class_index`.
        assert_eq!(class_index(50), class_index(62));
        let mut free = FreeSpace::new();
        free.insert_free(HeapRef::Page { page: 0, cell: 0 }, 50);

        // The only run in this class is too small for a 62-cell request.
        assert!(free.allocate_exact(62).is_none());
        assert_eq!(free.free_cells(), 50, "the undersized run must stay in the free list, not be consumed");

        // It's still there for a request it actually satisfies.
        let run = free.allocate_exact(50).expect("exact match");
        assert_eq!(run.cells, 50);
    }
}
