//! Scenario 6 (spec §8): 10,000 short-lived strings, allocated with no
//! other root keeping any of them alive, are fully reclaimed by a forced
//! collection.

mod common;

use tendril_vm::heap::CELL_SIZE;
use tendril_vm::objects::HeapString;

#[test]
fn gc_reclaims_all_short_lived_strings_after_a_forced_collection() {
    let mut ctx = common::fresh_context();
    let baseline = ctx.heap.allocated_bytes();

    for i in 0..10_000 {
        let text = format!("short-lived-{i}");
        let interned = ctx.strings.insert(&text).unwrap();
        // The returned `Value` is dropped immediately; nothing roots it.
        ctx.allocate(HeapString(interned), false).unwrap();
    }

    ctx.collect();

    let page_bytes = ctx.heap.config().page_cells as usize * CELL_SIZE;
    let after = ctx.heap.allocated_bytes();
    assert!(
        after <= baseline + page_bytes,
        "expected allocated_bytes ({after}) to return within one page of the baseline ({baseline}), page = {page_bytes}"
    );
}

