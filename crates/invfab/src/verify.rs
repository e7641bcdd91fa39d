//! Post-run verification: every successfully inserted id must be found by
//! a fresh scan of its lists, and every scanned block must be ordered.

use crate::block::layout::is_version_slot;
use crate::catalog::Catalog;
use crate::constants::{DYNAMIC_FOOTER_WORDS, TOMBSTONE};
use crate::query::{Query, QueryType};
use crate::worker::Worker;

/// Scans one block image for `id`; panics if the payload is unordered.
fn verify_block(words: &[u32], id: u32) -> bool {
    let entries = words.len() - DYNAMIC_FOOTER_WORDS;
    let mut previous = 0u32;

    for (idx, &entry) in words.iter().enumerate().take(entries) {
        if is_version_slot(idx) {
            continue;
        }
        if entry == TOMBSTONE {
            break;
        }
        assert!(previous < entry, "unordered block: {previous} before {entry}");
        if entry == id {
            return true;
        }
        previous = entry;
    }

    false
}

/// Walks every insert query's lists and asserts the inserted id is there.
pub fn verify_inserts(worker: &mut Worker, queries: &[Query], catalog: &Catalog) {
    let mut verified = 0u64;

    for query in queries {
        if query.kind != QueryType::Insert {
            continue;
        }
        for &key in &query.keys {
            let mut ptr = catalog.get(key);
            let mut found = false;

            loop {
                worker.read_block(0, 0, ptr);
                worker.wait_outstanding();

                let slot = worker.read_buffer.get(0, 0);
                found |= verify_block(&slot.data, query.update_id);
                let next = slot.forward_ptr();

                if found || next.is_null() {
                    break;
                }
                ptr = next;
            }

            assert!(
                found,
                "verification failed: id {} missing from list {key}",
                query.update_id
            );
            verified += 1;
        }
    }

    log::info!("verified {verified} insertions");
}
