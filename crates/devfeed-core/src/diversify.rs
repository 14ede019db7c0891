//! Diversification pass: limits runs of consecutive items sharing a
//! primary tag.
//!
//! Greedy with a single lookahead. The input order (usually score order)
//! is preserved except where placing the pool front would create a third
//! consecutive item with the same primary tag; in that case the first
//! pool item with a different primary tag is pulled forward. When the
//! remaining pool is entirely one tag the run is left as is.

use crate::models::PrimaryTag;

/// Reorder a score-sorted list so no more than two consecutive items
/// share a primary tag, where the pool allows it.
///
/// Items without tags all share the same (absent) primary tag.
pub fn diversify<T: PrimaryTag>(items: Vec<T>) -> Vec<T> {
    if items.len() <= 2 {
        return items;
    }

    let mut output: Vec<T> = Vec::with_capacity(items.len());
    let mut pool: Vec<T> = items;

    while !pool.is_empty() {
        let mut pick = 0;

        if let [.., second_last, last] = output.as_slice() {
            let last_tag = last.primary_tag();
            if second_last.primary_tag() == last_tag {
                if let Some(idx) = pool.iter().position(|p| p.primary_tag() != last_tag) {
                    pick = idx;
                }
            }
        }

        output.push(pool.remove(pick));
    }

    output
}

/// Length of the longest run of consecutive items sharing a primary tag.
pub fn longest_run<T: PrimaryTag>(items: &[T]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev: Option<Option<&str>> = None;
    for item in items {
        let tag = item.primary_tag();
        if prev == Some(tag) {
            current += 1;
        } else {
            current = 1;
        }
        prev = Some(tag);
        longest = longest.max(current);
    }
    longest
}
