use std::collections::HashSet;

use super::task::Task;

/// Combine template and live tasks of one category into the display list.
///
/// Template tasks whose name exactly matches a live task are dropped, the
/// rest are followed by the live tasks, and the whole list is stably sorted
/// by order index with missing indices last.
pub fn merge(template: &[Task], live: &[Task]) -> Vec<Task> {
    let live_names: HashSet<&str> = live.iter().map(|t| t.name.as_str()).collect();

    let mut merged: Vec<Task> = template
        .iter()
        .filter(|t| !live_names.contains(t.name.as_str()))
        .chain(live.iter())
        .cloned()
        .collect();

    // `sort_by_key` is stable, so equal indices keep input order.
    merged.sort_by_key(|t| match t.order_index {
        Some(idx) => (0u8, idx),
        None => (1u8, 0),
    });
    merged
}
