//! Parent-first ordering for hierarchical uploads

use std::collections::HashMap;

use crate::models::SyncRecord;

/// Order upload candidates so every parent present in the batch precedes its
/// children.
///
/// Walks each unvisited candidate's ancestor chain and emits it root-first.
/// Candidates are marked visited before their parent is examined, so a
/// `parent_key` cycle is cut at the record where the walk entered it.
/// Every candidate is emitted exactly once; relative order is otherwise kept.
pub fn sort_for_upload(candidates: Vec<SyncRecord>) -> Vec<SyncRecord> {
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(candidates.len());
    for (index, record) in candidates.iter().enumerate() {
        position.entry(record.key.as_str()).or_insert(index);
    }

    let mut visited = vec![false; candidates.len()];
    let mut order: Vec<usize> = Vec::with_capacity(candidates.len());
    let mut chain: Vec<usize> = Vec::new();

    for start in 0..candidates.len() {
        if visited[start] {
            continue;
        }

        chain.clear();
        let mut current = start;
        loop {
            visited[current] = true;
            chain.push(current);

            let parent = candidates[current]
                .parent_key
                .as_ref()
                .and_then(|parent| position.get(parent.as_str()).copied());
            match parent {
                Some(parent) if !visited[parent] => current = parent,
                _ => break,
            }
        }

        order.extend(chain.iter().rev().copied());
    }

    let mut slots: Vec<Option<SyncRecord>> = candidates.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use pretty_assertions::assert_eq;

    fn node(key: &str, parent: Option<&str>) -> SyncRecord {
        let record = SyncRecord::new(key, Timestamp::from_millis(1));
        match parent {
            Some(parent) => record.with_parent(parent),
            None => record,
        }
    }

    fn keys(records: &[SyncRecord]) -> Vec<&str> {
        records.iter().map(|record| record.key.as_str()).collect()
    }

    fn assert_parents_first(sorted: &[SyncRecord]) {
        let index: HashMap<&str, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, record)| (record.key.as_str(), i))
            .collect();
        for (i, record) in sorted.iter().enumerate() {
            if let Some(parent) = record.parent_key.as_ref().and_then(|p| index.get(p.as_str())) {
                assert!(*parent < i, "{} emitted before its parent", record.key);
            }
        }
    }

    #[test]
    fn parent_moves_before_child() {
        let sorted = sort_for_upload(vec![node("C", Some("P")), node("P", None)]);
        assert_eq!(keys(&sorted), vec!["P", "C"]);
    }

    #[test]
    fn deep_chain_in_reverse_order() {
        let sorted = sort_for_upload(vec![
            node("d", Some("c")),
            node("c", Some("b")),
            node("b", Some("a")),
            node("a", None),
        ]);
        assert_eq!(keys(&sorted), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn forest_keeps_every_parent_first() {
        let sorted = sort_for_upload(vec![
            node("x2", Some("x1")),
            node("y1", None),
            node("x1", Some("root")),
            node("y2", Some("y1")),
            node("root", None),
            node("x3", Some("x1")),
        ]);
        assert_eq!(sorted.len(), 6);
        assert_parents_first(&sorted);
    }

    #[test]
    fn parent_outside_batch_is_emitted_immediately() {
        let sorted = sort_for_upload(vec![node("child", Some("synced")), node("other", None)]);
        assert_eq!(keys(&sorted), vec!["child", "other"]);
    }

    #[test]
    fn two_cycle_terminates_with_each_record_once() {
        let sorted = sort_for_upload(vec![node("A", Some("B")), node("B", Some("A"))]);
        assert_eq!(keys(&sorted), vec!["B", "A"]);
    }

    #[test]
    fn longer_cycle_with_tail_terminates() {
        let sorted = sort_for_upload(vec![
            node("tail", Some("a")),
            node("a", Some("b")),
            node("b", Some("c")),
            node("c", Some("a")),
        ]);
        let mut emitted = keys(&sorted);
        emitted.sort_unstable();
        assert_eq!(emitted, vec!["a", "b", "c", "tail"]);
    }

    #[test]
    fn self_parent_is_emitted_once() {
        let sorted = sort_for_upload(vec![node("loop", Some("loop"))]);
        assert_eq!(keys(&sorted), vec!["loop"]);
    }

    #[test]
    fn empty_batch() {
        assert!(sort_for_upload(Vec::new()).is_empty());
    }
}
