//! Per-document consolidation of extracted records
//!
//! A document is extracted chunk by chunk, so the same entity name or
//! relationship key can come back several times. An artifact holds one
//! record per name and one per `(src, tgt)` key:
//!
//! - entity type: the most frequent one, earliest on ties
//! - descriptions and keywords: distinct values, sorted, `<SEP>`-joined
//! - source ids: distinct values in first-seen order, `<SEP>`-joined
//! - relationship weight: the sum over all mentions

use crate::graph::{EntityRecord, RelationshipRecord, GRAPH_FIELD_SEP};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

fn sorted_distinct<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values
        .filter(|v| !v.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(GRAPH_FIELD_SEP)
}

fn first_seen_distinct<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut out: Vec<&str> = Vec::new();
    for value in values.filter(|v| !v.is_empty()) {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out.join(GRAPH_FIELD_SEP)
}

fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }
    // max_by_key keeps the last maximum; scan reversed to keep the first.
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, n)| *n)
        .map(|(v, _)| v.to_string())
        .unwrap_or_default()
}

/// Group records by `key`, keeping groups in first-seen order.
fn group_by<T, K: Hash + Eq>(records: Vec<T>, key: impl Fn(&T) -> K) -> Vec<Vec<T>> {
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for record in records {
        let k = key(&record);
        match index.get(&k) {
            Some(&i) => groups[i].push(record),
            None => {
                index.insert(k, groups.len());
                groups.push(vec![record]);
            }
        }
    }
    groups
}

pub(crate) fn consolidate_entities(entities: Vec<EntityRecord>) -> Vec<EntityRecord> {
    group_by(entities, |e| e.name.clone())
        .into_iter()
        .filter_map(|mut group| {
            if group.len() == 1 {
                return group.pop();
            }
            Some(EntityRecord::new(
                group[0].name.clone(),
                most_frequent(group.iter().map(|e| e.entity_type.as_str())),
                sorted_distinct(group.iter().map(|e| e.description.as_str())),
                first_seen_distinct(group.iter().map(|e| e.source_id.as_str())),
            ))
        })
        .collect()
}

pub(crate) fn consolidate_relationships(relationships: Vec<RelationshipRecord>) -> Vec<RelationshipRecord> {
    group_by(relationships, RelationshipRecord::key)
        .into_iter()
        .filter_map(|mut group| {
            if group.len() == 1 {
                return group.pop();
            }
            Some(RelationshipRecord::new(
                group[0].src_id.clone(),
                group[0].tgt_id.clone(),
                sorted_distinct(group.iter().map(|r| r.description.as_str())),
                sorted_distinct(group.iter().map(|r| r.keywords.as_str())),
                group.iter().map(|r| r.weight).sum(),
                first_seen_distinct(group.iter().map(|r| r.source_id.as_str())),
            ))
        })
        .collect()
}
