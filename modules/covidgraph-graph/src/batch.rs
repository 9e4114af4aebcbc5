//! Deduplicating node and relationship accumulators.
//!
//! A pass over one file (or one reference dataset) collects its entities into
//! a `NodeSet` per label and a `RelationshipSet` per relationship type. Adding
//! an existing key merges attributes onto the entry already held, so a set
//! never contains two entries for one key. Sets are plain owned collections;
//! iterating them is finite and repeatable.

use std::collections::HashMap;

use serde::Serialize;

use crate::value::Properties;

/// One node in a `NodeSet`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEntry {
    pub key: String,
    pub props: Properties,
}

/// Nodes of one label, unique by one key attribute.
#[derive(Debug, Clone)]
pub struct NodeSet {
    label: String,
    key_attr: String,
    nodes: Vec<NodeEntry>,
    index: HashMap<String, usize>,
}

impl NodeSet {
    pub fn new(label: impl Into<String>, key_attr: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key_attr: key_attr.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key_attr(&self) -> &str {
        &self.key_attr
    }

    /// Add a node, or merge `props` into the node already held for `key`.
    ///
    /// Non-null values overwrite; null values never erase a known attribute.
    /// A property named like the key attribute is ignored. Returns `true` if
    /// the key was new.
    pub fn add(&mut self, key: impl Into<String>, props: Properties) -> bool {
        let key = key.into();
        if let Some(&i) = self.index.get(&key) {
            merge_props(&mut self.nodes[i].props, props, &self.key_attr);
            return false;
        }

        let mut entry = NodeEntry {
            key: key.clone(),
            props: Properties::new(),
        };
        merge_props(&mut entry.props, props, &self.key_attr);
        self.index.insert(key, self.nodes.len());
        self.nodes.push(entry);
        true
    }

    pub fn get(&self, key: &str) -> Option<&NodeEntry> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.iter()
    }

    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[NodeEntry]> {
        self.nodes.chunks(size.max(1))
    }
}

/// One relationship in a `RelationshipSet`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipEntry {
    pub start: String,
    pub end: String,
    pub props: Properties,
}

/// Which nodes a relationship set connects: label plus key attribute on each
/// side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub label: String,
    pub key_attr: String,
}

impl Endpoint {
    pub fn new(label: impl Into<String>, key_attr: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key_attr: key_attr.into(),
        }
    }
}

/// Relationships of one type between two labels.
///
/// A `unique` set holds at most one relationship per (start, end) pair; adding
/// the pair again merges the payload. A non-unique set keeps every add.
#[derive(Debug, Clone)]
pub struct RelationshipSet {
    rel_type: String,
    start: Endpoint,
    end: Endpoint,
    unique: bool,
    rels: Vec<RelationshipEntry>,
    index: HashMap<(String, String), usize>,
}

impl RelationshipSet {
    pub fn new(rel_type: impl Into<String>, start: Endpoint, end: Endpoint) -> Self {
        Self {
            rel_type: rel_type.into(),
            start,
            end,
            unique: false,
            rels: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Keep at most one relationship per (start, end) pair.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn rel_type(&self) -> &str {
        &self.rel_type
    }

    pub fn start(&self) -> &Endpoint {
        &self.start
    }

    pub fn end(&self) -> &Endpoint {
        &self.end
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Record a relationship from the node keyed `start` to the node keyed
    /// `end`. Returns `false` if a unique set already held the pair.
    pub fn add(&mut self, start: impl Into<String>, end: impl Into<String>, props: Properties) -> bool {
        let (start, end) = (start.into(), end.into());

        if self.unique {
            let pair = (start, end);
            if let Some(&i) = self.index.get(&pair) {
                merge_props(&mut self.rels[i].props, props, "");
                return false;
            }
            self.index.insert(pair.clone(), self.rels.len());
            let (start, end) = pair;
            self.push(start, end, props);
            return true;
        }

        self.push(start, end, props);
        true
    }

    fn push(&mut self, start: String, end: String, props: Properties) {
        let mut entry = RelationshipEntry {
            start,
            end,
            props: Properties::new(),
        };
        merge_props(&mut entry.props, props, "");
        self.rels.push(entry);
    }

    pub fn len(&self) -> usize {
        self.rels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationshipEntry> {
        self.rels.iter()
    }

    pub fn chunks(&self, size: usize) -> impl Iterator<Item = &[RelationshipEntry]> {
        self.rels.chunks(size.max(1))
    }
}

fn merge_props(target: &mut Properties, incoming: Properties, key_attr: &str) {
    for (name, value) in incoming {
        if value.is_null() || name == key_attr {
            continue;
        }
        target.insert(name, value);
    }
}

/// Counts for one flushed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    pub nodes: u64,
    pub relationships: u64,
}

impl std::ops::AddAssign for FlushStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.relationships += other.relationships;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{props, PropertyValue};

    fn province_set() -> NodeSet {
        NodeSet::new("Province", "name")
    }

    #[test]
    fn adding_same_key_twice_keeps_one_node() {
        let mut set = province_set();
        assert!(set.add("Hubei", Properties::new()));
        assert!(!set.add("Hubei", Properties::new()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn merge_unions_attributes() {
        let mut set = province_set();
        set.add("Hubei", props([("latitude", 30.97)]));
        set.add("Hubei", props([("longitude", 112.27)]));

        let node = set.get("Hubei").unwrap();
        assert_eq!(node.props["latitude"], PropertyValue::Float(30.97));
        assert_eq!(node.props["longitude"], PropertyValue::Float(112.27));
    }

    #[test]
    fn newer_value_overwrites_and_null_does_not_erase() {
        let mut set = province_set();
        set.add("Hubei", props([("latitude", 30.0)]));
        set.add("Hubei", props([("latitude", 31.0)]));
        set.add("Hubei", props([("latitude", PropertyValue::Null)]));

        assert_eq!(set.get("Hubei").unwrap().props["latitude"], PropertyValue::Float(31.0));
    }

    #[test]
    fn key_attribute_in_props_is_ignored() {
        let mut set = province_set();
        set.add("Hubei", props([("name", "Somewhere else")]));
        assert!(set.get("Hubei").unwrap().props.is_empty());
    }

    #[test]
    fn iteration_is_insertion_ordered_and_repeatable() {
        let mut set = province_set();
        for name in ["b", "a", "c", "a"] {
            set.add(name, Properties::new());
        }
        let first: Vec<_> = set.iter().map(|n| n.key.as_str()).collect();
        let second: Vec<_> = set.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(first, vec!["b", "a", "c"]);
        assert_eq!(first, second);
    }

    #[test]
    fn chunks_cover_every_entry() {
        let mut set = province_set();
        for i in 0..7 {
            set.add(format!("p{i}"), Properties::new());
        }
        let sizes: Vec<_> = set.chunks(3).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    fn part_of() -> RelationshipSet {
        RelationshipSet::new(
            "PART_OF",
            Endpoint::new("Province", "name"),
            Endpoint::new("Country", "name"),
        )
    }

    #[test]
    fn unique_relationship_set_keeps_one_edge_per_pair() {
        let mut rels = part_of().unique();
        assert!(rels.add("Hubei", "China", props([("source", "jhu")])));
        assert!(!rels.add("Hubei", "China", props([("source", "jhu")])));
        assert!(rels.add("Hubei", "Mainland China", props([("source", "jhu")])));
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn non_unique_relationship_set_keeps_every_edge() {
        let mut rels = part_of();
        rels.add("Hubei", "China", Properties::new());
        rels.add("Hubei", "China", Properties::new());
        assert_eq!(rels.len(), 2);
        assert!(!rels.is_unique());
    }

    #[test]
    fn flush_stats_accumulate() {
        let mut total = FlushStats::default();
        total += FlushStats { nodes: 3, relationships: 2 };
        total += FlushStats { nodes: 1, relationships: 1 };
        assert_eq!(total, FlushStats { nodes: 4, relationships: 3 });
    }
}
