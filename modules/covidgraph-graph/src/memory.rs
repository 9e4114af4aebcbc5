//! In-process `GraphStore` with the same merge-by-key semantics as the Neo4j
//! adapter. Ad-hoc statements are recorded, not executed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::batch::{NodeSet, RelationshipSet};
use crate::error::Result;
use crate::store::{GraphStore, Record};
use crate::value::Properties;

/// (type, start label, start key, end label, end key)
type RelationshipKey = (String, String, String, String, String);

#[derive(Debug, Default)]
struct MemoryGraph {
    nodes: BTreeMap<String, BTreeMap<String, Properties>>,
    relationships: BTreeMap<RelationshipKey, Properties>,
    constraints: BTreeSet<(String, String)>,
    statements: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryGraph>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryGraph> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.lock().nodes.get(label).map_or(0, BTreeMap::len)
    }

    pub fn node(&self, label: &str, key: &str) -> Option<Properties> {
        self.lock().nodes.get(label)?.get(key).cloned()
    }

    pub fn node_keys(&self, label: &str) -> Vec<String> {
        self.lock()
            .nodes
            .get(label)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn relationship_count(&self, rel_type: &str) -> usize {
        self.lock()
            .relationships
            .keys()
            .filter(|(t, ..)| t == rel_type)
            .count()
    }

    /// Properties of the relationship `(start)-[rel_type]->(end)`, if present.
    pub fn relationship(&self, rel_type: &str, start: &str, end: &str) -> Option<Properties> {
        self.lock()
            .relationships
            .iter()
            .find(|((t, _, s, _, e), _)| t == rel_type && s == start && e == end)
            .map(|(_, p)| p.clone())
    }

    pub fn has_constraint(&self, label: &str, key: &str) -> bool {
        self.lock()
            .constraints
            .contains(&(label.to_string(), key.to_string()))
    }

    /// Statements passed to `run`, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn ensure_unique(&self, label: &str, key: &str) -> Result<()> {
        self.lock()
            .constraints
            .insert((label.to_string(), key.to_string()));
        Ok(())
    }

    async fn merge_nodes(&self, nodes: &NodeSet) -> Result<u64> {
        let mut graph = self.lock();
        let by_key = graph.nodes.entry(nodes.label().to_string()).or_default();
        for node in nodes.iter() {
            let props = by_key.entry(node.key.clone()).or_default();
            props.extend(node.props.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(nodes.len() as u64)
    }

    async fn merge_relationships(&self, rels: &RelationshipSet) -> Result<u64> {
        let mut graph = self.lock();
        let (start, end) = (rels.start(), rels.end());
        let mut written = 0;

        for rel in rels.iter() {
            let endpoints_exist = graph
                .nodes
                .get(&start.label)
                .is_some_and(|m| m.contains_key(&rel.start))
                && graph
                    .nodes
                    .get(&end.label)
                    .is_some_and(|m| m.contains_key(&rel.end));
            if !endpoints_exist {
                continue;
            }

            let key = (
                rels.rel_type().to_string(),
                start.label.clone(),
                rel.start.clone(),
                end.label.clone(),
                rel.end.clone(),
            );
            graph
                .relationships
                .entry(key)
                .or_default()
                .extend(rel.props.iter().map(|(k, v)| (k.clone(), v.clone())));
            written += 1;
        }
        Ok(written)
    }

    async fn run(&self, cypher: &str) -> Result<Vec<Record>> {
        self.lock().statements.push(cypher.to_string());
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Endpoint;
    use crate::value::props;

    fn countries(names: &[&str]) -> NodeSet {
        let mut set = NodeSet::new("Country", "name");
        for n in names {
            set.add(*n, Properties::new());
        }
        set
    }

    #[tokio::test]
    async fn merging_twice_does_not_duplicate_nodes() {
        let store = MemoryStore::new();
        let set = countries(&["Italy", "China"]);
        store.merge_nodes(&set).await.unwrap();
        store.merge_nodes(&set).await.unwrap();
        assert_eq!(store.node_count("Country"), 2);
    }

    #[tokio::test]
    async fn merge_updates_existing_attributes() {
        let store = MemoryStore::new();
        let mut first = NodeSet::new("Country", "name");
        first.add("Italy", props([("un_id", "380")]));
        store.merge_nodes(&first).await.unwrap();

        let mut second = NodeSet::new("Country", "name");
        second.add("Italy", props([("population_source", "wpp")]));
        store.merge_nodes(&second).await.unwrap();

        let italy = store.node("Country", "Italy").unwrap();
        assert_eq!(italy.len(), 2);
    }

    #[tokio::test]
    async fn relationships_need_both_endpoints() {
        let store = MemoryStore::new();
        store.merge_nodes(&countries(&["China"])).await.unwrap();
        let mut provinces = NodeSet::new("Province", "name");
        provinces.add("Hubei", Properties::new());
        store.merge_nodes(&provinces).await.unwrap();

        let mut rels = RelationshipSet::new(
            "PART_OF",
            Endpoint::new("Province", "name"),
            Endpoint::new("Country", "name"),
        )
        .unique();
        rels.add("Hubei", "China", props([("source", "jhu")]));
        rels.add("Ghost", "China", props([("source", "jhu")]));

        assert_eq!(store.merge_relationships(&rels).await.unwrap(), 1);
        assert_eq!(store.merge_relationships(&rels).await.unwrap(), 1);
        assert_eq!(store.relationship_count("PART_OF"), 1);
        assert!(store.relationship("PART_OF", "Hubei", "China").is_some());
    }

    #[tokio::test]
    async fn run_records_statements_in_order() {
        let store = MemoryStore::new();
        store.run("MATCH (n) RETURN n").await.unwrap();
        store.run("RETURN 1").await.unwrap();
        assert_eq!(store.statements(), vec!["MATCH (n) RETURN n", "RETURN 1"]);
    }
}
