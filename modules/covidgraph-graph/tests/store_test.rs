//! Integration tests for the Neo4j store adapter.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p covidgraph-graph --features test-utils --test store_test

#![cfg(feature = "test-utils")]

use covidgraph_graph::{
    migrate::migrate, props, Endpoint, GraphStore, Neo4jStore, NodeSet, Properties, RelationshipSet,
};

async fn count(store: &Neo4jStore, cypher: &str) -> i64 {
    let rows = store.run(cypher).await.expect("query failed");
    rows.first().and_then(|r| r.get_i64("n")).unwrap_or_default()
}

fn province_batch() -> (NodeSet, NodeSet, RelationshipSet) {
    let mut countries = NodeSet::new("Country", "name");
    countries.add("China", Properties::new());

    let mut provinces = NodeSet::new("Province", "name");
    provinces.add("Hubei", props([("latitude", 30.97), ("longitude", 112.27)]));
    provinces.add("Hunan", Properties::new());

    let mut part_of = RelationshipSet::new(
        "PART_OF",
        Endpoint::new("Province", "name"),
        Endpoint::new("Country", "name"),
    )
    .unique();
    part_of.add("Hubei", "China", props([("source", "jhu")]));
    part_of.add("Hunan", "China", props([("source", "jhu")]));

    (countries, provinces, part_of)
}

#[tokio::test]
async fn merging_the_same_batch_twice_is_a_noop() {
    let (_c, store) = covidgraph_graph::testutil::neo4j_store().await;
    let (countries, provinces, part_of) = province_batch();

    for _ in 0..2 {
        store.merge_nodes(&countries).await.unwrap();
        store.merge_nodes(&provinces).await.unwrap();
        store.merge_relationships(&part_of).await.unwrap();
    }

    assert_eq!(count(&store, "MATCH (n:Country) RETURN count(n) AS n").await, 1);
    assert_eq!(count(&store, "MATCH (n:Province) RETURN count(n) AS n").await, 2);
    assert_eq!(count(&store, "MATCH ()-[r:PART_OF]->() RETURN count(r) AS n").await, 2);
}

#[tokio::test]
async fn later_merge_keeps_known_coordinates() {
    let (_c, store) = covidgraph_graph::testutil::neo4j_store().await;
    let (_, provinces, _) = province_batch();
    store.merge_nodes(&provinces).await.unwrap();

    let mut without_coords = NodeSet::new("Province", "name");
    without_coords.add("Hubei", Properties::new());
    store.merge_nodes(&without_coords).await.unwrap();

    let rows = store
        .run("MATCH (p:Province {name: 'Hubei'}) RETURN p.latitude AS lat")
        .await
        .unwrap();
    assert!(rows[0].get("lat").is_some_and(|v| !v.is_null()));
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_c, store) = covidgraph_graph::testutil::neo4j_store().await;
    migrate(&store).await.expect("second migration run");
    assert_eq!(count(&store, "SHOW CONSTRAINTS YIELD name RETURN count(name) AS n").await, 4);
}

#[tokio::test]
async fn relationships_without_endpoints_are_skipped() {
    let (_c, store) = covidgraph_graph::testutil::neo4j_store().await;
    let (countries, _, part_of) = province_batch();
    store.merge_nodes(&countries).await.unwrap();

    assert_eq!(store.merge_relationships(&part_of).await.unwrap(), 0);
    assert_eq!(count(&store, "MATCH ()-[r:PART_OF]->() RETURN count(r) AS n").await, 0);
}

#[tokio::test]
async fn relationship_count_covers_only_matched_endpoints() {
    let (_c, store) = covidgraph_graph::testutil::neo4j_store().await;
    let (countries, _, part_of) = province_batch();
    store.merge_nodes(&countries).await.unwrap();

    let mut hubei_only = NodeSet::new("Province", "name");
    hubei_only.add("Hubei", Properties::new());
    assert_eq!(store.merge_nodes(&hubei_only).await.unwrap(), 1);

    assert_eq!(store.merge_relationships(&part_of).await.unwrap(), 1);
}
