//! Store adapter: the write/query surface the ingestion pipeline needs from a
//! property graph.
//!
//! `Neo4jStore` implements it over Bolt. Every container is written inside one
//! transaction (UNWIND in chunks of `WRITE_BATCH_SIZE`), so a node or
//! relationship type lands completely or not at all. Transient failures are
//! retried with exponential backoff before surfacing.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use neo4rs::{query, BoltMap, BoltString, BoltType, Query, Txn};
use tracing::{debug, info, warn};

use crate::batch::{NodeEntry, NodeSet, RelationshipEntry, RelationshipSet};
use crate::error::{GraphError, Result};
use crate::value::{properties_to_bolt, PropertyValue};
use crate::GraphClient;

/// Rows per UNWIND statement.
const WRITE_BATCH_SIZE: usize = 1000;
/// Max attempts for a store operation hitting a transient error.
const STORE_MAX_ATTEMPTS: u32 = 4;
/// Base backoff between attempts. Actual delay is base * 3^attempt.
const STORE_RETRY_BASE: Duration = Duration::from_millis(500);

/// One result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(pub BTreeMap<String, PropertyValue>);

impl Record {
    pub fn get(&self, column: &str) -> Option<&PropertyValue> {
        self.0.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(PropertyValue::as_i64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(PropertyValue::as_str)
    }
}

/// What the pipeline requires from a property graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ensure a uniqueness constraint on `label.key`. An existing constraint
    /// is success.
    async fn ensure_unique(&self, label: &str, key: &str) -> Result<()>;

    /// Create-or-update every node of the set by its key. Returns the number
    /// of nodes written.
    async fn merge_nodes(&self, nodes: &NodeSet) -> Result<u64>;

    /// Create-or-update every relationship of the set, matched on
    /// (start node, type, end node). Relationships whose endpoints do not
    /// exist are not written. Returns the number written.
    async fn merge_relationships(&self, rels: &RelationshipSet) -> Result<u64>;

    /// Execute an ad-hoc statement and collect its rows.
    async fn run(&self, cypher: &str) -> Result<Vec<Record>>;
}

/// `GraphStore` over a live Neo4j connection.
#[derive(Clone)]
pub struct Neo4jStore {
    client: GraphClient,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    /// Run all queries of one container in a single transaction and sum the
    /// `written` column they return.
    async fn write_atomically(&self, queries: Vec<Query>) -> std::result::Result<u64, neo4rs::Error> {
        let mut txn = self.client.graph.start_txn().await?;
        let mut written = 0;
        for q in queries {
            match written_by(&mut txn, q).await {
                Ok(n) => written += n,
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        warn!(error = %rollback, "Rollback after failed write also failed");
                    }
                    return Err(e);
                }
            }
        }
        txn.commit().await?;
        Ok(written)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn ensure_unique(&self, label: &str, key: &str) -> Result<()> {
        let name = format!("{}_{}_unique", label.to_lowercase(), key.to_lowercase());
        let cypher = format!(
            "CREATE CONSTRAINT {name} FOR (n:{label}) REQUIRE n.{key} IS UNIQUE",
            label = escape_name(label),
            key = escape_name(key),
        );
        with_retry(&format!("constraint {name}"), || {
            run_ignoring_exists(&self.client.graph, &cypher)
        })
        .await
    }

    async fn merge_nodes(&self, nodes: &NodeSet) -> Result<u64> {
        if nodes.is_empty() {
            return Ok(0);
        }

        let cypher = merge_nodes_cypher(nodes.label(), nodes.key_attr());
        let what = format!("MERGE :{}", nodes.label());
        let written = with_retry(&what, || {
            let queries = nodes
                .chunks(WRITE_BATCH_SIZE)
                .map(|chunk| query(&cypher).param("rows", node_rows(chunk)))
                .collect();
            self.write_atomically(queries)
        })
        .await?;

        debug!(label = nodes.label(), count = written, "Nodes merged");
        Ok(written)
    }

    async fn merge_relationships(&self, rels: &RelationshipSet) -> Result<u64> {
        if rels.is_empty() {
            return Ok(0);
        }

        let cypher = merge_relationships_cypher(rels);
        let what = format!("MERGE [:{}]", rels.rel_type());
        let written = with_retry(&what, || {
            let queries = rels
                .chunks(WRITE_BATCH_SIZE)
                .map(|chunk| query(&cypher).param("rows", relationship_rows(chunk)))
                .collect();
            self.write_atomically(queries)
        })
        .await?;

        let skipped = rels.len() as u64 - written.min(rels.len() as u64);
        debug!(rel_type = rels.rel_type(), count = written, skipped, "Relationships merged");
        Ok(written)
    }

    async fn run(&self, cypher: &str) -> Result<Vec<Record>> {
        let rows = with_retry("query", || async {
            let mut stream = self.client.graph.execute(query(cypher)).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok(rows)
        })
        .await?;

        rows.iter()
            .map(|row| {
                let columns: HashMap<String, BoltType> = row
                    .to()
                    .map_err(|e| GraphError::Decode(e.to_string()))?;
                Ok(Record(
                    columns
                        .iter()
                        .map(|(k, v)| (k.clone(), PropertyValue::from_bolt(v)))
                        .collect(),
                ))
            })
            .collect()
    }
}

/// Column both merge statements report their row count in.
const WRITTEN: &str = "written";

/// Execute one statement inside `txn` and read back its `written` count.
async fn written_by(txn: &mut Txn, q: Query) -> std::result::Result<u64, neo4rs::Error> {
    let mut stream = txn.execute(q).await?;
    let mut written = 0;
    while let Some(row) = stream.next(txn.handle()).await? {
        written += row.get::<i64>(WRITTEN).unwrap_or_default().max(0) as u64;
    }
    Ok(written)
}

/// `UNWIND $rows AS row MERGE (n:Label {key: row.key}) SET n += row.props`
pub fn merge_nodes_cypher(label: &str, key_attr: &str) -> String {
    format!(
        "UNWIND $rows AS row
         MERGE (n:{label} {{{key}: row.key}})
         SET n += row.props
         RETURN count(n) AS {WRITTEN}",
        label = escape_name(label),
        key = escape_name(key_attr),
    )
}

/// MATCH both endpoints by key, then MERGE the relationship between them.
pub fn merge_relationships_cypher(rels: &RelationshipSet) -> String {
    format!(
        "UNWIND $rows AS row
         MATCH (a:{start_label} {{{start_key}: row.start}})
         MATCH (b:{end_label} {{{end_key}: row.end}})
         MERGE (a)-[r:{rel_type}]->(b)
         SET r += row.props
         RETURN count(r) AS {WRITTEN}",
        start_label = escape_name(&rels.start().label),
        start_key = escape_name(&rels.start().key_attr),
        end_label = escape_name(&rels.end().label),
        end_key = escape_name(&rels.end().key_attr),
        rel_type = escape_name(rels.rel_type()),
    )
}

/// Backtick-quote an identifier for interpolation into Cypher.
fn escape_name(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn node_rows(chunk: &[NodeEntry]) -> Vec<BoltType> {
    chunk
        .iter()
        .map(|node| {
            BoltType::Map(BoltMap::from_iter(vec![
                (
                    BoltString::from("key"),
                    BoltType::String(BoltString::from(node.key.as_str())),
                ),
                (BoltString::from("props"), properties_to_bolt(&node.props)),
            ]))
        })
        .collect()
}

fn relationship_rows(chunk: &[RelationshipEntry]) -> Vec<BoltType> {
    chunk
        .iter()
        .map(|rel| {
            BoltType::Map(BoltMap::from_iter(vec![
                (
                    BoltString::from("start"),
                    BoltType::String(BoltString::from(rel.start.as_str())),
                ),
                (
                    BoltString::from("end"),
                    BoltType::String(BoltString::from(rel.end.as_str())),
                ),
                (BoltString::from("props"), properties_to_bolt(&rel.props)),
            ]))
        })
        .collect()
}

/// Run an operation, retrying transient failures with exponential backoff.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, neo4rs::Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if is_transient_error(&e.to_string()) => {
                attempt += 1;
                if attempt >= STORE_MAX_ATTEMPTS {
                    return Err(GraphError::RetriesExhausted {
                        what: what.to_string(),
                        attempts: attempt,
                        source: e,
                    });
                }
                let backoff = STORE_RETRY_BASE * 3u32.pow(attempt - 1);
                warn!(what, attempt, error = %e, ?backoff, "Transient store error, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Connection drops, timeouts and Neo4j `TransientError` codes are worth a retry.
pub(crate) fn is_transient_error(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    [
        "transienterror",
        "connection",
        "broken pipe",
        "timed out",
        "timeout",
        "reset by peer",
        "unavailable",
        "deadlock",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

/// Run a Cypher statement, ignoring errors that indicate the constraint/index already exists.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> std::result::Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => {
            info!("Created: {}", cypher.chars().take(80).collect::<String>());
            Ok(())
        }
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                debug!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Endpoint;

    #[test]
    fn node_merge_statement_targets_label_and_key() {
        let cypher = merge_nodes_cypher("Province", "name");
        assert!(cypher.contains("MERGE (n:`Province` {`name`: row.key})"));
        assert!(cypher.contains("SET n += row.props"));
    }

    #[test]
    fn relationship_merge_statement_matches_both_endpoints() {
        let rels = RelationshipSet::new(
            "REPORTED",
            Endpoint::new("Province", "name"),
            Endpoint::new("DailyReport", "uuid"),
        );
        let cypher = merge_relationships_cypher(&rels);
        assert!(cypher.contains("MATCH (a:`Province` {`name`: row.start})"));
        assert!(cypher.contains("MATCH (b:`DailyReport` {`uuid`: row.end})"));
        assert!(cypher.contains("MERGE (a)-[r:`REPORTED`]->(b)"));
    }

    #[test]
    fn merge_statements_report_rows_actually_written() {
        let rels = RelationshipSet::new(
            "PART_OF",
            Endpoint::new("Province", "name"),
            Endpoint::new("Country", "name"),
        );
        // MATCH drops rows with a missing endpoint before the count.
        assert!(merge_relationships_cypher(&rels).ends_with("RETURN count(r) AS written"));
        assert!(merge_nodes_cypher("Country", "name").ends_with("RETURN count(n) AS written"));
    }

    #[test]
    fn identifiers_are_backtick_escaped() {
        assert_eq!(escape_name("Odd`Label"), "`Odd``Label`");
    }

    #[test]
    fn transient_errors_are_recognised() {
        assert!(is_transient_error("Neo.TransientError.Transaction.DeadlockDetected"));
        assert!(is_transient_error("IO error: Connection reset by peer"));
        assert!(!is_transient_error("Neo.ClientError.Statement.SyntaxError"));
    }

    #[test]
    fn record_accessors_read_typed_columns() {
        let mut map = BTreeMap::new();
        map.insert("tagged".to_string(), PropertyValue::Int(2));
        map.insert("name".to_string(), PropertyValue::from("Hubei"));
        let record = Record(map);
        assert_eq!(record.get_i64("tagged"), Some(2));
        assert_eq!(record.get_str("name"), Some("Hubei"));
        assert_eq!(record.get_i64("missing"), None);
    }
}
