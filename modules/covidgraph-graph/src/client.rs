use neo4rs::{query, ConfigBuilder, Graph};
use tracing::info;

/// Rows pulled per round trip when streaming results.
const FETCH_SIZE: usize = 500;

/// Ingestion is sequential; a small pool covers the tagger and ad-hoc reads.
const MAX_CONNECTIONS: usize = 4;

/// Bolt connection pool for the covid graph.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(FETCH_SIZE)
            .max_connections(MAX_CONNECTIONS)
            .build()?;
        let graph = Graph::connect(config).await?;
        info!(uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Round-trip a trivial statement so a bad URI or credentials fail before
    /// any download starts.
    pub async fn ping(&self) -> Result<(), neo4rs::Error> {
        self.graph.run(query("RETURN 1")).await
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}
