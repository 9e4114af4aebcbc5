/// Result type alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j error: {0}")]
    Neo4j(#[from] neo4rs::Error),

    #[error("Could not decode row: {0}")]
    Decode(String),

    #[error("{what} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        what: String,
        attempts: u32,
        #[source]
        source: neo4rs::Error,
    },
}
