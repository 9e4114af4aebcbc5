pub mod batch;
pub mod client;
pub mod error;
pub mod latest;
pub mod memory;
pub mod migrate;
pub mod store;
pub mod value;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use batch::{Endpoint, FlushStats, NodeEntry, NodeSet, RelationshipEntry, RelationshipSet};
pub use client::GraphClient;
pub use error::{GraphError, Result};
pub use latest::{tag_latest, LatestStats};
pub use memory::MemoryStore;
pub use store::{GraphStore, Neo4jStore, Record};
pub use value::{props, Properties, PropertyValue};

// Re-export for integration tests and ad-hoc queries.
pub use neo4rs::query;
