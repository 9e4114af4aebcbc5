//! Disposable Neo4j 5 instances for integration tests.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::{GraphClient, Neo4jStore};

const NEO4J_PASSWORD: &str = "covidgraph-test";

/// Start a community-edition Neo4j and connect to it. Keep the returned
/// container alive for the whole test; dropping it stops the database.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let image = GenericImage::new("neo4j", "5.25.1")
        .with_exposed_port(ContainerPort::Tcp(7687))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", format!("neo4j/{NEO4J_PASSWORD}"));

    let container: ContainerAsync<GenericImage> = image
        .start()
        .await
        .expect("Failed to start Neo4j container");

    let host_port = container
        .get_host_port_ipv4(7687)
        .await
        .expect("Failed to get Neo4j host port");

    let uri = format!("bolt://127.0.0.1:{host_port}");
    let client = GraphClient::connect(&uri, "neo4j", NEO4J_PASSWORD)
        .await
        .expect("Failed to connect to Neo4j");

    (container, client)
}

/// A `Neo4jStore` on a fresh container, constraints and indexes applied.
pub async fn neo4j_store() -> (ContainerAsync<GenericImage>, Neo4jStore) {
    let (container, client) = neo4j_container().await;
    let store = Neo4jStore::new(client);
    crate::migrate::migrate(&store)
        .await
        .expect("Failed to run migrations");
    (container, store)
}
