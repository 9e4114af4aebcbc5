use tracing::info;

use covidgraph_common::{AGE_GROUP, COUNTRY, DAILY_REPORT, PROVINCE};

use crate::error::Result;
use crate::store::GraphStore;

/// Key attribute of every merged label.
pub const UNIQUE_KEYS: [(&str, &str); 4] = [
    (COUNTRY, "name"),
    (PROVINCE, "name"),
    (DAILY_REPORT, "uuid"),
    (AGE_GROUP, "group"),
];

/// Run idempotent schema setup: one uniqueness constraint per merged label,
/// plus a date index for the latest-report tagging.
pub async fn migrate(store: &dyn GraphStore) -> Result<()> {
    info!("Running schema migrations...");

    for (label, key) in UNIQUE_KEYS {
        store.ensure_unique(label, key).await?;
    }
    info!("Uniqueness constraints created");

    store
        .run(&format!(
            "CREATE INDEX daily_report_date IF NOT EXISTS FOR (n:{DAILY_REPORT}) ON (n.date)"
        ))
        .await?;
    info!("Schema migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn creates_a_constraint_per_label() {
        let store = MemoryStore::new();
        migrate(&store).await.unwrap();
        for (label, key) in UNIQUE_KEYS {
            assert!(store.has_constraint(label, key), "{label}.{key}");
        }
    }

    #[tokio::test]
    async fn running_twice_is_harmless() {
        let store = MemoryStore::new();
        migrate(&store).await.unwrap();
        migrate(&store).await.unwrap();
        assert!(store.has_constraint(DAILY_REPORT, "uuid"));
    }
}
