//! Latest-report tagging, a derived marker recomputed from graph state.
//!
//! After ingestion, every `DailyReport` carrying the most recent date among
//! the reports of its `Province` gets the `Latest` label. The pass first strips
//! the label everywhere, then recomputes, so re-running it after any amount of
//! new data converges to the same tagging. Ties on the maximum date are all
//! tagged: the feed contains same-timestamp rows from different files.
//!
//! Must run after all ingestion of a run has finished.

use serde::Serialize;
use tracing::{debug, info};

use covidgraph_common::{DAILY_REPORT, LATEST, PROVINCE, REPORTED};

use crate::error::Result;
use crate::store::GraphStore;

/// Stats from one tagging pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatestStats {
    pub cleared: u64,
    pub tagged: u64,
}

pub fn clear_latest_cypher() -> String {
    format!(
        "MATCH (n:{LATEST})
         REMOVE n:{LATEST}
         RETURN count(n) AS cleared"
    )
}

pub fn tag_latest_cypher() -> String {
    format!(
        "MATCH (p:{PROVINCE})-[:{REPORTED}]->(u:{DAILY_REPORT})
         WHERE u.date IS NOT NULL
         WITH p, max(u.date) AS latest_date
         MATCH (p)-[:{REPORTED}]->(latest:{DAILY_REPORT})
         WHERE latest.date = latest_date
         SET latest:{LATEST}
         RETURN count(latest) AS tagged"
    )
}

/// Clear every `Latest` label, then tag each province's most recent reports.
pub async fn tag_latest(store: &dyn GraphStore) -> Result<LatestStats> {
    let clear = clear_latest_cypher();
    debug!(cypher = clear.as_str(), "Removing stale Latest labels");
    let cleared = first_count(&store.run(&clear).await?, "cleared");

    let tag = tag_latest_cypher();
    debug!(cypher = tag.as_str(), "Tagging latest reports");
    let tagged = first_count(&store.run(&tag).await?, "tagged");

    let stats = LatestStats { cleared, tagged };
    info!(?stats, "Latest tagging complete");
    Ok(stats)
}

fn first_count(rows: &[crate::store::Record], column: &str) -> u64 {
    rows.first()
        .and_then(|r| r.get_i64(column))
        .map_or(0, |n| n.max(0) as u64)
}
