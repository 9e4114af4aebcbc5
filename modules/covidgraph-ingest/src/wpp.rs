//! UN World Population Prospects: population by country, age group and sex.
//!
//! Only rows for the reference year are kept. Source values are in thousands;
//! counts are `trunc(value * 1000)`.

use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use covidgraph_common::{AGE_GROUP, COUNTRY, CURRENT_FEMALE, CURRENT_MALE, CURRENT_TOTAL};
use covidgraph_graph::{props, Endpoint, FlushStats, GraphStore, NodeSet, RelationshipSet};

use crate::error::{IngestError, Result};

/// File name of the medium-variant population-by-age-and-sex table.
pub const WPP_FILE_NAME: &str = "WPP2019_PopulationByAgeSex_Medium.csv";

/// Span the feed uses for the open-ended oldest bracket (`100+`).
const OPEN_ENDED_SPAN: i64 = -1;

// LocID,Location,VarID,Variant,Time,MidPeriod,AgeGrp,AgeGrpStart,AgeGrpSpan,PopMale,PopFemale,PopTotal
const COL_LOC_ID: usize = 0;
const COL_LOCATION: usize = 1;
const COL_TIME: usize = 4;
const COL_AGE_GROUP: usize = 6;
const COL_AGE_START: usize = 7;
const COL_AGE_SPAN: usize = 8;
const COL_POP_MALE: usize = 9;
const COL_POP_FEMALE: usize = 10;
const COL_POP_TOTAL: usize = 11;

/// One population row, counts already scaled to persons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulationRow {
    pub loc_id: String,
    pub location: String,
    pub year: i32,
    pub age_group: String,
    pub age_start: i64,
    pub age_span: i64,
    pub male: i64,
    pub female: i64,
    pub total: i64,
}

/// Why a population row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PopulationRowError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("{field} is not an integer: {raw:?}")]
    NotInteger { field: &'static str, raw: String },

    #[error("{field} is not a finite number: {raw:?}")]
    NotFinite { field: &'static str, raw: String },

    #[error("{field} is out of range: {raw:?}")]
    OutOfRange { field: &'static str, raw: String },
}

impl PopulationRow {
    pub fn from_record(record: &StringRecord) -> std::result::Result<Self, PopulationRowError> {
        type RowResult<T> = std::result::Result<T, PopulationRowError>;

        let text = |i: usize, field: &'static str| -> RowResult<String> {
            match record.get(i).map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(PopulationRowError::Missing(field)),
            }
        };
        let int = |i: usize, field: &'static str| -> RowResult<i64> {
            let raw = text(i, field)?;
            raw.parse::<i64>()
                .map_err(|_| PopulationRowError::NotInteger { field, raw })
        };
        let thousands = |i: usize, field: &'static str| -> RowResult<i64> { persons(field, text(i, field)?) };

        let year = int(COL_TIME, "Time")?;
        Ok(Self {
            loc_id: text(COL_LOC_ID, "LocID")?,
            location: text(COL_LOCATION, "Location")?,
            year: i32::try_from(year).map_err(|_| PopulationRowError::OutOfRange {
                field: "Time",
                raw: year.to_string(),
            })?,
            age_group: text(COL_AGE_GROUP, "AgeGrp")?,
            age_start: int(COL_AGE_START, "AgeGrpStart")?,
            age_span: int(COL_AGE_SPAN, "AgeGrpSpan")?,
            male: thousands(COL_POP_MALE, "PopMale")?,
            female: thousands(COL_POP_FEMALE, "PopFemale")?,
            total: thousands(COL_POP_TOTAL, "PopTotal")?,
        })
    }
}

/// Scale a value in thousands to persons, truncating. NaN, infinities and
/// results that do not fit an `i64` are rejected instead of saturating.
fn persons(field: &'static str, raw: String) -> std::result::Result<i64, PopulationRowError> {
    let value = match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => return Err(PopulationRowError::NotFinite { field, raw }),
    };
    let scaled = (value * 1000.0).trunc();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    if scaled < i64::MIN as f64 || scaled >= i64::MAX as f64 {
        return Err(PopulationRowError::OutOfRange { field, raw });
    }
    Ok(scaled as i64)
}

/// Countries, age groups and the three population relationships.
#[derive(Debug, Clone)]
pub struct WppBatch {
    pub countries: NodeSet,
    pub age_groups: NodeSet,
    pub total: RelationshipSet,
    pub male: RelationshipSet,
    pub female: RelationshipSet,
}

impl Default for WppBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WppBatch {
    pub fn new() -> Self {
        let rel = |rel_type: &str| {
            RelationshipSet::new(rel_type, Endpoint::new(COUNTRY, "name"), Endpoint::new(AGE_GROUP, "group"))
                .unique()
        };
        Self {
            countries: NodeSet::new(COUNTRY, "name"),
            age_groups: NodeSet::new(AGE_GROUP, "group"),
            total: rel(CURRENT_TOTAL),
            male: rel(CURRENT_MALE),
            female: rel(CURRENT_FEMALE),
        }
    }

    pub fn add_row(&mut self, row: &PopulationRow) {
        self.countries
            .add(row.location.as_str(), props([("un_id", row.loc_id.as_str())]));

        let mut group = props([("start", row.age_start), ("span", row.age_span)]);
        if row.age_span == OPEN_ENDED_SPAN {
            group.insert("open_ended".to_string(), true.into());
        }
        self.age_groups.add(row.age_group.as_str(), group);

        for (rels, count) in [
            (&mut self.total, row.total),
            (&mut self.male, row.male),
            (&mut self.female, row.female),
        ] {
            rels.add(row.location.as_str(), row.age_group.as_str(), props([("count", count)]));
        }
    }

    pub async fn flush(&self, store: &dyn GraphStore) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        for nodes in [&self.countries, &self.age_groups] {
            stats.nodes += store.merge_nodes(nodes).await?;
        }
        for rels in [&self.total, &self.male, &self.female] {
            stats.relationships += store.merge_relationships(rels).await?;
        }
        Ok(stats)
    }
}

/// Totals for one population load.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WppStats {
    pub reference_year: i32,
    pub rows_read: u64,
    pub rows_kept: u64,
    pub rows_skipped: u64,
    pub countries: u64,
    pub age_groups: u64,
    pub flushed: FlushStats,
}

/// Read the population table, keeping rows for `reference_year`.
/// Synchronous; call from the blocking pool.
pub fn read_population(path: &Path, reference_year: i32) -> Result<(WppBatch, WppStats)> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::io(path, e))?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);

    let mut batch = WppBatch::new();
    let mut stats = WppStats {
        reference_year,
        ..Default::default()
    };

    for (i, record) in reader.records().enumerate() {
        let line = i + 2;
        stats.rows_read += 1;
        let row = match record.map_err(|e| e.to_string()).and_then(|r| {
            PopulationRow::from_record(&r).map_err(|e| e.to_string())
        }) {
            Ok(row) => row,
            Err(reason) => {
                warn!(file = %path.display(), line, reason = reason.as_str(), "Skipping population row");
                stats.rows_skipped += 1;
                continue;
            }
        };
        if row.year != reference_year {
            continue;
        }
        batch.add_row(&row);
        stats.rows_kept += 1;
    }

    stats.countries = batch.countries.len() as u64;
    stats.age_groups = batch.age_groups.len() as u64;
    debug!(
        file = %path.display(),
        read = stats.rows_read,
        kept = stats.rows_kept,
        "Read population table"
    );
    Ok((batch, stats))
}

/// Load the population table into the store.
pub async fn load_population(store: &dyn GraphStore, path: &Path, reference_year: i32) -> Result<WppStats> {
    info!(file = %path.display(), reference_year, "Loading WPP population data");

    let read_path = path.to_path_buf();
    let (batch, mut stats) = tokio::task::spawn_blocking(move || read_population(&read_path, reference_year))
        .await
        .map_err(|e| IngestError::Other(anyhow::anyhow!("population reader task failed: {e}")))??;

    if stats.rows_kept == 0 {
        warn!(reference_year, "No population rows for the reference year");
    }

    stats.flushed = batch.flush(store).await?;
    info!(
        countries = stats.countries,
        age_groups = stats.age_groups,
        relationships = stats.flushed.relationships,
        "WPP load complete"
    );
    Ok(stats)
}
