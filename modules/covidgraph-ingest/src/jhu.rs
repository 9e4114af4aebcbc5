//! JHU daily-report ingestion.
//!
//! Each `MM-DD-YYYY.csv` under the daily-reports directory is read on the
//! blocking pool, folded into a `JhuBatch`, and flushed before the next file
//! is touched. A file that cannot be read is skipped; a file whose flush keeps
//! failing stops the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use covidgraph_common::{
    Layout, ParsedRow, COUNTRY, DAILY_REPORT, JHU_SOURCE, PART_OF, PROVINCE, REPORTED,
};
use covidgraph_graph::{props, Endpoint, FlushStats, GraphStore, NodeSet, Properties, RelationshipSet};

use crate::error::{IngestError, Result};
use crate::parse::parse_row;

/// Where the daily reports live inside the extracted JHU archive.
pub const DAILY_REPORTS_SUBDIR: &str = "COVID-19-master/csse_covid_19_data/csse_covid_19_daily_reports";

const REPORT_FILE_DATE_FORMAT: &str = "%m-%d-%Y";

/// The node and relationship sets built from one daily-report file.
#[derive(Debug, Clone)]
pub struct JhuBatch {
    pub countries: NodeSet,
    pub provinces: NodeSet,
    pub reports: NodeSet,
    pub part_of: RelationshipSet,
    pub reported: RelationshipSet,
}

impl Default for JhuBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl JhuBatch {
    pub fn new() -> Self {
        let province = Endpoint::new(PROVINCE, "name");
        Self {
            countries: NodeSet::new(COUNTRY, "name"),
            provinces: NodeSet::new(PROVINCE, "name"),
            reports: NodeSet::new(DAILY_REPORT, "uuid"),
            part_of: RelationshipSet::new(PART_OF, province.clone(), Endpoint::new(COUNTRY, "name"))
                .unique(),
            reported: RelationshipSet::new(REPORTED, province, Endpoint::new(DAILY_REPORT, "uuid")),
        }
    }

    pub fn add_row(&mut self, row: &ParsedRow) {
        let uuid = row.observation_key();

        self.countries.add(row.region.as_str(), Properties::new());

        let province_props = match row.coordinates {
            Some(c) => props([("latitude", c.latitude), ("longitude", c.longitude)]),
            None => Properties::new(),
        };
        self.provinces.add(row.sub_region.as_str(), province_props);

        let mut report = props([
            ("confirmed", row.confirmed),
            ("death", row.deaths),
            ("recovered", row.recovered),
        ]);
        if let Some(date) = row.date {
            report.insert("date".to_string(), date.into());
        }
        self.reports.add(uuid.as_str(), report);

        let source = || props([("source", JHU_SOURCE)]);
        self.part_of
            .add(row.sub_region.as_str(), row.region.as_str(), source());
        self.reported.add(row.sub_region.as_str(), uuid, source());
    }

    /// Merge every set into the store: nodes first, then relationships.
    pub async fn flush(&self, store: &dyn GraphStore) -> Result<FlushStats> {
        let mut stats = FlushStats::default();
        for nodes in [&self.countries, &self.provinces, &self.reports] {
            stats.nodes += store.merge_nodes(nodes).await?;
        }
        for rels in [&self.reported, &self.part_of] {
            stats.relationships += store.merge_relationships(rels).await?;
        }
        Ok(stats)
    }
}

/// Outcome of reading one file, before it is flushed.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub layout: Layout,
    pub batch: JhuBatch,
    pub rows_parsed: u64,
    pub rows_skipped: u64,
    pub field_issues: u64,
}

/// Read one daily report into a batch. Synchronous; call from the blocking pool.
pub fn read_daily_report(path: &Path) -> Result<ParsedFile> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::io(path, e))?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);

    let header_len = reader.headers()?.len();
    let layout = Layout::detect(header_len)
        .ok_or_else(|| IngestError::UnrecognizedLayout(path.to_path_buf()))?;
    debug!(file = %path.display(), layout = layout.as_str(), "Detected layout");

    let mut parsed = ParsedFile {
        layout,
        batch: JhuBatch::new(),
        rows_parsed: 0,
        rows_skipped: 0,
        field_issues: 0,
    };

    for (i, record) in reader.records().enumerate() {
        // Line 1 is the header.
        let line = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(file = %path.display(), line, error = %e, "Unreadable row, skipping");
                parsed.rows_skipped += 1;
                continue;
            }
        };
        match parse_row(layout, &record) {
            Ok(row) => {
                for issue in &row.issues {
                    debug!(file = %path.display(), line, field = issue.field, raw = issue.raw.as_str(), kind = ?issue.kind, "Field fallback");
                }
                parsed.field_issues += row.issues.len() as u64;
                parsed.batch.add_row(&row.row);
                parsed.rows_parsed += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), line, error = %e, "Skipping row");
                parsed.rows_skipped += 1;
            }
        }
    }

    Ok(parsed)
}

/// Daily-report files in `dir`, oldest report first.
///
/// Files not named `MM-DD-YYYY.csv` (the repo's README, for one) are ignored.
pub fn list_daily_reports(dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| IngestError::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match NaiveDate::parse_from_str(stem, REPORT_FILE_DATE_FORMAT) {
            Ok(date) => files.push((date, path)),
            Err(_) => debug!(file = %path.display(), "Not a daily report, ignoring"),
        }
    }

    files.sort();
    Ok(files)
}

/// Per-file outcome.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: String,
    pub report_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    pub rows_parsed: u64,
    pub rows_skipped: u64,
    pub field_issues: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flushed: Option<FlushStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals for one JHU ingestion run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub files_seen: u64,
    pub files_loaded: u64,
    pub files_skipped: u64,
    pub rows_parsed: u64,
    pub rows_skipped: u64,
    pub field_issues: u64,
    pub flushed: FlushStats,
    pub files: Vec<FileReport>,
}

/// Drives JHU ingestion for one directory of daily reports.
#[derive(Debug, Clone)]
pub struct JhuIngest {
    /// Flush attempts per file before the run is aborted.
    pub flush_attempts: u32,
    /// First retry delay; later delays triple.
    pub flush_backoff: Duration,
}

impl Default for JhuIngest {
    fn default() -> Self {
        Self {
            flush_attempts: 3,
            flush_backoff: Duration::from_secs(2),
        }
    }
}

impl JhuIngest {
    /// Ingest every daily report below `jhu_root` (the extracted archive).
    pub async fn ingest_extracted(&self, store: &dyn GraphStore, jhu_root: &Path) -> Result<IngestStats> {
        self.ingest_dir(store, &jhu_root.join(DAILY_REPORTS_SUBDIR)).await
    }

    /// Ingest every daily report in `dir`, oldest first.
    pub async fn ingest_dir(&self, store: &dyn GraphStore, dir: &Path) -> Result<IngestStats> {
        let files = list_daily_reports(dir)?;
        info!(dir = %dir.display(), files = files.len(), "Ingesting JHU daily reports");

        let mut stats = IngestStats::default();
        for (report_date, path) in files {
            stats.files_seen += 1;
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let read_path = path.clone();
            let parsed = tokio::task::spawn_blocking(move || read_daily_report(&read_path))
                .await
                .map_err(|e| IngestError::Other(anyhow::anyhow!("parser task failed: {e}")))?;

            let parsed = match parsed {
                Ok(p) => p,
                Err(e) => {
                    warn!(file = file.as_str(), error = %e, "Skipping unreadable daily report");
                    stats.files_skipped += 1;
                    stats.files.push(FileReport {
                        file,
                        report_date,
                        layout: None,
                        rows_parsed: 0,
                        rows_skipped: 0,
                        field_issues: 0,
                        flushed: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let flushed = self.flush_with_retry(store, &file, &parsed.batch).await?;

            info!(
                file = file.as_str(),
                layout = parsed.layout.as_str(),
                rows = parsed.rows_parsed,
                skipped = parsed.rows_skipped,
                nodes = flushed.nodes,
                relationships = flushed.relationships,
                "Loaded daily report"
            );

            stats.files_loaded += 1;
            stats.rows_parsed += parsed.rows_parsed;
            stats.rows_skipped += parsed.rows_skipped;
            stats.field_issues += parsed.field_issues;
            stats.flushed += flushed;
            stats.files.push(FileReport {
                file,
                report_date,
                layout: Some(parsed.layout),
                rows_parsed: parsed.rows_parsed,
                rows_skipped: parsed.rows_skipped,
                field_issues: parsed.field_issues,
                flushed: Some(flushed),
                error: None,
            });
        }

        info!(
            seen = stats.files_seen,
            loaded = stats.files_loaded,
            skipped = stats.files_skipped,
            rows = stats.rows_parsed,
            "JHU ingestion complete"
        );
        Ok(stats)
    }

    async fn flush_with_retry(&self, store: &dyn GraphStore, file: &str, batch: &JhuBatch) -> Result<FlushStats> {
        let attempts = self.flush_attempts.max(1);
        let mut attempt = 0;
        loop {
            match batch.flush(store).await {
                Ok(stats) => return Ok(stats),
                Err(e) if attempt + 1 < attempts => {
                    let delay = retry_delay(self.flush_backoff, attempt);
                    warn!(file, attempt = attempt + 1, error = %e, ?delay, "Flush failed, retrying file");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base * 3^attempt`, saturating instead of overflowing for large attempt counts.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(3u32.saturating_pow(attempt))
}

/// Ingest with default retry settings.
pub async fn ingest_daily_reports(store: &dyn GraphStore, dir: &Path) -> Result<IngestStats> {
    JhuIngest::default().ingest_dir(store, dir).await
}
