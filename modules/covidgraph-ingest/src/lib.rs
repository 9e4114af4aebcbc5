pub mod download;
pub mod error;
pub mod jhu;
pub mod parse;
pub mod pipeline;
pub mod wpp;

pub use error::{IngestError, Result};
pub use jhu::{ingest_daily_reports, IngestStats, JhuBatch, JhuIngest};
pub use parse::{parse_row, RowError, RowParse};
pub use pipeline::{Pipeline, RunSummary};
pub use wpp::{load_population, WppBatch, WppStats};
