use std::fmt;

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;

// --- Graph vocabulary ---

pub const COUNTRY: &str = "Country";
pub const PROVINCE: &str = "Province";
pub const DAILY_REPORT: &str = "DailyReport";
pub const AGE_GROUP: &str = "AgeGroup";
pub const LATEST: &str = "Latest";

pub const PART_OF: &str = "PART_OF";
pub const REPORTED: &str = "REPORTED";
pub const CURRENT_TOTAL: &str = "CURRENT_TOTAL";
pub const CURRENT_MALE: &str = "CURRENT_MALE";
pub const CURRENT_FEMALE: &str = "CURRENT_FEMALE";

/// Provenance tag written on every relationship loaded from the JHU feed.
pub const JHU_SOURCE: &str = "jhu";

/// Stored in place of a count that could not be parsed.
pub const NOT_AVAILABLE: &str = "na";

/// Separator between the parts of an observation key.
pub const KEY_SEPARATOR: char = '|';

/// Date format used inside observation keys. Sub-second digits are appended
/// only when the timestamp has them (see `key_date`).
pub const KEY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A case count as reported, or the explicit marker that the source value
/// was missing or unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Value(i64),
    NotAvailable,
}

impl Serialize for Count {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Count::Value(v) => s.serialize_i64(*v),
            Count::NotAvailable => s.serialize_str(NOT_AVAILABLE),
        }
    }
}

impl Count {
    pub fn value(self) -> Option<i64> {
        match self {
            Count::Value(v) => Some(v),
            Count::NotAvailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Count::Value(_))
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Value(v) => write!(f, "{v}"),
            Count::NotAvailable => f.write_str(NOT_AVAILABLE),
        }
    }
}

/// Column layout of a JHU daily report file.
///
/// The feed switched layouts on 2020-03-22:
///
/// ```text
/// Old: Province/State,Country/Region,Last Update,Confirmed,Deaths,Recovered[,Latitude,Longitude]
/// New: FIPS,Admin2,Province_State,Country_Region,Last_Update,Lat,Long_,Confirmed,Deaths,Recovered,Active,Combined_Key
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Old,
    New,
}

/// Headers at least this wide (more than eight columns) select the new layout.
pub const NEW_LAYOUT_MIN_COLUMNS: usize = 9;

impl Layout {
    /// Pick the layout from the width of a header record. Returns `None` for
    /// an empty header.
    pub fn detect(header_len: usize) -> Option<Self> {
        match header_len {
            0 => None,
            n if n >= NEW_LAYOUT_MIN_COLUMNS => Some(Layout::New),
            _ => Some(Layout::Old),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Old => "old",
            Layout::New => "new",
        }
    }
}

/// Latitude/longitude pair. Only built when both halves parsed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One daily-report row after layout-specific extraction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedRow {
    pub region: String,
    pub sub_region: String,
    pub date: Option<NaiveDateTime>,
    pub confirmed: Count,
    pub deaths: Count,
    pub recovered: Count,
    pub coordinates: Option<Coordinates>,
}

impl ParsedRow {
    /// Deterministic observation key for this row.
    pub fn observation_key(&self) -> String {
        observation_key(&self.region, &self.sub_region, self.date)
    }
}

/// Build the observation key from region, sub-region and report date.
///
/// Rows without a readable date use `None` in the date slot, so two such rows
/// for the same sub-region share a key.
pub fn observation_key(region: &str, sub_region: &str, date: Option<NaiveDateTime>) -> String {
    let date = match date {
        Some(d) => key_date(d),
        None => "None".to_string(),
    };
    format!("{region}{KEY_SEPARATOR}{sub_region}{KEY_SEPARATOR}{date}")
}

/// `KEY_DATE_FORMAT`, plus `.ffffff` when the timestamp has a fraction, or
/// `.fffffffff` when that fraction is finer than a microsecond.
fn key_date(d: NaiveDateTime) -> String {
    let mut out = d.format(KEY_DATE_FORMAT).to_string();
    // Leap-second representation carries the extra second in the nanoseconds.
    let nanos = d.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        if nanos % 1_000 == 0 {
            out.push_str(&format!(".{:06}", nanos / 1_000));
        } else {
            out.push_str(&format!(".{nanos:09}"));
        }
    }
    out
}

/// Name used for the sub-region of rows that carry none.
pub fn complete_sub_region(region: &str) -> String {
    format!("{region}_complete")
}

/// A recoverable problem with one field of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: &'static str,
    pub raw: String,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Date could not be read; stored as null.
    UnparseableDate,
    /// Count could not be read; stored as the not-available marker.
    UnparseableCount,
    /// Only one half of the coordinate pair was usable; both dropped.
    IncompleteCoordinates,
}
