//! Row parser for JHU daily reports.
//!
//! The layout is picked once per file from the header width
//! (`Layout::detect`); each layout is a fixed column mapping and every row of
//! the file goes through the same mapping. Extraction never fails on a bad
//! value: dates fall back to null, counts to `Count::NotAvailable`,
//! coordinates are dropped. Each fallback is reported as a `FieldIssue`. Only
//! a row too short for its layout, or one without a region, is rejected.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;

use covidgraph_common::{
    complete_sub_region, Coordinates, Count, FieldIssue, IssueKind, Layout, ParsedRow,
};

/// Column positions of one layout.
#[derive(Debug, Clone, Copy)]
struct Columns {
    sub_region: usize,
    region: usize,
    date: usize,
    confirmed: usize,
    deaths: usize,
    recovered: usize,
    latitude: usize,
    longitude: usize,
}

// Province/State,Country/Region,Last Update,Confirmed,Deaths,Recovered[,Latitude,Longitude]
const OLD_COLUMNS: Columns = Columns {
    sub_region: 0,
    region: 1,
    date: 2,
    confirmed: 3,
    deaths: 4,
    recovered: 5,
    latitude: 6,
    longitude: 7,
};

// FIPS,Admin2,Province_State,Country_Region,Last_Update,Lat,Long_,Confirmed,Deaths,Recovered,Active,Combined_Key
const NEW_COLUMNS: Columns = Columns {
    sub_region: 2,
    region: 3,
    date: 4,
    latitude: 5,
    longitude: 6,
    confirmed: 7,
    deaths: 8,
    recovered: 9,
};

impl Columns {
    fn for_layout(layout: Layout) -> &'static Columns {
        match layout {
            Layout::Old => &OLD_COLUMNS,
            Layout::New => &NEW_COLUMNS,
        }
    }

    /// Fields a row must have; coordinates are optional in the old layout.
    fn required_len(&self) -> usize {
        [
            self.sub_region,
            self.region,
            self.date,
            self.confirmed,
            self.deaths,
            self.recovered,
        ]
        .into_iter()
        .max()
        .map_or(0, |i| i + 1)
    }
}

/// Why a row was rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    #[error("row has {found} fields, layout needs at least {expected}")]
    TooShort { expected: usize, found: usize },

    #[error("row has no region name")]
    MissingRegion,

    #[error("field {field} is not a valid {expected}: {raw:?}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        raw: String,
    },
}

/// A parsed row plus the recoverable problems met on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct RowParse {
    pub row: ParsedRow,
    pub issues: Vec<FieldIssue>,
}

/// Extract one daily-report row under `layout`.
pub fn parse_row(layout: Layout, record: &StringRecord) -> Result<RowParse, RowError> {
    let cols = Columns::for_layout(layout);
    let expected = cols.required_len();
    if record.len() < expected {
        return Err(RowError::TooShort {
            expected,
            found: record.len(),
        });
    }

    let field = |i: usize| record.get(i).unwrap_or("");
    let mut issues = Vec::new();

    let region = field(cols.region).to_string();
    if region.is_empty() {
        return Err(RowError::MissingRegion);
    }
    let sub_region = match field(cols.sub_region) {
        "" => complete_sub_region(&region),
        name => name.to_string(),
    };

    let raw_date = field(cols.date);
    let date = parse_date(raw_date);
    if date.is_none() {
        issues.push(issue("date", raw_date, IssueKind::UnparseableDate));
    }

    let mut count = |name: &'static str, i: usize| {
        let raw = field(i);
        let value = parse_count(raw);
        if !value.is_available() {
            issues.push(issue(name, raw, IssueKind::UnparseableCount));
        }
        value
    };
    let confirmed = count("confirmed", cols.confirmed);
    let deaths = count("deaths", cols.deaths);
    let recovered = count("recovered", cols.recovered);

    let coordinates = parse_coordinates(record.get(cols.latitude), record.get(cols.longitude), &mut issues);

    Ok(RowParse {
        row: ParsedRow {
            region,
            sub_region,
            date,
            confirmed,
            deaths,
            recovered,
            coordinates,
        },
        issues,
    })
}

fn issue(field: &'static str, raw: &str, kind: IssueKind) -> FieldIssue {
    FieldIssue {
        field,
        raw: raw.to_string(),
        kind,
    }
}

/// Timestamp spellings seen across the feed's history. Two-digit-year forms
/// come first: `%Y` would read `20` as the year 20.
const DATETIME_FORMATS: &[&str] = &[
    "%m/%d/%y %H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];

/// Best-effort timestamp parsing. Returns `None` rather than failing.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(dt) = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
    {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a case count; anything but an integer is `NotAvailable`.
pub fn parse_count(raw: &str) -> Count {
    raw.trim()
        .parse::<i64>()
        .map_or(Count::NotAvailable, Count::Value)
}

fn parse_coordinates(
    lat: Option<&str>,
    long: Option<&str>,
    issues: &mut Vec<FieldIssue>,
) -> Option<Coordinates> {
    let lat = lat.map(str::trim).filter(|s| !s.is_empty());
    let long = long.map(str::trim).filter(|s| !s.is_empty());

    match (lat, long) {
        (None, None) => None,
        (Some(la), Some(lo)) => match (la.parse::<f64>(), lo.parse::<f64>()) {
            (Ok(latitude), Ok(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => {
                issues.push(issue("coordinates", &format!("{la},{lo}"), IssueKind::IncompleteCoordinates));
                None
            }
        },
        (la, lo) => {
            let raw = format!("{},{}", la.unwrap_or(""), lo.unwrap_or(""));
            issues.push(issue("coordinates", &raw, IssueKind::IncompleteCoordinates));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn old_layout_maps_columns() {
        let rec = record(&["Hubei", "Mainland China", "1/22/2020 17:00", "444", "17", "28"]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();

        assert_eq!(parsed.row.region, "Mainland China");
        assert_eq!(parsed.row.sub_region, "Hubei");
        assert_eq!(parsed.row.date, Some(at(2020, 1, 22, 17, 0, 0)));
        assert_eq!(parsed.row.confirmed, Count::Value(444));
        assert_eq!(parsed.row.deaths, Count::Value(17));
        assert_eq!(parsed.row.recovered, Count::Value(28));
        assert_eq!(parsed.row.coordinates, None);
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn old_layout_reads_trailing_coordinates() {
        let rec = record(&[
            "Hubei", "China", "2020-03-01T10:13:19", "66907", "2761", "31536", "30.9756", "112.2707",
        ]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();
        assert_eq!(
            parsed.row.coordinates,
            Some(Coordinates { latitude: 30.9756, longitude: 112.2707 })
        );
    }

    #[test]
    fn new_layout_maps_columns() {
        let rec = record(&[
            "45001", "Abbeville", "South Carolina", "US", "2020-03-23 23:19:34",
            "34.22333378", "-82.46170658", "1", "0", "0", "0", "Abbeville, South Carolina, US",
        ]);
        let parsed = parse_row(Layout::New, &rec).unwrap();

        assert_eq!(parsed.row.region, "US");
        assert_eq!(parsed.row.sub_region, "South Carolina");
        assert_eq!(parsed.row.date, Some(at(2020, 3, 23, 23, 19, 34)));
        assert_eq!(parsed.row.confirmed, Count::Value(1));
        assert_eq!(parsed.row.coordinates.unwrap().longitude, -82.46170658);
    }

    #[test]
    fn same_record_reads_differently_per_layout() {
        let rec = record(&["", "", "Ontario", "Canada", "3/22/20 23:45", "43.6", "-79.3", "425", "2", "0"]);
        let new = parse_row(Layout::New, &rec).unwrap();
        assert_eq!(new.row.region, "Canada");
        assert_eq!(new.row.confirmed, Count::Value(425));

        // Under the old mapping the same fields land elsewhere.
        let old = parse_row(Layout::Old, &rec).unwrap_err();
        assert_eq!(old, RowError::MissingRegion);
    }

    #[test]
    fn empty_sub_region_becomes_complete() {
        let rec = record(&["", "Italy", "2020-02-28T15:03:26", "888", "21", "46"]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();
        assert_eq!(parsed.row.sub_region, "Italy_complete");
    }

    #[test]
    fn non_numeric_count_is_not_available_not_zero() {
        let rec = record(&["", "Italy", "2020-02-28T15:03:26", "n/a", "", "46"]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();

        assert_eq!(parsed.row.confirmed, Count::NotAvailable);
        assert_eq!(parsed.row.deaths, Count::NotAvailable);
        assert_eq!(parsed.row.recovered, Count::Value(46));
        let fields: Vec<_> = parsed.issues.iter().map(|i| i.field).collect();
        assert_eq!(fields, vec!["confirmed", "deaths"]);
    }

    #[test]
    fn unreadable_date_is_null_and_recorded() {
        let rec = record(&["Hubei", "China", "sometime in spring", "1", "0", "0"]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();

        assert_eq!(parsed.row.date, None);
        assert_eq!(parsed.issues[0].kind, IssueKind::UnparseableDate);
        assert_eq!(parsed.row.observation_key(), "China|Hubei|None");
    }

    #[test]
    fn fractional_seconds_keep_reports_apart() {
        let row = |date: &str| {
            parse_row(Layout::Old, &record(&["Hubei", "China", date, "1", "0", "0"]))
                .unwrap()
                .row
        };
        let early = row("2020-03-22T23:45:00.100");
        let late = row("2020-03-22T23:45:00.900");

        assert_ne!(early.date, late.date);
        assert_ne!(early.observation_key(), late.observation_key());
    }

    #[test]
    fn short_row_is_rejected() {
        let rec = record(&["Hubei", "China", "1/22/2020 17:00"]);
        assert_eq!(
            parse_row(Layout::Old, &rec).unwrap_err(),
            RowError::TooShort { expected: 6, found: 3 }
        );
    }

    #[test]
    fn half_a_coordinate_pair_is_dropped() {
        let rec = record(&["Hubei", "China", "1/22/2020 17:00", "1", "0", "0", "30.9", ""]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();
        assert_eq!(parsed.row.coordinates, None);
        assert_eq!(parsed.issues[0].kind, IssueKind::IncompleteCoordinates);
    }

    #[test]
    fn blank_coordinates_are_silently_absent() {
        let rec = record(&["Hubei", "China", "1/22/2020 17:00", "1", "0", "0", "", ""]);
        let parsed = parse_row(Layout::Old, &rec).unwrap();
        assert_eq!(parsed.row.coordinates, None);
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn date_spellings_from_the_feed() {
        assert_eq!(parse_date("1/22/2020 17:00"), Some(at(2020, 1, 22, 17, 0, 0)));
        assert_eq!(parse_date("1/31/20 23:59"), Some(at(2020, 1, 31, 23, 59, 0)));
        assert_eq!(parse_date("2/1/2020 1:52"), Some(at(2020, 2, 1, 1, 52, 0)));
        assert_eq!(parse_date("2020-02-01T19:43:03"), Some(at(2020, 2, 1, 19, 43, 3)));
        assert_eq!(parse_date("2020-03-22 23:45:00"), Some(at(2020, 3, 22, 23, 45, 0)));
        assert_eq!(parse_date("2020-03-22T23:45:00Z"), Some(at(2020, 3, 22, 23, 45, 0)));
        assert_eq!(parse_date("2020-04-01"), Some(at(2020, 4, 1, 0, 0, 0)));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn counts_tolerate_whitespace_only() {
        assert_eq!(parse_count(" 12 "), Count::Value(12));
        assert_eq!(parse_count("1.0"), Count::NotAvailable);
        assert_eq!(parse_count("-"), Count::NotAvailable);
    }
}
