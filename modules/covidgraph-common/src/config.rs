use std::env;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_JHU_URL: &str = "https://codeload.github.com/CSSEGISandData/COVID-19/zip/master";
pub const DEFAULT_WPP_URL: &str = "https://population.un.org/wpp/Download/Files/1_Indicators%20(Standard)/CSV_FILES/WPP2019_PopulationByAgeSex_Medium.csv";

/// Population rows outside this year are dropped.
pub const DEFAULT_REFERENCE_YEAR: i32 = 2019;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    #[serde(skip)]
    pub neo4j_password: String,

    // Data sources
    pub data_dir: PathBuf,
    pub jhu_url: String,
    pub wpp_url: String,
    pub skip_existing: bool,
    pub overwrite_extracted: bool,

    // Demographics
    pub reference_year: i32,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. `from_env` is this
    /// over `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let reference_year = match lookup("COVIDGRAPH_REFERENCE_YEAR") {
            Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    key: "COVIDGRAPH_REFERENCE_YEAR",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?,
            None => DEFAULT_REFERENCE_YEAR,
        };

        Ok(Self {
            neo4j_uri: required("NEO4J_URI")?,
            neo4j_user: required("NEO4J_USER")?,
            neo4j_password: required("NEO4J_PASSWORD")?,
            data_dir: PathBuf::from(required("COVIDGRAPH_DATA_DIR")?),
            jhu_url: lookup("COVIDGRAPH_JHU_URL").unwrap_or_else(|| DEFAULT_JHU_URL.to_string()),
            wpp_url: lookup("COVIDGRAPH_WPP_URL").unwrap_or_else(|| DEFAULT_WPP_URL.to_string()),
            skip_existing: parse_flag(&lookup, "COVIDGRAPH_SKIP_EXISTING", true)?,
            overwrite_extracted: parse_flag(&lookup, "COVIDGRAPH_OVERWRITE", false)?,
            reference_year,
        })
    }

    /// Log the effective configuration without the password.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = "********",
            data_dir = %self.data_dir.display(),
            jhu_url = self.jhu_url.as_str(),
            wpp_url = self.wpp_url.as_str(),
            skip_existing = self.skip_existing,
            overwrite_extracted = self.overwrite_extracted,
            reference_year = self.reference_year,
            "Configuration loaded"
        );
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        "" => Ok(default),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, String> {
        HashMap::from([
            ("NEO4J_URI", "bolt://localhost:7687".to_string()),
            ("NEO4J_USER", "neo4j".to_string()),
            ("NEO4J_PASSWORD", "test".to_string()),
            ("COVIDGRAPH_DATA_DIR", "/tmp/covid".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_vars_unset() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.reference_year, 2019);
        assert!(config.skip_existing);
        assert!(!config.overwrite_extracted);
        assert_eq!(config.jhu_url, DEFAULT_JHU_URL);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/covid"));
    }

    #[test]
    fn missing_password_is_reported_by_name() {
        let mut vars = base_env();
        vars.remove("NEO4J_PASSWORD");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("NEO4J_PASSWORD")));
    }

    #[test]
    fn empty_required_value_counts_as_missing() {
        let mut vars = base_env();
        vars.insert("COVIDGRAPH_DATA_DIR", String::new());
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Missing("COVIDGRAPH_DATA_DIR")
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = base_env();
        vars.insert("COVIDGRAPH_REFERENCE_YEAR", "2020".to_string());
        vars.insert("COVIDGRAPH_SKIP_EXISTING", "false".to_string());
        vars.insert("COVIDGRAPH_OVERWRITE", "yes".to_string());
        let config = load(&vars).unwrap();
        assert_eq!(config.reference_year, 2020);
        assert!(!config.skip_existing);
        assert!(config.overwrite_extracted);
    }

    #[test]
    fn bad_year_is_invalid() {
        let mut vars = base_env();
        vars.insert("COVIDGRAPH_REFERENCE_YEAR", "twenty".to_string());
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { key: "COVIDGRAPH_REFERENCE_YEAR", .. }
        ));
    }
}
