//! Forecast band read from a file produced by the offline regression job.
//!
//! Two layouts are accepted:
//! - JSON: an array of `{timestamp, low_pred, high_pred}` objects, or a single
//!   such object.
//! - CSV with a `timestamp,low_pred,high_pred` header (extra columns ignored).
//!
//! Timestamps may be RFC 3339 or naive ISO 8601 (read as UTC). The file is
//! re-read on every call so a refreshed forecast is picked up without a
//! restart.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{ForecastProvider, ProviderError};
use crate::domain::{Forecast, Pair};

/// Why a forecast file could not be used.
#[derive(Debug, Error)]
pub enum ForecastFileError {
    #[error("failed to read forecast file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse forecast JSON {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse forecast CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl From<ForecastFileError> for ProviderError {
    fn from(e: ForecastFileError) -> Self {
        match e {
            ForecastFileError::Io { .. } => ProviderError::Unavailable(e.to_string()),
            _ => ProviderError::Malformed(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    timestamp: String,
    low_pred: f64,
    high_pred: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDoc {
    Many(Vec<RawRecord>),
    One(RawRecord),
}

/// Parse an RFC 3339 or naive ISO 8601 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Forecast provider backed by a JSON or CSV file.
#[derive(Debug, Clone)]
pub struct ForecastFile {
    path: PathBuf,
}

impl ForecastFile {
    /// Forecasts read from `path` on every call.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the forecast file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All usable records, sorted by timestamp. A missing file yields none.
    pub fn load(&self) -> Result<Vec<Forecast>, ForecastFileError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "forecast file not found");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ForecastFileError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let raw = if self.is_csv() {
            self.parse_csv(&text)?
        } else {
            self.parse_json(&text)?
        };

        let mut records: Vec<Forecast> = raw
            .into_iter()
            .filter_map(|r| match parse_timestamp(&r.timestamp) {
                Some(timestamp) => Some(Forecast {
                    timestamp,
                    low_pred: r.low_pred,
                    high_pred: r.high_pred,
                }),
                None => {
                    warn!(path = %self.path.display(), timestamp = %r.timestamp, "skipping forecast with unparseable timestamp");
                    None
                }
            })
            .collect();
        records.sort_by_key(|f| f.timestamp);
        Ok(records)
    }

    /// First record at or after `now`. Records entirely in the past mean the
    /// job has not refreshed the file, which counts as no forecast.
    pub fn select(records: &[Forecast], now: DateTime<Utc>) -> Option<Forecast> {
        records.iter().find(|f| f.timestamp >= now).cloned()
    }

    fn is_csv(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
    }

    fn parse_json(&self, text: &str) -> Result<Vec<RawRecord>, ForecastFileError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let doc: JsonDoc = serde_json::from_str(text).map_err(|source| ForecastFileError::Json {
            path: self.path.clone(),
            source,
        })?;
        Ok(match doc {
            JsonDoc::Many(records) => records,
            JsonDoc::One(record) => vec![record],
        })
    }

    fn parse_csv(&self, text: &str) -> Result<Vec<RawRecord>, ForecastFileError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let mut out = Vec::new();
        for row in reader.deserialize::<RawRecord>() {
            match row {
                Ok(record) => out.push(record),
                Err(e) if e.is_io_error() => {
                    return Err(ForecastFileError::Csv {
                        path: self.path.clone(),
                        source: e,
                    })
                }
                Err(e) => warn!(path = %self.path.display(), error = %e, "skipping malformed forecast row"),
            }
        }
        Ok(out)
    }
}

impl ForecastProvider for ForecastFile {
    fn forecast(&self, pair: &Pair, now: DateTime<Utc>) -> Result<Option<Forecast>, ProviderError> {
        let records = self.load()?;
        let selected = Self::select(&records, now);
        if selected.is_none() && !records.is_empty() {
            warn!(%pair, path = %self.path.display(), "forecast file has no record at or after now");
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn pair() -> Pair {
        "ETH/BTC".parse().unwrap()
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn naive_and_offset_timestamps_parse() {
        assert_eq!(parse_timestamp("2025-01-10T00:00:00"), Some(at(10)));
        assert_eq!(parse_timestamp("2025-01-10T00:00:00+00:00"), Some(at(10)));
        assert_eq!(parse_timestamp("2025-01-10 00:00:00"), Some(at(10)));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn json_array_selects_next_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("predicciones.json");
        fs::write(
            &path,
            r#"[
                {"timestamp": "2025-01-12T00:00:00", "high_pred": 0.052, "low_pred": 0.048},
                {"timestamp": "2025-01-11T00:00:00", "high_pred": 0.051, "low_pred": 0.047}
            ]"#,
        )
        .unwrap();
        let provider = ForecastFile::new(&path);

        let f = provider.forecast(&pair(), at(10)).unwrap().unwrap();
        assert_eq!(f.timestamp, at(11));
        assert_eq!(f.low_pred, 0.047);

        let f = provider.forecast(&pair(), at(12)).unwrap().unwrap();
        assert_eq!(f.high_pred, 0.052);

        assert!(provider.forecast(&pair(), at(13)).unwrap().is_none());
    }

    #[test]
    fn single_json_object_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forecast.json");
        fs::write(&path, r#"{"timestamp":"2025-01-11T00:00:00Z","low_pred":0.04,"high_pred":0.05}"#).unwrap();
        let records = ForecastFile::new(&path).load().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn csv_layout_skips_bad_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forecast.csv");
        fs::write(
            &path,
            "timestamp,low_pred,high_pred\n2025-01-11T00:00:00,0.047,0.051\nnot-a-date,0.1,0.2\n2025-01-12T00:00:00,abc,0.05\n",
        )
        .unwrap();
        let records = ForecastFile::new(&path).load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].high_pred, 0.051);
    }

    #[test]
    fn missing_file_is_no_forecast() {
        let dir = TempDir::new().unwrap();
        let provider = ForecastFile::new(dir.path().join("absent.json"));
        assert!(provider.forecast(&pair(), at(10)).unwrap().is_none());
    }

    #[test]
    fn garbage_json_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forecast.json");
        fs::write(&path, "{not json").unwrap();
        let err = ForecastFile::new(&path).forecast(&pair(), at(10)).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
