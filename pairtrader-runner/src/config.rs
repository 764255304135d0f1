//! TOML bot configuration.
//!
//! ```toml
//! [pair]
//! symbol = "ETH/BTC"
//!
//! [decision]
//! mode = "forecast_band"
//! fee_rate = 0.001
//!
//! [paths]
//! ledger = "data/operaciones.csv"
//! ```
//!
//! Every section except `[pair]` and `[paths]` may be omitted. Relative
//! paths in a file loaded with [`BotConfig::from_file`] are resolved against
//! the file's directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pairtrader_core::domain::Pair;
use pairtrader_core::engine::{DecisionConfig, DecisionConfigError, DecisionMode};
use pairtrader_core::provider::ExchangeSettings;

/// Longest accepted cycle interval: one day.
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Longest accepted backoff wait: one week.
pub const MAX_BACKOFF_SECS: u64 = 7 * 24 * 60 * 60;

/// Why a config file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid decision settings: {0}")]
    Decision(#[from] DecisionConfigError),
}

/// Complete bot configuration, one section per TOML table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    pub pair: PairSection,
    #[serde(default)]
    pub decision: DecisionSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
}

/// The traded pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairSection {
    pub symbol: Pair,
}

/// Decision rule settings; see [`DecisionConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecisionSection {
    pub mode: DecisionMode,
    pub fee_rate: f64,
    pub min_profit_rate: f64,
    pub staleness_minutes: i64,
    pub proximity_tolerance: f64,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            mode: DecisionMode::ForecastBand,
            fee_rate: 0.001,
            min_profit_rate: 0.005,
            staleness_minutes: 60,
            proximity_tolerance: 0.1,
        }
    }
}

/// Files the bot reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    pub ledger: PathBuf,
    #[serde(default)]
    pub forecast: Option<PathBuf>,
    #[serde(default)]
    pub decision_log: Option<PathBuf>,
}

/// Where the paper exchange gets its prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    #[default]
    Http,
    Replay,
}

/// Price source and paper account settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeSection {
    pub price_source: PriceSourceKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub replay_file: Option<PathBuf>,
    pub slippage_bps: f64,
    pub paper_base: f64,
    pub paper_quote: f64,
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            price_source: PriceSourceKind::Http,
            base_url: "https://api.binance.com".into(),
            api_key: None,
            replay_file: None,
            slippage_bps: 5.0,
            paper_base: 0.0,
            paper_quote: 0.01,
        }
    }
}

/// Cycle timing for `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSection {
    pub interval_secs: u64,
    pub max_backoff_secs: u64,
    pub call_timeout_secs: u64,
    /// 0 runs until stopped.
    pub max_cycles: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_backoff_secs: 600,
            call_timeout_secs: 10,
            max_cycles: 0,
        }
    }
}

impl ScheduleSection {
    /// Time between cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Longest wait after repeated unhealthy cycles.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Deadline for each collaborator call within a cycle.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl BotConfig {
    /// Load, validate, and resolve relative paths against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Parse and validate. Paths are left as written.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(format!("serialize config: {e}")))
    }

    /// Check every section, including the derived decision config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_decision_config()?.validate()?;

        if self.paths.ledger.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("paths.ledger must not be empty".into()));
        }

        let ex = &self.exchange;
        if !(ex.slippage_bps.is_finite() && ex.slippage_bps >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "exchange.slippage_bps must be >= 0, got {}",
                ex.slippage_bps
            )));
        }
        for (name, value) in [("paper_base", ex.paper_base), ("paper_quote", ex.paper_quote)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "exchange.{name} must be >= 0, got {value}"
                )));
            }
        }
        match ex.price_source {
            PriceSourceKind::Http if ex.base_url.trim().is_empty() => {
                return Err(ConfigError::Invalid("exchange.base_url is required for the http price source".into()));
            }
            PriceSourceKind::Replay if ex.replay_file.is_none() => {
                return Err(ConfigError::Invalid("exchange.replay_file is required for the replay price source".into()));
            }
            _ => {}
        }

        let s = &self.schedule;
        if s.interval_secs == 0 {
            return Err(ConfigError::Invalid("schedule.interval_secs must be > 0".into()));
        }
        if s.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid("schedule.call_timeout_secs must be > 0".into()));
        }
        if s.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "schedule.interval_secs must be <= {MAX_INTERVAL_SECS}, got {}",
                s.interval_secs
            )));
        }
        if s.max_backoff_secs > MAX_BACKOFF_SECS {
            return Err(ConfigError::Invalid(format!(
                "schedule.max_backoff_secs must be <= {MAX_BACKOFF_SECS}, got {}",
                s.max_backoff_secs
            )));
        }
        if s.max_backoff_secs < s.interval_secs {
            return Err(ConfigError::Invalid(
                "schedule.max_backoff_secs must be >= schedule.interval_secs".into(),
            ));
        }
        Ok(())
    }

    /// Engine settings for this config.
    pub fn to_decision_config(&self) -> Result<DecisionConfig, ConfigError> {
        if self.decision.staleness_minutes < 0 {
            return Err(DecisionConfigError::NegativeStaleness.into());
        }
        Ok(DecisionConfig {
            pair: self.pair.symbol.clone(),
            fee_rate: self.decision.fee_rate,
            min_profit_rate: self.decision.min_profit_rate,
            staleness_threshold: chrono::Duration::minutes(self.decision.staleness_minutes),
            proximity_tolerance: self.decision.proximity_tolerance,
            mode: self.decision.mode,
        })
    }

    /// Connection settings for exchange adapters; a blank API key is dropped.
    pub fn exchange_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            base_url: self.exchange.base_url.clone(),
            api_key: self
                .exchange
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            timeout: self.schedule.call_timeout(),
        }
    }

    /// BLAKE3 over the pair and decision section. Two runs with the same
    /// fingerprint made their decisions under identical rules.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!({
            "pair": self.pair.symbol.to_string(),
            "decision": &self.decision,
        });
        blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string()
    }

    fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.paths.ledger);
        if let Some(p) = self.paths.forecast.as_mut() {
            rebase(p);
        }
        if let Some(p) = self.paths.decision_log.as_mut() {
            rebase(p);
        }
        if let Some(p) = self.exchange.replay_file.as_mut() {
            rebase(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [pair]
        symbol = "ETH/BTC"

        [decision]
        mode = "min_profit"
        fee_rate = 0.001
        min_profit_rate = 0.01
        staleness_minutes = 120
        proximity_tolerance = 0.05

        [paths]
        ledger = "data/operaciones.csv"
        forecast = "data/predicciones.json"
        decision_log = "data/decisions.jsonl"

        [exchange]
        price_source = "replay"
        replay_file = "data/historial_ETH_BTC.csv"
        api_key = ""
        slippage_bps = 2.5
        paper_quote = 1.0

        [schedule]
        interval_secs = 3600
        max_backoff_secs = 7200
        call_timeout_secs = 5
        max_cycles = 10
    "#;

    const MINIMAL: &str = r#"
        [pair]
        symbol = "eth/btc"

        [paths]
        ledger = "ops.csv"
    "#;

    #[test]
    fn parses_full_config() {
        let c = BotConfig::from_toml(FULL).unwrap();
        assert_eq!(c.pair.symbol.to_string(), "ETH/BTC");
        assert_eq!(c.decision.mode, DecisionMode::MinProfit);
        assert_eq!(c.exchange.price_source, PriceSourceKind::Replay);
        assert_eq!(c.schedule.max_cycles, 10);

        let d = c.to_decision_config().unwrap();
        assert_eq!(d.staleness_threshold, chrono::Duration::minutes(120));
        assert_eq!(d.min_profit_rate, 0.01);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let c = BotConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(c.decision, DecisionSection::default());
        assert_eq!(c.schedule, ScheduleSection::default());
        assert_eq!(c.exchange.price_source, PriceSourceKind::Http);
        assert!(c.paths.forecast.is_none());
    }

    #[test]
    fn empty_api_key_is_not_sent() {
        let c = BotConfig::from_toml(FULL).unwrap();
        assert_eq!(c.exchange_settings().api_key, None);
        assert_eq!(c.exchange_settings().timeout, Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}\n[schedule]\ninterval = 5\n");
        assert!(matches!(BotConfig::from_toml(&text), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn bad_values_are_rejected() {
        let fee = MINIMAL.replace("[paths]", "[decision]\nfee_rate = 1.5\n\n[paths]");
        assert!(matches!(BotConfig::from_toml(&fee), Err(ConfigError::Decision(_))));

        let replay = format!("{MINIMAL}\n[exchange]\nprice_source = \"replay\"\n");
        assert!(matches!(BotConfig::from_toml(&replay), Err(ConfigError::Invalid(_))));

        let interval = format!("{MINIMAL}\n[schedule]\ninterval_secs = 0\n");
        assert!(matches!(BotConfig::from_toml(&interval), Err(ConfigError::Invalid(_))));

        let pair = MINIMAL.replace("eth/btc", "ETHBTC");
        assert!(BotConfig::from_toml(&pair).is_err());
    }

    #[test]
    fn schedule_waits_are_bounded() {
        let interval = format!(
            "{MINIMAL}\n[schedule]\ninterval_secs = {}\nmax_backoff_secs = {}\n",
            MAX_INTERVAL_SECS + 1,
            MAX_BACKOFF_SECS
        );
        assert!(matches!(BotConfig::from_toml(&interval), Err(ConfigError::Invalid(_))));

        let backoff = format!("{MINIMAL}\n[schedule]\nmax_backoff_secs = 9223372036854775807\n");
        assert!(matches!(BotConfig::from_toml(&backoff), Err(ConfigError::Invalid(_))));

        let widest = format!(
            "{MINIMAL}\n[schedule]\ninterval_secs = {MAX_INTERVAL_SECS}\nmax_backoff_secs = {MAX_BACKOFF_SECS}\n"
        );
        let config = BotConfig::from_toml(&widest).unwrap();
        assert_eq!(config.schedule.max_backoff(), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn fingerprint_tracks_decision_rules_only() {
        let a = BotConfig::from_toml(MINIMAL).unwrap();
        let mut b = a.clone();
        b.schedule.interval_secs = 999;
        b.paths.ledger = "elsewhere.csv".into();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.decision.proximity_tolerance = 0.2;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        fs::write(&path, FULL).unwrap();
        let c = BotConfig::from_file(&path).unwrap();
        assert_eq!(c.paths.ledger, dir.path().join("data/operaciones.csv"));
        assert_eq!(
            c.exchange.replay_file.as_deref(),
            Some(dir.path().join("data/historial_ETH_BTC.csv").as_path())
        );
    }

    #[test]
    fn toml_round_trip() {
        let c = BotConfig::from_toml(FULL).unwrap();
        let text = c.to_toml().unwrap();
        assert_eq!(BotConfig::from_toml(&text).unwrap(), c);
    }
}
