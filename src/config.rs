use std::path::{Path, PathBuf};

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_db_path() -> String {
    "res/db/athena_data.sqlite".into()
}

fn default_res_dir() -> String {
    "res".into()
}

/// A deliberately short default cadence so a freshly cloned checkout shows
/// activity quickly; production deployments override this in config.
fn default_notification_interval_secs() -> u64 {
    30
}

fn default_market() -> String {
    "shares".into()
}

fn default_engine() -> String {
    "stock".into()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub moex: MoexHints,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_res_dir")]
    pub res_dir: String,
    #[serde(default = "default_notification_interval_secs")]
    pub notification_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            db_path: default_db_path(),
            res_dir: default_res_dir(),
            notification_interval_secs: default_notification_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl GeneralConfig {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    pub fn res_dir(&self) -> PathBuf {
        PathBuf::from(&self.res_dir)
    }
}

/// MOEX adapter default hints: market defaults to shares, engine to stock.
/// A `TickerNaming` carries its own market/engine once resolved; this is
/// only where the defaults used to build one come from.
#[derive(Debug, Deserialize)]
pub struct MoexHints {
    #[serde(default = "default_market")]
    pub market: String,
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for MoexHints {
    fn default() -> Self {
        Self {
            market: default_market(),
            engine: default_engine(),
        }
    }
}

pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_printable_lazy(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.general.notification_interval_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.notification_interval_secs must be > 0".into(),
        }));
    }
    if config.general.fetch_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "general.fetch_timeout_secs must be > 0".into(),
        }));
    }
    if config.moex.market.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "moex.market must not be empty".into(),
        }));
    }
    if config.moex.engine.is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "moex.engine must not be empty".into(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn defaults_applied_when_sections_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.db_path, "res/db/athena_data.sqlite");
        assert_eq!(config.general.notification_interval_secs, 30);
        assert_eq!(config.moex.market, "shares");
        assert_eq!(config.moex.engine, "stock");
    }

    #[test]
    fn zero_notification_interval_rejected() {
        let toml = r#"
[general]
notification_interval_secs = 0
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn blank_moex_market_rejected() {
        let toml = r#"
[moex]
market = ""
"#;
        let config = parse(toml);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn overrides_applied() {
        let toml = r#"
[general]
log_format = "json"
db_path = "/tmp/athena.sqlite"
notification_interval_secs = 1800

[moex]
engine = "futures"
"#;
        let config = parse(toml);
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.general.notification_interval_secs, 1800);
        assert_eq!(config.moex.engine, "futures");
    }
}
