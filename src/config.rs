//! Runtime configuration.
//!
//! Everything is env-driven with sensible defaults; credentials can also be
//! supplied through a `credentials.json` next to the binary so packaged
//! installs work without environment setup.

use serde::Deserialize;
use std::path::PathBuf;

/// Exchange login credentials.
#[derive(Debug, Clone, Default)]
pub struct ExchangeCredentials {
    pub app_key: String,
    pub username: String,
    pub password: String,
}

impl ExchangeCredentials {
    pub fn is_configured(&self) -> bool {
        !self.app_key.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,

    // Value filter and staking
    pub ev_threshold: f64,
    pub kelly_fraction: f64,
    pub min_stake_units: f64,
    pub max_stake_units: f64,
    /// One betting unit as a fraction of bankroll.
    pub unit_fraction: f64,
    pub commission_rate: f64,

    // Model inputs
    pub rolling_window_months: u32,
    pub default_rank: i64,
    pub default_elo: f64,

    // Scheduling
    pub capture_interval_minutes: u64,
    pub capture_hours_ahead: u32,
    pub http_timeout_seconds: u64,
    pub auto_mode: bool,

    // External collaborators (all optional)
    pub exchange: ExchangeCredentials,
    pub sharp_odds_api_key: Option<String>,
    pub cloud_url: Option<String>,
    pub cloud_key: Option<String>,
    pub webhook_url: Option<String>,

    // Name resolver mapping table
    pub name_mappings_path: PathBuf,
}

/// Shape of the optional credentials.json file.
#[derive(Debug, Default, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    exchange_app_key: String,
    #[serde(default)]
    exchange_username: String,
    #[serde(default)]
    exchange_password: String,
    #[serde(default)]
    sharp_odds_api_key: Option<String>,
    #[serde(default)]
    cloud_url: Option<String>,
    #[serde(default)]
    cloud_key: Option<String>,
    #[serde(default)]
    webhook_url: Option<String>,
}

fn load_credentials_file() -> CredentialsFile {
    let path = std::env::var("CREDENTIALS_PATH").unwrap_or_else(|_| "./credentials.json".into());
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
        Err(_) => CredentialsFile::default(),
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let creds = load_credentials_file();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./courtedge.db".to_string());

        let auto_mode = std::env::var("AUTO_MODE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);

        Ok(Self {
            database_path,
            ev_threshold: env_f64("EV_THRESHOLD", 0.05),
            kelly_fraction: env_f64("KELLY_FRACTION", 0.25),
            min_stake_units: env_f64("MIN_STAKE_UNITS", 0.5),
            max_stake_units: env_f64("MAX_STAKE_UNITS", 3.0),
            unit_fraction: env_f64("UNIT_FRACTION", 0.05),
            commission_rate: env_f64("COMMISSION_RATE", 0.05),
            rolling_window_months: env_u64("ROLLING_WINDOW_MONTHS", 12) as u32,
            default_rank: env_u64("DEFAULT_RANK", 1500) as i64,
            default_elo: env_f64("DEFAULT_ELO", 1200.0),
            capture_interval_minutes: env_u64("CAPTURE_INTERVAL_MINUTES", 30),
            capture_hours_ahead: env_u64("CAPTURE_HOURS_AHEAD", 48) as u32,
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 15),
            auto_mode,
            exchange: ExchangeCredentials {
                app_key: env_opt("EXCHANGE_APP_KEY")
                    .unwrap_or(creds.exchange_app_key),
                username: env_opt("EXCHANGE_USERNAME")
                    .unwrap_or(creds.exchange_username),
                password: env_opt("EXCHANGE_PASSWORD")
                    .unwrap_or(creds.exchange_password),
            },
            sharp_odds_api_key: env_opt("SHARP_ODDS_API_KEY").or(creds.sharp_odds_api_key),
            cloud_url: env_opt("CLOUD_URL").or(creds.cloud_url),
            cloud_key: env_opt("CLOUD_KEY").or(creds.cloud_key),
            webhook_url: env_opt("WEBHOOK_URL").or(creds.webhook_url),
            name_mappings_path: std::env::var("NAME_MAPPINGS_PATH")
                .unwrap_or_else(|_| "./data/name_mappings.json".to_string())
                .into(),
        })
    }

    /// Rolling analysis window in days (months are treated as 30 days, the
    /// same convention the Elo recalculation uses).
    pub fn rolling_window_days(&self) -> i64 {
        self.rolling_window_months as i64 * 30
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: ":memory:".to_string(),
            ev_threshold: 0.05,
            kelly_fraction: 0.25,
            min_stake_units: 0.5,
            max_stake_units: 3.0,
            unit_fraction: 0.05,
            commission_rate: 0.05,
            rolling_window_months: 12,
            default_rank: 1500,
            default_elo: 1200.0,
            capture_interval_minutes: 30,
            capture_hours_ahead: 48,
            http_timeout_seconds: 15,
            auto_mode: false,
            exchange: ExchangeCredentials::default(),
            sharp_odds_api_key: None,
            cloud_url: None,
            cloud_key: None,
            webhook_url: None,
            name_mappings_path: PathBuf::from("./data/name_mappings.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.ev_threshold, 0.05);
        assert_eq!(cfg.kelly_fraction, 0.25);
        assert_eq!(cfg.commission_rate, 0.05);
        assert_eq!(cfg.rolling_window_days(), 360);
    }
}
