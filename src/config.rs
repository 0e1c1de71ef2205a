use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Create missing tables on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// Master switch for outbound notifications
    #[serde(default = "default_true_bool")]
    pub notifications_enabled: bool,

    /// Chat webhook URL (Slack-compatible incoming webhook)
    #[serde(default)]
    pub chat_webhook_url: Option<String>,

    /// Messaging bot API base URL (Telegram-compatible)
    #[serde(default)]
    pub messaging_api_url: Option<String>,

    /// Messaging destination chat id
    #[serde(default)]
    pub messaging_chat_id: Option<String>,

    /// Notification rate limiting: sends per window, per channel
    #[serde(default = "default_rate_limit_requests")]
    pub notification_rate_limit_per_window: u32,
    /// Notification rate limiting: window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    pub notification_rate_limit_window_seconds: u64,

    /// Comma-separated recipients for procurement alerts
    #[serde(default)]
    pub procurement_alert_recipients: Option<String>,

    /// Replenishment: stock level each reorder tops up to
    #[validate(range(min = 1))]
    #[serde(default = "default_target_stock_level")]
    pub target_stock_level: i32,

    /// Replenishment: minimum quantity per reorder line
    #[validate(range(min = 1))]
    #[serde(default = "default_reorder_floor_quantity")]
    pub reorder_floor_quantity: i32,

    /// Replenishment: suppress reorders for items ordered within this window
    #[validate(range(min = 0))]
    #[serde(default = "default_dedup_window_days")]
    pub replenishment_dedup_window_days: i64,

    /// Replenishment: expected supplier lead time
    #[validate(range(min = 1))]
    #[serde(default = "default_lead_time_days")]
    pub replenishment_lead_time_days: i64,

    /// Invoice matching: fractional tolerance on amounts and quantities
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_invoice_match_tolerance")]
    pub invoice_match_tolerance: f64,

    /// Stock level at or below which a low-stock alert fires
    #[validate(range(min = 1))]
    #[serde(default = "default_low_stock_alert_threshold")]
    pub low_stock_alert_threshold: i32,

    /// Endpoint that receives purchase order documents for suppliers
    #[serde(default)]
    pub supplier_document_url: Option<String>,

    /// Supplier mapping cache TTL (seconds)
    #[serde(default = "default_mapping_cache_ttl_secs")]
    pub supplier_mapping_cache_ttl_secs: u64,

    /// JSON file mapping product/category names to supplier ids; enables
    /// automatic replenishment when set
    #[serde(default)]
    pub supplier_mapping_file: Option<String>,

    /// Scheduler check intervals (seconds)
    #[serde(default = "default_pending_summary_interval_secs")]
    pub scheduler_pending_summary_interval_secs: u64,
    #[serde(default = "default_overdue_check_interval_secs")]
    pub scheduler_overdue_check_interval_secs: u64,
    #[serde(default = "default_low_stock_interval_secs")]
    pub scheduler_low_stock_interval_secs: u64,
    #[serde(default = "default_daily_digest_interval_secs")]
    pub scheduler_daily_digest_interval_secs: u64,

    /// Scheduler shutdown drain budget (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub scheduler_shutdown_grace_secs: u64,
}

impl AppConfig {
    /// Recipients for procurement alerts, parsed from the comma-separated knob.
    pub fn procurement_recipients(&self) -> Vec<String> {
        self.procurement_alert_recipients
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_rate_limit_requests() -> u32 {
    DEFAULT_RATE_LIMIT_REQUESTS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_true_bool() -> bool {
    true
}

fn default_target_stock_level() -> i32 {
    20
}
fn default_reorder_floor_quantity() -> i32 {
    15
}
fn default_dedup_window_days() -> i64 {
    1
}
fn default_lead_time_days() -> i64 {
    7
}
fn default_invoice_match_tolerance() -> f64 {
    0.02
}
fn default_low_stock_alert_threshold() -> i32 {
    10
}
fn default_mapping_cache_ttl_secs() -> u64 {
    60
}
fn default_pending_summary_interval_secs() -> u64 {
    300
}
fn default_overdue_check_interval_secs() -> u64 {
    300
}
fn default_low_stock_interval_secs() -> u64 {
    60
}
fn default_daily_digest_interval_secs() -> u64 {
    86_400
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP_*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://procurest.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            auto_migrate: true,
            notifications_enabled: true,
            chat_webhook_url: None,
            messaging_api_url: None,
            messaging_chat_id: None,
            notification_rate_limit_per_window: default_rate_limit_requests(),
            notification_rate_limit_window_seconds: default_rate_limit_window_secs(),
            procurement_alert_recipients: Some("buyer@acme.test, ops@acme.test".to_string()),
            target_stock_level: default_target_stock_level(),
            reorder_floor_quantity: default_reorder_floor_quantity(),
            replenishment_dedup_window_days: default_dedup_window_days(),
            replenishment_lead_time_days: default_lead_time_days(),
            invoice_match_tolerance: default_invoice_match_tolerance(),
            low_stock_alert_threshold: default_low_stock_alert_threshold(),
            supplier_document_url: None,
            supplier_mapping_cache_ttl_secs: default_mapping_cache_ttl_secs(),
            supplier_mapping_file: None,
            scheduler_pending_summary_interval_secs: default_pending_summary_interval_secs(),
            scheduler_overdue_check_interval_secs: default_overdue_check_interval_secs(),
            scheduler_low_stock_interval_secs: default_low_stock_interval_secs(),
            scheduler_daily_digest_interval_secs: default_daily_digest_interval_secs(),
            scheduler_shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }

    #[test]
    fn recipients_parse_and_trim() {
        let cfg = base_config();
        assert_eq!(
            cfg.procurement_recipients(),
            vec!["buyer@acme.test".to_string(), "ops@acme.test".to_string()]
        );
    }

    #[test]
    fn recipients_default_empty() {
        let mut cfg = base_config();
        cfg.procurement_alert_recipients = None;
        assert!(cfg.procurement_recipients().is_empty());
    }

    #[test]
    fn tolerance_out_of_range_fails_validation() {
        let mut cfg = base_config();
        cfg.invoice_match_tolerance = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_validate() {
        assert!(base_config().validate().is_ok());
    }
}
