use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DATABASE_URL: &str = "sqlite://toolroom.db?mode=rwc";
const CONFIG_DIR: &str = "config";
const DEFAULT_PAGE_SIZE: u64 = 10;
const DEFAULT_MAX_PAGE_SIZE: u64 = 100;
const DEFAULT_STORAGE_LOCATION: &str = crate::entities::STORAGE_LOCATION;

/// Tool catalog listing configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    /// Fixed page size used by the filtered tool listing
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub page_size: u64,

    /// Upper bound a caller may request when overriding the page size
    #[serde(default = "default_max_page_size")]
    #[validate(range(min = 1, max = 1000))]
    pub max_page_size: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Movement ledger configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Location value that means "in storage"
    #[serde(default = "default_storage_location")]
    #[validate(length(min = 1, max = 120))]
    pub storage_location: String,

    /// Wrap the history write and the tool write of each movement in one transaction.
    /// Turn off only for stores without transactions; failures then surface as partial updates.
    #[serde(default = "default_true_bool")]
    pub atomic_writes: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            storage_location: default_storage_location(),
            atomic_writes: true,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

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

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1, max = 100000))]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub catalog: CatalogConfig,

    #[serde(default)]
    #[validate]
    pub ledger: LedgerConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the store and environment
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            catalog: CatalogConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationError> {
        if self.catalog.page_size > self.catalog.max_page_size {
            let mut err = ValidationError::new("catalog_page_size");
            err.message = Some("catalog.page_size must not exceed catalog.max_page_size".into());
            return Err(err);
        }
        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            return Err(err);
        }
        if self.is_production() && !self.ledger.atomic_writes {
            let mut err = ValidationError::new("ledger_atomic_writes");
            err.message = Some(
                "ledger.atomic_writes may only be disabled outside production".into(),
            );
            return Err(err);
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Configuration constraint violated: {0}")]
    Constraint(ValidationError),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> u64 {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_storage_location() -> String {
    DEFAULT_STORAGE_LOCATION.to_string()
}

fn default_true_bool() -> bool {
    true
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
    256
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("toolroom={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_target(false)
            .try_init();
    }
}

/// Loads application configuration from `config/` relative to the working directory
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (`{dir}/default.toml`)
/// 3. Environment-specific config (`{dir}/{env}.toml`)
/// 4. Environment variables (`APP__*`, `__` separating nested keys)
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint violated: {:?}", e);
        AppConfigError::Constraint(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
