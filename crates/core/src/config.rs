use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DRIP__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sendgrid: SendGridConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How the trigger decides when to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Once per day at `daily_at` (UTC).
    Daily,
    /// Every `interval_secs` seconds.
    Interval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_trigger_mode")]
    pub mode: TriggerMode,
    /// `HH:MM` in UTC, only used in daily mode.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Fire one run immediately on startup before following the schedule.
    #[serde(default)]
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Attempts per (enrollment, step) before the enrollment is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on concurrent transport calls within one run.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// A pending claim older than this is considered crashed and may be reclaimed.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// JSON snapshot written after every run and loaded at startup.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    /// Without an API key the dry-run transport is used.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_sendgrid_url")]
    pub api_url: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_true")]
    pub open_tracking: bool,
    #[serde(default = "default_true")]
    pub click_tracking: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_trigger_mode() -> TriggerMode {
    TriggerMode::Daily
}
fn default_daily_at() -> String {
    "09:00".to_string()
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_max_attempts() -> u32 {
    5
}
fn default_max_concurrent_sends() -> usize {
    8
}
fn default_claim_lease_secs() -> u64 {
    900
}
fn default_sendgrid_url() -> String {
    "https://api.sendgrid.com/v3/mail/send".to_string()
}
fn default_from_email() -> String {
    "hello@example.com".to_string()
}
fn default_from_name() -> String {
    "Drip".to_string()
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: default_trigger_mode(),
            daily_at: default_daily_at(),
            interval_secs: default_interval_secs(),
            run_on_start: false,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_concurrent_sends: default_max_concurrent_sends(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_sendgrid_url(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            open_tracking: true,
            click_tracking: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            trigger: TriggerConfig::default(),
            dispatch: DispatchConfig::default(),
            storage: StorageConfig::default(),
            sendgrid: SendGridConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file overlaid with
    /// environment variables (`DRIP__DISPATCH__MAX_ATTEMPTS=3`).
    pub fn load(config_file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("DRIP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}
