use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8686;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_RELOAD_DEBOUNCE_MS: u64 = 5_000; // quiet window before a reload runs
pub const DEFAULT_VALUE_TIMEOUT_MS: u64 = 5_000; // per-cycle wait for a device payload
pub const DEFAULT_FRESHNESS_MINUTES: u64 = 5;

/// Top-level config (sitewatch.toml + SITEWATCH_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SitewatchConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Broker connection shared by every poller in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Capacity of the client request queue (subscribe/publish commands).
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: DEFAULT_MQTT_PORT,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            username: None,
            password: None,
            request_capacity: default_request_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet window after the last reload request before re-initialising.
    #[serde(default = "default_reload_debounce_ms")]
    pub reload_debounce_ms: u64,
    /// How long a poll cycle waits for a device payload before skipping.
    #[serde(default = "default_value_timeout_ms")]
    pub value_timeout_ms: u64,
    #[serde(default = "ServiceConfig::every_minute")]
    pub logging: ServiceConfig,
    #[serde(default = "ServiceConfig::every_ten_minutes")]
    pub billing: ServiceConfig,
    #[serde(default = "ServiceConfig::every_minute")]
    pub calculation: ServiceConfig,
    #[serde(default)]
    pub location: LocationConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reload_debounce_ms: DEFAULT_RELOAD_DEBOUNCE_MS,
            value_timeout_ms: DEFAULT_VALUE_TIMEOUT_MS,
            logging: ServiceConfig::every_minute(),
            billing: ServiceConfig::every_ten_minutes(),
            calculation: ServiceConfig::every_minute(),
            location: LocationConfig::default(),
        }
    }
}

/// Per-service switch and default polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
}

impl ServiceConfig {
    fn every_minute() -> Self {
        Self {
            enabled: true,
            interval_minutes: 1,
        }
    }

    fn every_ten_minutes() -> Self {
        Self {
            enabled: true,
            interval_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// A location is ACTIVE while its topic produced a payload within this window.
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_interval_minutes(),
            freshness_minutes: DEFAULT_FRESHNESS_MINUTES,
        }
    }
}

/// Authentication mode for the configuration-change webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookAuthMode {
    /// HMAC-SHA256 over the raw request body (`X-Signature-256: sha256=<hex>`).
    HmacSha256,
    /// Static bearer token in the Authorization header.
    BearerToken,
    /// No authentication: use only for internal/trusted networks.
    #[default]
    None,
}

/// Configuration-change webhook fired by the dashboard after CRUD writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    /// When false the webhook route returns 404.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auth_mode: WebhookAuthMode,
    /// HMAC signing secret or bearer token value.
    pub secret: Option<String>,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_mode: WebhookAuthMode::None,
            secret: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}
fn default_client_id() -> String {
    "sitewatch-poller".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_request_capacity() -> usize {
    64
}
fn default_reload_debounce_ms() -> u64 {
    DEFAULT_RELOAD_DEBOUNCE_MS
}
fn default_value_timeout_ms() -> u64 {
    DEFAULT_VALUE_TIMEOUT_MS
}
fn default_interval_minutes() -> u64 {
    1
}
fn default_freshness_minutes() -> u64 {
    DEFAULT_FRESHNESS_MINUTES
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sitewatch/sitewatch.db", home)
}

impl SitewatchConfig {
    /// Load config from a TOML file with SITEWATCH_* env var overrides.
    ///
    /// Nested keys use a double underscore so field names keep their own
    /// underscores: `SITEWATCH_SCHEDULER__RELOAD_DEBOUNCE_MS=2000`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::SitewatchError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SITEWATCH_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.sitewatch/sitewatch.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_cadences() {
        let cfg = SitewatchConfig::default();
        assert_eq!(cfg.scheduler.reload_debounce_ms, 5_000);
        assert_eq!(cfg.scheduler.logging.interval_minutes, 1);
        assert_eq!(cfg.scheduler.billing.interval_minutes, 10);
        assert_eq!(cfg.scheduler.location.freshness_minutes, 5);
        assert_eq!(cfg.webhooks.auth_mode, WebhookAuthMode::None);
    }

    #[test]
    fn toml_and_env_are_layered() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "sitewatch.toml",
                r#"
                [mqtt]
                host = "broker.local"

                [scheduler]
                value_timeout_ms = 3000

                [scheduler.billing]
                interval_minutes = 15

                [webhooks]
                auth_mode = "bearer-token"
                secret = "s3cret"
                "#,
            )?;
            jail.set_env("SITEWATCH_SCHEDULER__RELOAD_DEBOUNCE_MS", "1500");
            jail.set_env("SITEWATCH_GATEWAY__PORT", "9000");

            let cfg = SitewatchConfig::load(Some("sitewatch.toml")).expect("load");
            assert_eq!(cfg.mqtt.host, "broker.local");
            assert_eq!(cfg.mqtt.port, DEFAULT_MQTT_PORT);
            assert_eq!(cfg.scheduler.value_timeout_ms, 3000);
            assert_eq!(cfg.scheduler.reload_debounce_ms, 1500);
            assert_eq!(cfg.scheduler.billing.interval_minutes, 15);
            assert!(cfg.scheduler.billing.enabled);
            assert_eq!(cfg.gateway.port, 9000);
            assert_eq!(cfg.webhooks.auth_mode, WebhookAuthMode::BearerToken);
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let cfg = SitewatchConfig::load(Some("does-not-exist.toml")).expect("load");
            assert_eq!(cfg.gateway.port, DEFAULT_PORT);
            assert_eq!(cfg.scheduler.calculation.interval_minutes, 1);
            Ok(())
        });
    }
}
