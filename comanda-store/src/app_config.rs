use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Unset runs the service on the in-process store.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Paypal,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub provider: PaymentProvider,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub paypal: Option<PaypalConfig>,
}

fn default_currency() -> String { "MXN".into() }

#[derive(Debug, Deserialize, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Public host of the storefront, used for the return and cancel URLs.
    pub front_host: String,
    pub brand_name: String,
}

fn default_api_base() -> String { "https://api-m.sandbox.paypal.com".into() }

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_interval() -> u64 { 60 }
fn default_batch_size() -> u32 { 50 }

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `COMANDA_PAYMENT__PROVIDER=mock` sets `payment.provider`
            .add_source(config::Environment::with_prefix("COMANDA").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [server]
            port = 3000

            [payment]
            provider = "mock"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, None);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.payment.provider, PaymentProvider::Mock);
        assert_eq!(config.payment.currency, "MXN");
        assert!(!config.reconciliation.enabled);
        assert_eq!(config.reconciliation.interval_seconds, 60);
    }

    #[test]
    fn test_paypal_section() {
        let config = parse(
            r#"
            [server]
            port = 8080

            [database]
            url = "postgres://localhost/comanda"

            [payment]
            provider = "paypal"
            currency = "USD"

            [payment.paypal]
            client_id = "id"
            secret = "secret"
            front_host = "localhost"
            brand_name = "Comanda"

            [reconciliation]
            enabled = true
            batch_size = 10
            "#,
        )
        .unwrap();
        let paypal = config.payment.paypal.unwrap();
        assert_eq!(paypal.api_base, "https://api-m.sandbox.paypal.com");
        assert_eq!(config.payment.currency, "USD");
        assert!(config.reconciliation.enabled);
        assert_eq!(config.reconciliation.batch_size, 10);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = parse(
            r#"
            [server]
            port = 8080
            [payment]
            provider = "stripe"
            "#,
        );
        assert!(result.is_err());
    }
}
