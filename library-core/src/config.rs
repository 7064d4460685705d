//! Configuration for the lending backend

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Loan policy
    pub loans: LoanPolicy,

    /// Fine pricing
    pub fines: FineConfig,

    /// Payment gateway credentials
    pub gateway: GatewayConfig,

    /// Catalog settings
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "shelfwise".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            loans: LoanPolicy::default(),
            fines: FineConfig::default(),
            gateway: GatewayConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

/// Loan policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanPolicy {
    /// Loan period in days (due at end of that day)
    pub loan_period_days: i64,

    /// Maximum active loans per borrower
    pub max_active_loans: usize,

    /// Days granted to return a book after paying its fine
    pub grace_days_after_payment: i64,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_period_days: 30,
            max_active_loans: 4,
            grace_days_after_payment: 1,
        }
    }
}

/// Fine pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FineConfig {
    /// Amount charged per overdue day, in major units
    pub per_day_rate: Decimal,

    /// ISO 4217 currency code for gateway orders
    pub currency: String,
}

impl Default for FineConfig {
    fn default() -> Self {
        Self {
            per_day_rate: Decimal::from(10),
            currency: "INR".to_string(),
        }
    }
}

/// Payment gateway credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Public key id
    pub key_id: String,

    /// Shared secret used for order auth and callback signatures
    pub key_secret: String,

    /// Gateway API base URL
    pub base_url: String,

    /// Timeout for order creation (milliseconds)
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: String::new(),
            base_url: "https://api.razorpay.com".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// URL used until a thumbnail is uploaded
    pub placeholder_thumbnail_url: String,

    /// Object storage folder for thumbnails
    pub thumbnail_folder: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            placeholder_thumbnail_url:
                "https://res.cloudinary.com/de4zawd4d/image/upload/v1712392736/samples/cloudinary-icon.png"
                    .to_string(),
            thumbnail_folder: "shelfwise/thumbnails".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(key_id) = std::env::var("LIBRARY_GATEWAY_KEY_ID") {
            config.gateway.key_id = key_id;
        }

        if let Ok(secret) = std::env::var("LIBRARY_GATEWAY_SECRET") {
            config.gateway.key_secret = secret;
        }

        if let Ok(url) = std::env::var("LIBRARY_GATEWAY_URL") {
            config.gateway.base_url = url;
        }

        if let Ok(rate) = std::env::var("LIBRARY_FINE_PER_DAY") {
            config.fines.per_day_rate = rate
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid LIBRARY_FINE_PER_DAY: {}", e)))?;
        }

        if let Ok(currency) = std::env::var("LIBRARY_FINE_CURRENCY") {
            config.fines.currency = currency;
        }

        if let Ok(days) = std::env::var("LIBRARY_LOAN_PERIOD_DAYS") {
            config.loans.loan_period_days = days.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LIBRARY_LOAN_PERIOD_DAYS: {}", e))
            })?;
        }

        Ok(config)
    }

    /// Reject configurations the components cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.loans.loan_period_days <= 0 {
            return Err(crate::Error::Config(
                "Loan period must be at least one day".to_string(),
            ));
        }

        if self.loans.max_active_loans == 0 {
            return Err(crate::Error::Config(
                "Max active loans must be positive".to_string(),
            ));
        }

        if self.loans.grace_days_after_payment <= 0 {
            return Err(crate::Error::Config(
                "Grace period after payment must be at least one day".to_string(),
            ));
        }

        if self.fines.per_day_rate <= Decimal::ZERO {
            return Err(crate::Error::Config(
                "Fine per-day rate must be positive".to_string(),
            ));
        }

        if self.fines.currency.len() != 3 {
            return Err(crate::Error::Config(format!(
                "Invalid currency code: {}",
                self.fines.currency
            )));
        }

        if self.gateway.key_secret.is_empty() {
            return Err(crate::Error::Config("Gateway secret is required".to_string()));
        }

        Ok(())
    }
}
