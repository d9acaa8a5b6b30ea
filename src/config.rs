//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PAYMENT_KEY_SECRET` - Gateway API secret, also keys payment signatures
//!
//! ## Optional
//! - `PAYMENT_KEY_ID` - Gateway API key id (default: empty)
//! - `PAYMENT_CURRENCY` - ISO 4217 currency for gateway orders (default: INR)
//! - `PAYMENT_API_BASE` - Gateway API base URL (default: <https://api.razorpay.com>)
//! - `DATABASE_URL` - `PostgreSQL` connection string for the `postgres` store

use secrecy::SecretString;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_API_BASE: &str = "https://api.razorpay.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub payment: PaymentConfig,
    /// Connection string, contains a password.
    pub database_url: Option<SecretString>,
}

/// Payment gateway settings.
///
/// `Debug` of [`SecretString`] is redacted.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: SecretString,
    pub currency: String,
    pub api_base: String,
}

impl Config {
    /// Load configuration from the process environment, reading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // a missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            payment: PaymentConfig::from_lookup(&lookup)?,
            database_url: lookup("DATABASE_URL").map(SecretString::from),
        })
    }

    /// Configuration for runs without a gateway account: a random signing secret
    /// and no database.
    pub fn offline() -> Self {
        Self {
            payment: PaymentConfig {
                key_id: String::new(),
                key_secret: SecretString::from(Uuid::new_v4().simple().to_string()),
                currency: DEFAULT_CURRENCY.to_string(),
                api_base: DEFAULT_API_BASE.to_string(),
            },
            database_url: None,
        }
    }
}

impl PaymentConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let key_secret = lookup("PAYMENT_KEY_SECRET")
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("PAYMENT_KEY_SECRET".to_string()))?;

        let currency = lookup("PAYMENT_CURRENCY").unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidEnvVar(
                "PAYMENT_CURRENCY".to_string(),
                format!("'{currency}' is not an ISO 4217 code"),
            ));
        }

        Ok(Self {
            key_id: lookup("PAYMENT_KEY_ID").unwrap_or_default(),
            key_secret: SecretString::from(key_secret),
            currency: currency.to_ascii_uppercase(),
            api_base: lookup("PAYMENT_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }
}
