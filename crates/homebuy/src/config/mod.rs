use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub marketplace: MarketplaceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            marketplace: MarketplaceConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Business dials for the offer and payment lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    /// Days a pending offer stays open; `0` disables expiry.
    pub offer_validity_days: u32,
    pub currency: String,
    /// Delivery attempts per availability notification before it is left for retry.
    pub dispatch_attempts: u32,
}

impl MarketplaceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let offer_validity_days = env::var("OFFER_VALIDITY_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidOfferValidity)?;

        let currency = env::var("MARKET_CURRENCY")
            .unwrap_or_else(|_| "USD".to_string())
            .trim()
            .to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidCurrency(currency));
        }

        let dispatch_attempts = env::var("EFFECT_DISPATCH_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<u32>()
            .ok()
            .filter(|attempts| *attempts > 0)
            .ok_or(ConfigError::InvalidDispatchAttempts)?;

        Ok(Self {
            offer_validity_days,
            currency,
            dispatch_attempts,
        })
    }

    pub fn offer_validity(&self) -> Option<Duration> {
        (self.offer_validity_days > 0).then(|| Duration::days(i64::from(self.offer_validity_days)))
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            offer_validity_days: 14,
            currency: "USD".to_string(),
            dispatch_attempts: 3,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidOfferValidity,
    InvalidCurrency(String),
    InvalidDispatchAttempts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidOfferValidity => {
                write!(f, "OFFER_VALIDITY_DAYS must be a non-negative whole number")
            }
            ConfigError::InvalidCurrency(value) => {
                write!(f, "MARKET_CURRENCY must be a three letter code, got '{value}'")
            }
            ConfigError::InvalidDispatchAttempts => {
                write!(f, "EFFECT_DISPATCH_ATTEMPTS must be a positive whole number")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidOfferValidity
            | ConfigError::InvalidCurrency(_)
            | ConfigError::InvalidDispatchAttempts => None,
        }
    }
}
