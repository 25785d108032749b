use std::{fmt, path::PathBuf, time::Duration};

use anyhow::bail;
use serde::Deserialize;

/// Longest accepted token window: 30 days.
const MAX_TOKEN_TTL_MINUTES: i64 = 30 * 24 * 60;

/// Deployment mode. Development exposes routine diagnostics to callers and
/// redirects outbound mail to `DEV_EMAIL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }

    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            _ => Environment::Production,
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub use_tls: bool,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    pub dir: PathBuf,
    pub timeout_secs: u64,
}

impl ScriptsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    /// When unset the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub public_base_url: String,
    pub token_ttl_minutes: i64,
    pub smtp: SmtpConfig,
    pub dev_email: Option<String>,
    pub scripts: ScriptsConfig,
    pub mail_retry_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub mail_retry_base_delay_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::parse(
            &std::env::var("APP_ENV").unwrap_or_else(|_| "production".into()),
        );
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let token_ttl_minutes = checked_token_ttl(parse_or("TOKEN_TTL_MINUTES", 60))?;

        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".into()),
            port: parse_or("SMTP_PORT", 587),
            username: std::env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
            password: std::env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
            // Left empty when unset; requests fail fast on an invalid sender.
            from_address: std::env::var("SMTP_FROM_ADDRESS").unwrap_or_default(),
            from_name: std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Provisio".into()),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),
        };

        let scripts = ScriptsConfig {
            dir: std::env::var("SCRIPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./scripts")),
            timeout_secs: parse_or("SCRIPT_TIMEOUT_SECS", 120),
        };

        Ok(Self {
            environment,
            database_url,
            public_base_url,
            token_ttl_minutes,
            smtp,
            dev_email: std::env::var("DEV_EMAIL").ok().filter(|v| !v.is_empty()),
            scripts,
            mail_retry_attempts: parse_or("MAIL_RETRY_ATTEMPTS", 3),
            mail_retry_base_delay_ms: parse_or("MAIL_RETRY_BASE_DELAY_MS", 500),
        })
    }

    pub fn token_ttl_ms(&self) -> i64 {
        self.token_ttl_minutes * 60 * 1000
    }

    pub fn mail_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.mail_retry_base_delay_ms)
    }

    /// Recipient override for outbound mail; only honoured in development.
    pub fn mail_redirect(&self) -> Option<String> {
        if self.environment.is_development() {
            self.dev_email.clone()
        } else {
            None
        }
    }
}

fn checked_token_ttl(minutes: i64) -> anyhow::Result<i64> {
    if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&minutes) {
        bail!("TOKEN_TTL_MINUTES must be between 1 and {MAX_TOKEN_TTL_MINUTES}, got {minutes}");
    }
    Ok(minutes)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_defaults_to_production() {
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse(" Dev "), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Production);
        assert_eq!(Environment::parse(""), Environment::Production);
    }

    #[test]
    fn token_ttl_must_be_positive_and_bounded() {
        assert_eq!(checked_token_ttl(60).unwrap(), 60);
        assert_eq!(
            checked_token_ttl(MAX_TOKEN_TTL_MINUTES).unwrap(),
            MAX_TOKEN_TTL_MINUTES
        );
        assert!(checked_token_ttl(0).is_err());
        assert!(checked_token_ttl(-5).is_err());
        assert!(checked_token_ttl(MAX_TOKEN_TTL_MINUTES + 1).is_err());
        assert!(checked_token_ttl(i64::MAX).is_err());
    }

    #[test]
    fn mail_retry_delay_comes_from_config() {
        let mut config = crate::testing::test_config(Environment::Production);
        config.mail_retry_base_delay_ms = 250;
        assert_eq!(config.mail_retry_base_delay(), Duration::from_millis(250));
    }

    #[test]
    fn smtp_debug_redacts_password() {
        let smtp = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("mailer".into()),
            password: Some("hunter22".into()),
            from_address: "noreply@example.com".into(),
            from_name: "Provisio".into(),
            use_tls: true,
        };
        let out = format!("{:?}", smtp);
        assert!(!out.contains("hunter22"));
        assert!(out.contains("[redacted]"));
    }
}
