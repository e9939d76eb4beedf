use crate::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SCHEDULER_POLL_SECS};
use crate::errors::ConfigError;
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

/// Deployment environment for the service.
///
/// In `Development`, outbound email is redirected to the configured
/// redirect address instead of the real recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl TryFrom<String> for Environment {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        match value.as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment { value }),
        }
    }
}

/// Sender address configuration.
///
/// Accepts either a bare address (`noreply@example.com`) or a display-name
/// form (`Mailflow <noreply@example.com>`).
#[derive(Clone, Debug)]
pub struct FromAddress(String);

impl TryFrom<String> for FromAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        if value.contains('@') {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidEmailAddress { address: value })
        }
    }
}

impl AsRef<str> for FromAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Address that development-mode and test emails are redirected to.
#[derive(Clone, Debug)]
pub struct RedirectAddress(String);

impl TryFrom<String> for RedirectAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        if value.contains('@') {
            Ok(Self(value))
        } else {
            Err(ConfigError::InvalidEmailAddress { address: value })
        }
    }
}

impl AsRef<str> for RedirectAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Interval between scheduler polls for due delayed work.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerPollInterval(Duration);

impl Default for SchedulerPollInterval {
    fn default() -> Self {
        Self(Duration::from_secs(DEFAULT_SCHEDULER_POLL_SECS))
    }
}

impl TryFrom<String> for SchedulerPollInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let secs = value
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidDuration {
                value: value.clone(),
            })?;
        if secs == 0 {
            return Err(ConfigError::InvalidDuration { value });
        }
        Ok(Self(Duration::from_secs(secs)))
    }
}

impl AsRef<Duration> for SchedulerPollInterval {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

/// Buffer size for the scheduled-work queue.
#[derive(Clone, Copy, Debug)]
pub struct QueueCapacity(usize);

impl Default for QueueCapacity {
    fn default() -> Self {
        Self(DEFAULT_QUEUE_CAPACITY)
    }
}

impl TryFrom<String> for QueueCapacity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let capacity = value
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidCapacity {
                value: value.clone(),
            })?;
        if capacity == 0 {
            return Err(ConfigError::InvalidCapacity { value });
        }
        Ok(Self(capacity))
    }
}

impl AsRef<usize> for QueueCapacity {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Service configuration loaded from environment variables.
///
/// Required variables:
/// - `FROM_EMAIL`: sender address for outbound email
///
/// Optional variables:
/// - `MAILFLOW_ENV`: `development` (default) or `production`
/// - `RESEND_API_KEY`: provider API key; without it only the in-memory
///   transport can be used
/// - `DEV_EMAIL_REDIRECT`: redirect target for development/test sends
///   (default `test@example.com`)
/// - `DATABASE_URL`: PostgreSQL connection string; without it the in-memory
///   storages are used
/// - `SCHEDULER_POLL_SECS`: seconds between scheduler polls (default 10)
/// - `QUEUE_CAPACITY`: scheduled-work queue buffer size (default 1000)
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub from_address: FromAddress,
    pub redirect_address: RedirectAddress,
    pub resend_api_key: Option<String>,
    pub database_url: Option<String>,
    pub scheduler_poll_interval: SchedulerPollInterval,
    pub queue_capacity: QueueCapacity,
    pub version: String,
}

impl Config {
    pub fn new() -> Result<Self> {
        let environment = match std::env::var("MAILFLOW_ENV") {
            Ok(value) => Environment::try_from(value)?,
            Err(_) => Environment::Development,
        };

        let from_address = std::env::var("FROM_EMAIL")
            .map_err(|_| ConfigError::EnvVarRequired {
                var_name: "FROM_EMAIL".to_string(),
            })
            .and_then(FromAddress::try_from)?;

        let redirect_address = RedirectAddress::try_from(
            std::env::var("DEV_EMAIL_REDIRECT").unwrap_or_else(|_| "test@example.com".to_string()),
        )?;

        let resend_api_key = std::env::var("RESEND_API_KEY").ok().filter(|v| !v.is_empty());
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let scheduler_poll_interval = match std::env::var("SCHEDULER_POLL_SECS") {
            Ok(value) => SchedulerPollInterval::try_from(value)?,
            Err(_) => SchedulerPollInterval::default(),
        };

        let queue_capacity = match std::env::var("QUEUE_CAPACITY") {
            Ok(value) => QueueCapacity::try_from(value)?,
            Err(_) => QueueCapacity::default(),
        };

        Ok(Self {
            environment,
            from_address,
            redirect_address,
            resend_api_key,
            database_url,
            scheduler_poll_interval,
            queue_capacity,
            version: version(),
        })
    }
}

/// Service version from compile-time package metadata.
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_known_names() {
        assert_eq!(
            Environment::try_from("development".to_string()).unwrap(),
            Environment::Development
        );
        assert_eq!(
            Environment::try_from("prod".to_string()).unwrap(),
            Environment::Production
        );
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn from_address_requires_at_sign() {
        assert!(FromAddress::try_from("Mailflow <noreply@example.com>".to_string()).is_ok());
        assert!(FromAddress::try_from("not-an-address".to_string()).is_err());
    }

    #[test]
    fn poll_interval_rejects_zero() {
        assert!(SchedulerPollInterval::try_from("0".to_string()).is_err());
        assert!(SchedulerPollInterval::try_from("30".to_string()).is_ok());
    }
}
