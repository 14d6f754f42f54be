//! Client and transport configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection settings shared by consumers and producers
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP endpoint of the instance, e.g. `http://123.mqrest.cn-hangzhou.aliyuncs.com`
    pub endpoint: String,

    /// Instance namespace; omitted for default instances
    pub instance_id: Option<String>,

    pub access_key: String,

    pub secret_key: String,

    /// Temporary STS token
    pub security_token: Option<String>,

    /// Per-request HTTP timeout; must exceed the long-poll wait
    pub request_timeout_seconds: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            instance_id: None,
            access_key: String::new(),
            secret_key: String::new(),
            security_token: None,
            request_timeout_seconds: 40,
        }
    }
}

impl ClientConfig {
    /// Check that the settings needed to reach the service are present
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "endpoint".to_string(),
            });
        }

        let parsed = url::Url::parse(&self.endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("endpoint '{}' is not a valid URL: {}", self.endpoint, e),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigurationError::Invalid {
                message: format!("endpoint scheme must be http or https, got '{}'", parsed.scheme()),
            });
        }

        if self.access_key.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "access_key".to_string(),
            });
        }
        if self.secret_key.is_empty() {
            return Err(ConfigurationError::Missing {
                key: "secret_key".to_string(),
            });
        }

        if self.request_timeout_seconds == 0 {
            return Err(ConfigurationError::Invalid {
                message: "request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// HTTP request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Copy of the settings with credentials masked, for display
    pub fn redacted(&self) -> Self {
        Self {
            access_key: mask(&self.access_key),
            secret_key: mask(&self.secret_key),
            security_token: self.security_token.as_deref().map(mask),
            ..self.clone()
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("instance_id", &self.instance_id)
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &"<redacted>")
            .field(
                "security_token",
                &self.security_token.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Fail with [`ConfigurationError::Missing`] when a required setting is blank
pub(crate) fn require(key: &str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::Missing {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn mask(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let visible: String = value.chars().take(4).collect();
    format!("{}****", visible)
}

/// In-memory transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// How long a received message stays invisible before it is offered again
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
