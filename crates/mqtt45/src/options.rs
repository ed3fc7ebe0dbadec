use crate::client::retry::RetryConfig;
use crate::error::{MqttError, Result};
use mqtt45_protocol::{Properties, ProtocolVersion, WillMessage};
use std::time::Duration;

/// Who the session connects as. The client identifier is mutable because
/// a v5 broker may assign one via `assignedClientIdentifier`.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl Identity {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
        }
    }
}

/// Runtime-tunable session timers. `keep_alive` takes effect on the next
/// ping cycle; `ping_enabled` and `connect_timeout` on the next open.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub keep_alive: Duration,
    pub ping_enabled: bool,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            ping_enabled: true,
            ping_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keep_alive.is_zero() {
            return Err(MqttError::Configuration(
                "keep_alive must be greater than zero".to_string(),
            ));
        }
        if self.ping_timeout.is_zero()
            || self.connect_timeout.is_zero()
            || self.publish_timeout.is_zero()
        {
            return Err(MqttError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything an open attempt needs besides the endpoint.
#[derive(Clone)]
pub struct ConnectOptions {
    pub identity: Identity,
    pub protocol_version: ProtocolVersion,
    pub clean_start: bool,
    pub will: Option<WillMessage>,
    /// v5 CONNECT properties (session expiry, receive maximum, auth
    /// method, ...). Ignored on v3.1.1.
    pub properties: Properties,
    pub config: SessionConfig,
    pub retry: Option<RetryConfig>,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            identity: Identity::new(client_id),
            protocol_version: ProtocolVersion::V5,
            clean_start: true,
            will: None,
            properties: Properties::default(),
            config: SessionConfig::default(),
            retry: None,
        }
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: &[u8]) -> Self {
        self.identity.username = Some(username.into());
        self.identity.password = Some(password.to_vec());
        self
    }

    #[must_use]
    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.clean_start = clean_start;
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_ping_enabled(mut self, enabled: bool) -> Self {
        self.config.ping_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.config.publish_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert!(config.ping_enabled);
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_keep_alive_rejected() {
        let config = SessionConfig {
            keep_alive: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_options_builder() {
        let options = ConnectOptions::new("sensor-7")
            .with_protocol_version(ProtocolVersion::V311)
            .with_credentials("user", b"pass")
            .with_clean_start(false)
            .with_keep_alive(Duration::from_secs(15));

        assert_eq!(options.identity.client_id, "sensor-7");
        assert_eq!(options.protocol_version, ProtocolVersion::V311);
        assert_eq!(options.identity.username.as_deref(), Some("user"));
        assert!(!options.clean_start);
        assert_eq!(options.config.keep_alive, Duration::from_secs(15));
    }
}
