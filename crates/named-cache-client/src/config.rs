use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Environment variable that selects the default for `tls_enabled` when the
/// session is built without an explicit value.
pub const TLS_ENABLED_ENV: &str = "TLS_ENABLED";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("tlsEnabled is set but {0} was not provided")]
    MissingTlsMaterial(&'static str),
}

/// Session-level configuration recognized by the transport. Bootstrapping
/// the actual connection (DNS, TLS handshake) is out of scope for this
/// crate; `SessionConfig` only carries the fields this client promises.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub address: String,
    pub request_timeout: Duration,
    pub tls_enabled: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub format: String,
}

impl SessionConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MILLIS),
            tls_enabled: tls_enabled_from_env(),
            ca_cert_path: None,
            client_cert_path: None,
            client_key_path: None,
            format: "json".to_string(),
        }
    }

    pub fn with_request_timeout_millis(mut self, millis: u64) -> Self {
        self.request_timeout = Duration::from_millis(millis);
        self
    }

    pub fn with_tls_enabled(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Validates that TLS material is present whenever TLS is requested.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tls_enabled && self.ca_cert_path.is_none() {
            return Err(ConfigError::MissingTlsMaterial("caCertPath"));
        }
        Ok(())
    }
}

const DEFAULT_REQUEST_TIMEOUT_MILLIS: u64 = 30_000;

fn tls_enabled_from_env() -> bool {
    match std::env::var(TLS_ENABLED_ENV) {
        Ok(value) => matches!(value.as_str(), "true" | "1" | "True" | "TRUE"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_requires_ca_cert_when_tls_enabled() {
        let config = SessionConfig::new("https://example.invalid:1408").with_tls_enabled(true);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTlsMaterial("caCertPath"))
        ));
    }

    #[test]
    fn validate_passes_without_tls() {
        let config = SessionConfig::new("https://example.invalid:1408");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_passes_with_tls_and_ca_cert() {
        let config = SessionConfig::new("https://example.invalid:1408")
            .with_tls_enabled(true)
            .with_ca_cert_path("/etc/certs/ca.pem");
        assert!(config.validate().is_ok());
    }
}
