//! Transport configuration

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the WebRTC transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// STUN server URLs handed to every peer connection.
    pub stun_servers: Vec<String>,

    /// Maximum concurrent viewer sessions.
    pub max_sessions: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            max_sessions: 32,
        }
    }
}

impl TransportConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(Error::Signaling(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("turn:") {
                return Err(Error::Signaling(format!(
                    "unsupported ICE server URL: {url}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TransportConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_session_limit() {
        let config = TransportConfig {
            max_sessions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_ice_urls() {
        let config = TransportConfig {
            stun_servers: vec!["http://example.com".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
