use crate::constants::{DEFAULT_MAX_INFLIGHT_ITEM_APPLIES, DEFAULT_SERVER_PORT};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised when randomizer configuration invariants are violated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse randomizer config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: usize,
        value: usize,
    },
}

/// Where and as whom to log in to the multiworld server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub server: String,
    #[serde(default = "ConnectionInfo::default_port")]
    pub port: u16,
    pub slot: String,
    #[serde(default)]
    pub password: String,
}

impl ConnectionInfo {
    #[must_use]
    pub const fn default_port() -> u16 {
        DEFAULT_SERVER_PORT
    }

    #[must_use]
    pub fn new(server: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: Self::default_port(),
            slot: slot.into(),
            password: String::new(),
        }
    }

    /// `host:port` as handed to the transport. A server string that already
    /// carries a port is used as is.
    #[must_use]
    pub fn address(&self) -> String {
        if self.server.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
            self.server.clone()
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("slot", &self.slot)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomizerConfig {
    #[serde(default)]
    pub connection: Option<ConnectionInfo>,
    /// Seed for offline shuffles; empty means a fresh random order every run.
    #[serde(default)]
    pub offline_seed: String,
    /// Seed the roster with staggered placeholder heroes in offline runs.
    #[serde(default)]
    pub mock_progression: bool,
    #[serde(default = "RandomizerConfig::default_max_inflight_item_applies")]
    pub max_inflight_item_applies: usize,
}

impl Default for RandomizerConfig {
    fn default() -> Self {
        Self {
            connection: None,
            offline_seed: String::new(),
            mock_progression: false,
            max_inflight_item_applies: Self::default_max_inflight_item_applies(),
        }
    }
}

impl RandomizerConfig {
    #[must_use]
    pub const fn default_max_inflight_item_applies() -> usize {
        DEFAULT_MAX_INFLIGHT_ITEM_APPLIES
    }

    /// Parse and validate a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the JSON is malformed or a field violates
    /// its bounds.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` when any field violates the documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inflight_item_applies == 0 {
            return Err(ConfigError::MinViolation {
                field: "max_inflight_item_applies",
                min: 1,
                value: 0,
            });
        }
        if let Some(connection) = &self.connection {
            if connection.server.trim().is_empty() {
                return Err(ConfigError::Empty {
                    field: "connection.server",
                });
            }
            if connection.slot.trim().is_empty() {
                return Err(ConfigError::Empty {
                    field: "connection.slot",
                });
            }
            if connection.port == 0 {
                return Err(ConfigError::MinViolation {
                    field: "connection.port",
                    min: 1,
                    value: 0,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = RandomizerConfig::from_json(
            r#"{ "connection": { "server": "localhost", "slot": "Hero" } }"#,
        )
        .unwrap();
        let connection = config.connection.unwrap();
        assert_eq!(connection.port, 38281);
        assert_eq!(connection.password, "");
        assert_eq!(connection.address(), "localhost:38281");
        assert_eq!(config.max_inflight_item_applies, 16);
        assert!(config.offline_seed.is_empty());
    }

    #[test]
    fn server_with_port_is_kept() {
        let mut connection = ConnectionInfo::new("archipelago.gg:51234", "Hero");
        assert_eq!(connection.address(), "archipelago.gg:51234");
        connection.server = "[::1]".into();
        assert_eq!(connection.address(), "[::1]:38281");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let err = RandomizerConfig::from_json(r#"{ "connection": { "server": "x", "slot": " " } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Empty { field: "connection.slot" }));

        let config = RandomizerConfig {
            max_inflight_item_applies: 0,
            ..RandomizerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MinViolation { field: "max_inflight_item_applies", .. })
        ));
        assert!(matches!(
            RandomizerConfig::from_json("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn password_is_not_logged() {
        let mut connection = ConnectionInfo::new("localhost", "Hero");
        connection.password = "hunter2".into();
        assert!(!format!("{connection:?}").contains("hunter2"));
    }
}
