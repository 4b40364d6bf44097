//! Configuration (SPEC_FULL §4.H): a validated, immutable value handed to
//! the Relay at startup. The crate does not watch or rewrite this file —
//! persistence is an external collaborator's job (SPEC_FULL §1).

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_server() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    1080
}
fn default_method() -> String {
    "aes-256-cfb".to_string()
}
// 12h, matching the reference tool's default (original_source/config/defaults.py).
fn default_timeout() -> u64 {
    43200
}
fn default_max_connections() -> u64 {
    2000
}
fn default_target_connect_timeout() -> u64 {
    30
}
fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(rename = "server_port", default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Idle-timeout seconds (SPEC_FULL §3: valid range 60..604800).
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_max_connections")]
    pub max_connections: u64,

    #[serde(rename = "target_connect_timeout", default = "default_target_connect_timeout")]
    pub target_connect_timeout: u64,

    #[serde(default)]
    pub fast_open: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: default_server(),
            server_port: default_server_port(),
            password: String::new(),
            method: default_method(),
            timeout: default_timeout(),
            max_connections: default_max_connections(),
            target_connect_timeout: default_target_connect_timeout(),
            fast_open: false,
            workers: default_workers(),
            verbose: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Ranges per SPEC_FULL §3's data model.
    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(Error::config("server_port must be 1..65535"));
        }
        if self.password.is_empty() {
            return Err(Error::config("password must be non-empty"));
        }
        crate::cipher::CipherKind::try_from(self.method.as_str())?;
        if !(1..=10_000).contains(&self.max_connections) {
            return Err(Error::config("max_connections must be 1..10000"));
        }
        if !(60..=604_800).contains(&self.timeout) {
            return Err(Error::config("timeout must be 60..604800 seconds"));
        }
        if !(5..=300).contains(&self.target_connect_timeout) {
            return Err(Error::config(
                "target_connect_timeout must be 5..300 seconds",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let mut config = Config::default();
        config.password = "hunter2".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout, 43200);
        assert_eq!(config.max_connections, 2000);
    }

    #[test]
    fn rejects_empty_password() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_max_connections() {
        let mut config = Config::default();
        config.password = "x".to_string();
        config.max_connections = 0;
        assert!(config.validate().is_err());
        config.max_connections = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_json_string() {
        let json = r#"{
            "server": "127.0.0.1",
            "server_port": 8388,
            "password": "hunter2",
            "method": "aes-256-cfb",
            "max_connections": 500
        }"#;
        let config = Config::from_str(json).unwrap();
        assert_eq!(config.server, "127.0.0.1");
        assert_eq!(config.server_port, 8388);
        assert_eq!(config.max_connections, 500);
        // Fields omitted from the JSON fall back to defaults.
        assert_eq!(config.timeout, 43200);
    }

    #[test]
    fn rejects_unsupported_method() {
        let mut config = Config::default();
        config.password = "x".to_string();
        config.method = "chacha20-ietf-poly1305".to_string();
        assert!(config.validate().is_err());
    }
}
