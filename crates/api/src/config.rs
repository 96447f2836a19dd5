// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8400";
pub const DEFAULT_COMPOSE_COMMAND: &str = "docker compose";
const DEFAULT_DATABASE_FILE: &str = "chalbox.db";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub compose_command: String,
}

impl Config {
    /// Reads the process environment. `.env` files must have been loaded before.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let data_dir = PathBuf::from(var("CHALBOX_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let database_url = var("DATABASE_URL").unwrap_or_else(|| {
            data_dir
                .join(DEFAULT_DATABASE_FILE)
                .to_string_lossy()
                .to_string()
        });
        let listen_addr = var("CHALBOX_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());
        let listen_addr = listen_addr
            .parse()
            .map_err(|_| ConfigError::Invalid("CHALBOX_LISTEN_ADDR", listen_addr))?;
        let compose_command =
            var("CHALBOX_COMPOSE_COMMAND").unwrap_or_else(|| DEFAULT_COMPOSE_COMMAND.into());

        Ok(Config {
            data_dir,
            database_url,
            listen_addr,
            compose_command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(
            PathBuf::from(&config.database_url),
            PathBuf::from("./data").join("chalbox.db")
        );
        assert_eq!(config.listen_addr, "127.0.0.1:8400".parse().unwrap());
        assert_eq!(config.compose_command, "docker compose");
    }

    #[test]
    fn test_database_follows_data_dir() {
        let config = config(&[("CHALBOX_DATA_DIR", "/srv/chalbox")]).unwrap();
        assert_eq!(
            PathBuf::from(&config.database_url),
            PathBuf::from("/srv/chalbox/chalbox.db")
        );
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "/tmp/other.db"),
            ("CHALBOX_LISTEN_ADDR", "0.0.0.0:9000"),
            ("CHALBOX_COMPOSE_COMMAND", "podman compose"),
            ("CHALBOX_DATA_DIR", " "),
        ])
        .unwrap();
        assert_eq!(config.database_url, "/tmp/other.db");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.compose_command, "podman compose");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn test_invalid_listen_addr() {
        assert!(matches!(
            config(&[("CHALBOX_LISTEN_ADDR", "localhost")]),
            Err(ConfigError::Invalid("CHALBOX_LISTEN_ADDR", _))
        ));
    }
}
