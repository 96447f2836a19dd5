// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::ops::RangeInclusive;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::SettingsRow;

/// Primary key of the singleton settings row
pub const SETTINGS_ID: i32 = 1;

pub const DEFAULT_PORT_RANGE: (u16, u16) = (20000, 20999);
pub const DEFAULT_PUBLIC_HOST: &str = "localhost";
pub const DEFAULT_PUBLIC_SCHEME: &str = "http";
pub const DEFAULT_MYSQL_DATABASE: &str = "app";
pub const DEFAULT_MYSQL_USER: &str = "app";
const GENERATED_PASSWORD_LEN: usize = 24;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Invalid port range {0}-{1}: expected 1 <= start <= end <= 65535")]
    InvalidPortRange(u32, u32),
    #[error("At least one port range is required")]
    NoPortRanges,
    #[error("Invalid value for {0}: {1}")]
    InvalidField(&'static str, String),
    #[error("Stored port ranges are malformed: {0}")]
    MalformedPortRanges(#[from] serde_json::Error),
}

/// Inclusive host port range, serialized as a `[start, end]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u16; 2]")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u32, end: u32) -> Result<Self, SettingsError> {
        if start == 0 || start > end || end > u16::MAX as u32 {
            return Err(SettingsError::InvalidPortRange(start, end));
        }
        Ok(PortRange {
            start: start as u16,
            end: end as u16,
        })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports().contains(&port)
    }
}

impl TryFrom<[u32; 2]> for PortRange {
    type Error = SettingsError;

    fn try_from([start, end]: [u32; 2]) -> Result<Self, Self::Error> {
        PortRange::new(start, end)
    }
}

impl From<PortRange> for [u16; 2] {
    fn from(range: PortRange) -> Self {
        [range.start, range.end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlSettings {
    pub root_password: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl MysqlSettings {
    /// The app user `root` has no password of its own, it always shares the root password.
    pub fn mirror_root_password(mut self) -> Self {
        if self.user == "root" {
            self.password = self.root_password.clone();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub port_ranges: Vec<PortRange>,
    pub public_host: String,
    pub public_scheme: String,
    pub mysql: MysqlSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub port_ranges: Option<Vec<PortRange>>,
    pub public_host: Option<String>,
    pub public_scheme: Option<String>,
    pub mysql_root_password: Option<String>,
    pub mysql_database: Option<String>,
    pub mysql_user: Option<String>,
    pub mysql_password: Option<String>,
}

pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn backfill(field: &mut Option<String>, default: impl FnOnce() -> String) -> bool {
    match field {
        Some(value) if !value.is_empty() => false,
        _ => {
            *field = Some(default());
            true
        }
    }
}

impl Settings {
    /// Builds settings from the stored row, generating every missing field.
    /// The returned flag is set when anything was generated and the row must be written back.
    pub fn from_row(row: Option<SettingsRow>) -> Result<(Settings, bool), SettingsError> {
        let mut row = row.unwrap_or_else(|| SettingsRow::empty(SETTINGS_ID));
        let mut changed = row.id != SETTINGS_ID;
        row.id = SETTINGS_ID;

        let port_ranges = match row.port_ranges.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                let ranges: Vec<PortRange> = serde_json::from_str(raw)?;
                if ranges.is_empty() {
                    changed = true;
                    vec![PortRange::new(DEFAULT_PORT_RANGE.0 as u32, DEFAULT_PORT_RANGE.1 as u32)?]
                } else {
                    ranges
                }
            }
            _ => {
                changed = true;
                vec![PortRange::new(DEFAULT_PORT_RANGE.0 as u32, DEFAULT_PORT_RANGE.1 as u32)?]
            }
        };

        changed |= backfill(&mut row.public_host, || DEFAULT_PUBLIC_HOST.to_string());
        changed |= backfill(&mut row.public_scheme, || DEFAULT_PUBLIC_SCHEME.to_string());
        changed |= backfill(&mut row.mysql_root_password, generate_password);
        changed |= backfill(&mut row.mysql_database, || DEFAULT_MYSQL_DATABASE.to_string());
        changed |= backfill(&mut row.mysql_user, || DEFAULT_MYSQL_USER.to_string());
        changed |= backfill(&mut row.mysql_password, generate_password);

        let mysql = MysqlSettings {
            root_password: row.mysql_root_password.unwrap_or_default(),
            database: row.mysql_database.unwrap_or_default(),
            user: row.mysql_user.unwrap_or_default(),
            password: row.mysql_password.unwrap_or_default(),
        };
        let mirrored = mysql.clone().mirror_root_password();
        changed |= mirrored != mysql;

        Ok((
            Settings {
                port_ranges,
                public_host: row.public_host.unwrap_or_default(),
                public_scheme: row.public_scheme.unwrap_or_default(),
                mysql: mirrored,
            },
            changed,
        ))
    }

    pub fn to_row(&self) -> Result<SettingsRow, SettingsError> {
        Ok(SettingsRow {
            id: SETTINGS_ID,
            port_ranges: Some(serde_json::to_string(&self.port_ranges)?),
            public_host: Some(self.public_host.clone()),
            public_scheme: Some(self.public_scheme.clone()),
            mysql_root_password: Some(self.mysql.root_password.clone()),
            mysql_database: Some(self.mysql.database.clone()),
            mysql_user: Some(self.mysql.user.clone()),
            mysql_password: Some(self.mysql.password.clone()),
            updated_at: chrono::Utc::now(),
        })
    }

    /// Externally usable URL of an instance bound to `port`
    pub fn instance_url(&self, port: u16) -> String {
        format!("{}://{}:{}", self.public_scheme, self.public_host, port)
    }

    /// Applies a partial update and validates the result. `self` is left untouched on error.
    pub fn apply(&self, update: SettingsUpdate) -> Result<Settings, SettingsError> {
        let mut next = self.clone();
        if let Some(ranges) = update.port_ranges {
            if ranges.is_empty() {
                return Err(SettingsError::NoPortRanges);
            }
            next.port_ranges = ranges;
        }
        if let Some(host) = update.public_host {
            let host = host.trim().to_string();
            if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
                return Err(SettingsError::InvalidField("public_host", host));
            }
            next.public_host = host;
        }
        if let Some(scheme) = update.public_scheme {
            let scheme = scheme.trim().to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(SettingsError::InvalidField("public_scheme", scheme));
            }
            next.public_scheme = scheme;
        }
        if let Some(database) = update.mysql_database {
            if database.is_empty()
                || !database
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(SettingsError::InvalidField("mysql_database", database));
            }
            next.mysql.database = database;
        }
        if let Some(user) = update.mysql_user {
            if user.is_empty() || user.contains(char::is_whitespace) {
                return Err(SettingsError::InvalidField("mysql_user", user));
            }
            next.mysql.user = user;
        }
        if let Some(password) = update.mysql_root_password {
            if password.is_empty() {
                return Err(SettingsError::InvalidField(
                    "mysql_root_password",
                    "must not be empty".to_string(),
                ));
            }
            next.mysql.root_password = password;
        }
        if let Some(password) = update.mysql_password {
            if password.is_empty() {
                return Err(SettingsError::InvalidField(
                    "mysql_password",
                    "must not be empty".to_string(),
                ));
            }
            next.mysql.password = password;
        }
        next.mysql = next.mysql.mirror_root_password();
        Ok(next)
    }
}
