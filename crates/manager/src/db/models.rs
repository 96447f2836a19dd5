// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::schema::*;

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Hash,
)]
#[DbValueStyle = "snake_case"]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Php,
    Flask,
}

impl RuntimeKind {
    /// Port the application listens on inside its container
    pub fn container_port(&self) -> u16 {
        match self {
            RuntimeKind::Php => 80,
            RuntimeKind::Flask => 8000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Php => "php",
            RuntimeKind::Flask => "flask",
        }
    }
}

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Hash,
)]
#[DbValueStyle = "snake_case"]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    None,
    Mysql,
}

#[derive(
    diesel_derive_enum::DbEnum, Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Copy, Hash,
)]
#[DbValueStyle = "snake_case"]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
    Error,
}

/* =========================
 * CHALLENGES
 * ========================= */

#[derive(Queryable, Selectable, Identifiable, Insertable, Debug, Clone, Serialize)]
#[diesel(table_name = challenges)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Challenge {
    pub id: String,
    pub name: String,
    pub runtime: RuntimeKind,
    pub runtime_version: String,
    pub db_type: DbType,
    pub content_hash: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* =========================
 * INSTANCES
 * ========================= */

#[derive(
    Queryable, Selectable, Identifiable, Insertable, Associations, Debug, Clone, Serialize,
)]
#[diesel(table_name = instances)]
#[diesel(belongs_to(Challenge))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Instance {
    pub id: String,
    pub challenge_id: String,
    pub status: InstanceStatus,
    pub host_port: i32,
    pub container_port: i32,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn port(&self) -> Option<u16> {
        u16::try_from(self.host_port).ok().filter(|p| *p != 0)
    }
}

/* =========================
 * SETTINGS
 * ========================= */

#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SettingsRow {
    pub id: i32,
    /// JSON list of `[start, end]` pairs
    pub port_ranges: Option<String>,
    pub public_host: Option<String>,
    pub public_scheme: Option<String>,
    pub mysql_root_password: Option<String>,
    pub mysql_database: Option<String>,
    pub mysql_user: Option<String>,
    pub mysql_password: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SettingsRow {
    pub fn empty(id: i32) -> Self {
        SettingsRow {
            id,
            port_ranges: None,
            public_host: None,
            public_scheme: None,
            mysql_root_password: None,
            mysql_database: None,
            mysql_user: None,
            mysql_password: None,
            updated_at: Utc::now(),
        }
    }
}
