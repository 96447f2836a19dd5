// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::error::Error;
use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::settings::{SETTINGS_ID, Settings};

use self::models::{Challenge, Instance, InstanceStatus, SettingsRow};
use self::schema::{challenges, instances, settings};

pub mod models;
pub mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbConnection = SyncConnectionWrapper<SqliteConnection>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to database: {0}")]
    Connection(#[from] diesel::ConnectionError),
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Failed to run database migrations: {0}")]
    Migration(String),
    #[error("Stored settings are malformed: {0}")]
    MalformedSettings(String),
}

pub fn run_migrations(
    connection: &mut impl MigrationHarness<diesel::sqlite::Sqlite>,
) -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    connection.run_pending_migrations(MIGRATIONS)?;

    Ok(())
}

/// Access layer over the SQLite database.
///
/// SQLite serializes writers anyway, so a single connection behind an async mutex is shared by
/// all requests. Every method holds the lock for one statement (or one read-modify-write of the
/// settings row) and never across container engine calls.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<DbConnection>>,
}

async fn load_settings_locked(conn: &mut DbConnection) -> Result<Settings, StoreError> {
    let row = settings::table
        .find(SETTINGS_ID)
        .select(SettingsRow::as_select())
        .first(conn)
        .await
        .optional()?;
    let (loaded, changed) =
        Settings::from_row(row).map_err(|e| StoreError::MalformedSettings(e.to_string()))?;
    if changed {
        tracing::info!("Backfilling missing settings with generated defaults");
        write_settings_locked(conn, &loaded).await?;
    }
    Ok(loaded)
}

async fn write_settings_locked(
    conn: &mut DbConnection,
    new_settings: &Settings,
) -> Result<(), StoreError> {
    let row = new_settings
        .to_row()
        .map_err(|e| StoreError::MalformedSettings(e.to_string()))?;
    diesel::replace_into(settings::table)
        .values(&row)
        .execute(conn)
        .await?;
    Ok(())
}

impl Store {
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let url = database_url.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut connection = <SqliteConnection as diesel::Connection>::establish(&url)?;
            run_migrations(&mut connection).map_err(|e| StoreError::Migration(e.to_string()))
        })
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))??;

        let conn = <DbConnection as AsyncConnection>::establish(database_url).await?;
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /* =========================
     * SETTINGS
     * ========================= */

    /// Loads the settings singleton, persisting generated defaults for any missing field first.
    pub async fn load_settings(&self) -> Result<Settings, StoreError> {
        let mut conn = self.conn.lock().await;
        load_settings_locked(&mut conn).await
    }

    /// Runs `apply` against the current settings and stores its result.
    ///
    /// The connection stays locked from the read to the write, so concurrent updates touching
    /// different fields never overwrite each other.
    pub async fn update_settings<F, E>(&self, apply: F) -> Result<Settings, E>
    where
        F: FnOnce(Settings) -> Result<Settings, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock().await;
        let current = load_settings_locked(&mut conn).await?;
        let updated = apply(current)?;
        write_settings_locked(&mut conn, &updated).await?;
        Ok(updated)
    }

    /* =========================
     * CHALLENGES
     * ========================= */

    pub async fn insert_challenge(&self, challenge: &Challenge) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::insert_into(challenges::table)
            .values(challenge)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn get_challenge(&self, challenge_id: &str) -> Result<Option<Challenge>, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(challenges::table
            .find(challenge_id)
            .select(Challenge::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    pub async fn list_challenges(&self) -> Result<Vec<Challenge>, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(challenges::table
            .select(Challenge::as_select())
            .order_by(challenges::created_at.asc())
            .load(&mut *conn)
            .await?)
    }

    pub async fn update_challenge_metadata(
        &self,
        challenge_id: &str,
        name: &str,
        runtime_version: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::update(challenges::table.find(challenge_id))
            .set((
                challenges::name.eq(name),
                challenges::runtime_version.eq(runtime_version),
                challenges::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete_challenge(&self, challenge_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::delete(challenges::table.find(challenge_id))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /* =========================
     * INSTANCES
     * ========================= */

    pub async fn insert_instance(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::insert_into(instances::table)
            .values(instance)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<Option<Instance>, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(instances::table
            .find(instance_id)
            .select(Instance::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    pub async fn get_instance_for_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Option<Instance>, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(instances::table
            .filter(instances::challenge_id.eq(challenge_id))
            .select(Instance::as_select())
            .first(&mut *conn)
            .await
            .optional()?)
    }

    /// All instances together with the name of their challenge
    pub async fn list_instances(&self) -> Result<Vec<(Instance, String)>, StoreError> {
        let mut conn = self.conn.lock().await;
        Ok(instances::table
            .inner_join(challenges::table)
            .select((Instance::as_select(), challenges::name))
            .order_by(instances::created_at.asc())
            .load(&mut *conn)
            .await?)
    }

    pub async fn update_instance(
        &self,
        instance_id: &str,
        status: InstanceStatus,
        host_port: u16,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::update(instances::table.find(instance_id))
            .set((
                instances::status.eq(status),
                instances::host_port.eq(host_port as i32),
                instances::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn set_instance_status(
        &self,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::update(instances::table.find(instance_id))
            .set((
                instances::status.eq(status),
                instances::updated_at.eq(Utc::now()),
            ))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete_instance(&self, instance_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        diesel::delete(instances::table.find(instance_id))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Host ports of every running instance, read fresh on each call
    pub async fn running_ports(&self) -> Result<Vec<u16>, StoreError> {
        let mut conn = self.conn.lock().await;
        let ports = instances::table
            .filter(instances::status.eq(InstanceStatus::Running))
            .select(instances::host_port)
            .load::<i32>(&mut *conn)
            .await?;
        Ok(ports
            .into_iter()
            .filter_map(|port| u16::try_from(port).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DbType, RuntimeKind};

    async fn open_store(dir: &tempfile::TempDir) -> Store {
        let url = dir.path().join("test.db");
        Store::open(url.to_str().unwrap()).await.unwrap()
    }

    fn challenge(id: &str) -> Challenge {
        Challenge {
            id: id.to_string(),
            name: format!("chall {id}"),
            runtime: RuntimeKind::Php,
            runtime_version: "8.2".to_string(),
            db_type: DbType::None,
            content_hash: "abc".to_string(),
            storage_path: format!("/tmp/{id}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn instance(id: &str, challenge_id: &str, status: InstanceStatus, port: i32) -> Instance {
        Instance {
            id: id.to_string(),
            challenge_id: challenge_id.to_string(),
            status,
            host_port: port,
            container_port: 80,
            project_name: format!("chalbox-{id}"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_settings_are_backfilled_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let first = store.load_settings().await.unwrap();
        let second = store.load_settings().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_running_ports_only_counts_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        for id in ["a", "b", "c"] {
            store.insert_challenge(&challenge(id)).await.unwrap();
        }
        store
            .insert_instance(&instance("i1", "a", InstanceStatus::Running, 20000))
            .await
            .unwrap();
        store
            .insert_instance(&instance("i2", "b", InstanceStatus::Stopped, 20001))
            .await
            .unwrap();
        store
            .insert_instance(&instance("i3", "c", InstanceStatus::Error, 20002))
            .await
            .unwrap();
        assert_eq!(store.running_ports().await.unwrap(), vec![20000]);

        store
            .update_instance("i2", InstanceStatus::Running, 20005)
            .await
            .unwrap();
        let mut ports = store.running_ports().await.unwrap();
        ports.sort();
        assert_eq!(ports, vec![20000, 20005]);
    }

    #[tokio::test]
    async fn test_second_instance_for_challenge_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_challenge(&challenge("a")).await.unwrap();
        store
            .insert_instance(&instance("i1", "a", InstanceStatus::Stopped, 20000))
            .await
            .unwrap();
        assert!(store
            .insert_instance(&instance("i2", "a", InstanceStatus::Running, 20001))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_instances_joins_challenge_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_challenge(&challenge("a")).await.unwrap();
        store
            .insert_instance(&instance("i1", "a", InstanceStatus::Running, 20000))
            .await
            .unwrap();
        let listed = store.list_instances().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.id, "i1");
        assert_eq!(listed[0].1, "chall a");
    }
}
