// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::Store;
use crate::db::models::Challenge;
use crate::ports::{PortProbe, PortSummary, find_available_port, port_summary};
use crate::runtime::RuntimeDriver;
use crate::settings::{Settings, SettingsUpdate};
use crate::workspace::WorkspaceLayout;
use crate::ManagerError;

pub const CHALLENGES_DIR: &str = "challenges";
pub const INSTANCES_DIR: &str = "instances";

/// Coordinates challenges, their instances and the resources those instances hold.
///
/// Cheap to share behind an `Arc`. All state that must survive a restart lives in the [`Store`]
/// and the data directory; the in-memory parts only serialize concurrent requests.
pub struct ChallengeManager {
    pub(crate) store: Store,
    pub(crate) challenges_dir: PathBuf,
    pub(crate) workspaces: WorkspaceLayout,
    pub(crate) runtime: Arc<dyn RuntimeDriver>,
    pub(crate) probe: Arc<dyn PortProbe>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    pending_ports: Arc<DashSet<u16>>,
}

/// A port picked by an in-flight start that has not been persisted yet.
///
/// Other allocations skip it until the guard is dropped.
pub(crate) struct PortReservation {
    port: u16,
    pending: Arc<DashSet<u16>>,
}

impl PortReservation {
    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.pending.remove(&self.port);
    }
}

impl ChallengeManager {
    pub fn new(
        store: Store,
        data_dir: &Path,
        runtime: Arc<dyn RuntimeDriver>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        ChallengeManager {
            store,
            challenges_dir: data_dir.join(CHALLENGES_DIR),
            workspaces: WorkspaceLayout::new(data_dir.join(INSTANCES_DIR)),
            runtime,
            probe,
            locks: DashMap::new(),
            pending_ports: Arc::new(DashSet::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn workspaces(&self) -> &WorkspaceLayout {
        &self.workspaces
    }

    /// Serializes lifecycle operations on one challenge.
    pub(crate) async fn lock_challenge(&self, challenge_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(challenge_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Locks an existing challenge and returns its row as read under the lock.
    ///
    /// Unknown ids never leave a lock entry behind.
    pub(crate) async fn lock_existing_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<(Challenge, OwnedMutexGuard<()>), ManagerError> {
        self.get_challenge(challenge_id).await?;
        let guard = self.lock_challenge(challenge_id).await;
        match self.get_challenge(challenge_id).await {
            Ok(challenge) => Ok((challenge, guard)),
            Err(e) => {
                drop(guard);
                if matches!(e, ManagerError::NotFound(_)) {
                    self.forget_challenge_lock(challenge_id);
                }
                Err(e)
            }
        }
    }

    pub(crate) fn forget_challenge_lock(&self, challenge_id: &str) {
        self.locks.remove(challenge_id);
    }

    /// Picks a host port, keeping `preferred` when it is neither taken by a running instance nor
    /// held by anything else on this host.
    ///
    /// The reserved set is rebuilt from the store on every call and includes ports picked by
    /// concurrent starts that have not been persisted yet.
    pub(crate) async fn allocate_port(
        &self,
        settings: &Settings,
        mut preferred: Option<u16>,
    ) -> Result<PortReservation, ManagerError> {
        loop {
            let mut reserved: HashSet<u16> =
                self.store.running_ports().await?.into_iter().collect();
            reserved.extend(self.pending_ports.iter().map(|port| *port));

            let mut kept = None;
            if let Some(port) = preferred.take() {
                if !reserved.contains(&port) && self.probe.is_free(port).await {
                    kept = Some(port);
                } else {
                    tracing::info!("Port {port} is no longer available, allocating a new one");
                }
            }
            let port = match kept {
                Some(port) => port,
                None => {
                    find_available_port(&settings.port_ranges, &reserved, self.probe.as_ref())
                        .await?
                }
            };

            // Another start may have claimed the same port since the reserved set was built,
            // either still pending or already persisted
            if !self.pending_ports.insert(port) {
                continue;
            }
            let reservation = PortReservation {
                port,
                pending: self.pending_ports.clone(),
            };
            if self.store.running_ports().await?.contains(&port) {
                continue;
            }
            return Ok(reservation);
        }
    }

    pub async fn settings(&self) -> Result<Settings, ManagerError> {
        Ok(self.store.load_settings().await?)
    }

    /// Applies a partial settings change. Running instances keep the credentials they were
    /// started with.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<Settings, ManagerError> {
        let updated = self
            .store
            .update_settings(|current| Ok::<_, ManagerError>(current.apply(update)?))
            .await?;
        tracing::info!("Settings updated");
        Ok(updated)
    }

    pub async fn port_summary(&self) -> Result<PortSummary, ManagerError> {
        let settings = self.store.load_settings().await?;
        Ok(port_summary(&settings.port_ranges, self.probe.as_ref()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::TcpPortProbe;
    use crate::runtime::MockRuntime;
    use crate::settings::PortRange;

    async fn manager(dir: &tempfile::TempDir) -> ChallengeManager {
        let store = Store::open(&dir.path().join("test.db").to_string_lossy())
            .await
            .unwrap();
        ChallengeManager::new(
            store,
            dir.path(),
            Arc::new(MockRuntime::new()),
            Arc::new(TcpPortProbe),
        )
    }

    async fn free_local_port() -> u16 {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_pending_ports_are_not_handed_out_twice() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let port = free_local_port().await;
        let mut settings = manager.settings().await.unwrap();
        settings.port_ranges = vec![PortRange::new(port as u32, port as u32).unwrap()];

        let first = manager.allocate_port(&settings, None).await.unwrap();
        assert_eq!(first.port(), port);
        assert!(matches!(
            manager.allocate_port(&settings, None).await,
            Err(ManagerError::PortsExhausted(_))
        ));

        drop(first);
        let again = manager.allocate_port(&settings, None).await.unwrap();
        assert_eq!(again.port(), port);
    }

    #[tokio::test]
    async fn test_update_settings_validates() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        let update = SettingsUpdate {
            port_ranges: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            manager.update_settings(update).await,
            Err(ManagerError::Validation(_))
        ));

        let update = SettingsUpdate {
            public_host: Some("ctf.example.org".to_string()),
            ..Default::default()
        };
        let updated = manager.update_settings(update).await.unwrap();
        assert_eq!(updated.public_host, "ctf.example.org");
        assert_eq!(manager.settings().await.unwrap(), updated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settings_updates_are_both_kept() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(manager(&dir).await);
        for i in 0..20 {
            let host = format!("host-{i}.example.org");
            let database = format!("db_{i}");
            let first = tokio::spawn({
                let manager = manager.clone();
                let host = host.clone();
                async move {
                    manager
                        .update_settings(SettingsUpdate {
                            public_host: Some(host),
                            ..Default::default()
                        })
                        .await
                }
            });
            let second = tokio::spawn({
                let manager = manager.clone();
                let database = database.clone();
                async move {
                    manager
                        .update_settings(SettingsUpdate {
                            mysql_database: Some(database),
                            ..Default::default()
                        })
                        .await
                }
            });
            first.await.unwrap().unwrap();
            second.await.unwrap().unwrap();

            let settings = manager.settings().await.unwrap();
            assert_eq!(settings.public_host, host);
            assert_eq!(settings.mysql.database, database);
        }
    }

    #[tokio::test]
    async fn test_unknown_challenge_leaves_no_lock_behind() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir).await;
        for i in 0..10 {
            assert!(matches!(
                manager.start_instance(&format!("missing-{i}")).await,
                Err(ManagerError::NotFound(_))
            ));
            assert!(matches!(
                manager
                    .update_challenge(&format!("missing-{i}"), Default::default())
                    .await,
                Err(ManagerError::NotFound(_))
            ));
            assert!(matches!(
                manager.delete_challenge(&format!("missing-{i}")).await,
                Err(ManagerError::NotFound(_))
            ));
        }
        assert_eq!(manager.locks.len(), 0);
    }
}
