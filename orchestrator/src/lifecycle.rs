//! Batched add/remove/update of players, independent of turn collection
//!
//! Each player in a batch runs as its own task with its own result. One
//! player's provisioning failure never fails or delays the rest of the batch.

use crate::error::{OrchestratorError, ProvisionError};
use crate::provisioning::Provisioner;
use crate::registry::{WorkerHandle, WorkerRegistry};
use log::{error, info, warn};
use shared::PlayerId;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of a batch lifecycle call, one entry per requested player
pub type LifecycleResults = HashMap<PlayerId, Result<(), OrchestratorError>>;

pub struct LifecycleCoordinator {
    registry: Arc<WorkerRegistry>,
    provisioner: Arc<dyn Provisioner>,
    provisioning_limit: Option<Arc<Semaphore>>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        provisioner: Arc<dyn Provisioner>,
        max_concurrent_provisioning: Option<usize>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            provisioning_limit: max_concurrent_provisioning.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Provisions a worker for every id and registers it
    ///
    /// A player that is already registered is re-provisioned and its handle
    /// replaced; its old worker is left to the provisioning backend.
    pub async fn add_players(&self, ids: HashSet<PlayerId>) -> LifecycleResults {
        let registry = Arc::clone(&self.registry);
        let provisioner = Arc::clone(&self.provisioner);

        self.run_batch(ids, move |player_id| {
            let registry = Arc::clone(&registry);
            let provisioner = Arc::clone(&provisioner);
            async move {
                let endpoint = provisioner
                    .create_worker(player_id)
                    .await
                    .map_err(|source| OrchestratorError::ProvisioningFailure { player_id, source })?;

                registry.put(WorkerHandle::new(player_id, endpoint)).await;
                Ok(())
            }
        })
        .await
    }

    /// Tears down every id's worker and unregisters it
    ///
    /// Removing a player that is not registered succeeds.
    pub async fn remove_players(&self, ids: HashSet<PlayerId>) -> LifecycleResults {
        let registry = Arc::clone(&self.registry);
        let provisioner = Arc::clone(&self.provisioner);

        self.run_batch(ids, move |player_id| {
            let registry = Arc::clone(&registry);
            let provisioner = Arc::clone(&provisioner);
            async move {
                provisioner
                    .destroy_worker(player_id)
                    .await
                    .map_err(|source| OrchestratorError::ProvisioningFailure { player_id, source })?;

                registry.delete(player_id).await;
                Ok(())
            }
        })
        .await
    }

    /// Replaces the player's code and forwards it to the running worker
    pub async fn update_code(&self, player_id: PlayerId, code: Vec<u8>) -> Result<(), OrchestratorError> {
        update_code(&self.registry, self.provisioner.as_ref(), player_id, code).await
    }

    /// Runs [`update_code`](Self::update_code) for several players concurrently
    pub async fn update_codes(&self, codes: HashMap<PlayerId, Vec<u8>>) -> LifecycleResults {
        let registry = Arc::clone(&self.registry);
        let provisioner = Arc::clone(&self.provisioner);
        let ids: HashSet<PlayerId> = codes.keys().copied().collect();
        let codes = Arc::new(codes);

        self.run_batch(ids, move |player_id| {
            let registry = Arc::clone(&registry);
            let provisioner = Arc::clone(&provisioner);
            let code = codes.get(&player_id).cloned().unwrap_or_default();
            async move { update_code(&registry, provisioner.as_ref(), player_id, code).await }
        })
        .await
    }

    /// Spawns `op` once per id and gathers every outcome
    async fn run_batch<F, Fut>(&self, ids: HashSet<PlayerId>, op: F) -> LifecycleResults
    where
        F: Fn(PlayerId) -> Fut,
        Fut: Future<Output = Result<(), OrchestratorError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for player_id in ids.iter().copied() {
            let limit = self.provisioning_limit.clone();
            let fut = op(player_id);
            tasks.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                (player_id, fut.await)
            });
        }

        let mut results = LifecycleResults::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((player_id, result)) => {
                    if let Err(e) = &result {
                        warn!("{}", e);
                    }
                    results.insert(player_id, result);
                }
                Err(e) => error!("Lifecycle task failed: {}", e),
            }
        }

        // A panicked task cannot report its player, so account for it here
        for player_id in ids {
            results.entry(player_id).or_insert_with(|| {
                Err(OrchestratorError::ProvisioningFailure {
                    player_id,
                    source: ProvisionError::Backend("lifecycle task panicked".to_string()),
                })
            });
        }

        results
    }
}

async fn update_code(
    registry: &WorkerRegistry,
    provisioner: &dyn Provisioner,
    player_id: PlayerId,
    code: Vec<u8>,
) -> Result<(), OrchestratorError> {
    let delivered = code.clone();
    if !registry.update_field(player_id, |handle| handle.set_code(code)).await {
        return Err(OrchestratorError::NotFound(player_id));
    }
    info!("Updated code for {} ({} bytes)", player_id, delivered.len());

    provisioner
        .deliver_code(player_id, &delivered)
        .await
        .map_err(|source| OrchestratorError::ProvisioningFailure { player_id, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    /// Provisioner that hands out fake endpoints and fails for chosen players
    #[derive(Default)]
    struct FakeProvisioner {
        fail_create: HashSet<PlayerId>,
        fail_destroy: HashSet<PlayerId>,
        fail_deliver: HashSet<PlayerId>,
        delay: Duration,
        destroyed: Mutex<Vec<PlayerId>>,
        delivered: Mutex<HashMap<PlayerId, Vec<u8>>>,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn create_worker(&self, player_id: PlayerId) -> Result<SocketAddr, ProvisionError> {
            sleep(self.delay).await;
            if self.fail_create.contains(&player_id) {
                return Err(ProvisionError::Backend("no capacity".to_string()));
            }
            Ok(SocketAddr::from(([10, 0, 0, 1], 9000 + player_id.0 as u16)))
        }

        async fn destroy_worker(&self, player_id: PlayerId) -> Result<(), ProvisionError> {
            if self.fail_destroy.contains(&player_id) {
                return Err(ProvisionError::Backend("container stuck".to_string()));
            }
            self.destroyed.lock().unwrap().push(player_id);
            Ok(())
        }

        async fn deliver_code(&self, player_id: PlayerId, code: &[u8]) -> Result<(), ProvisionError> {
            if self.fail_deliver.contains(&player_id) {
                return Err(ProvisionError::Backend("worker busy".to_string()));
            }
            self.delivered.lock().unwrap().insert(player_id, code.to_vec());
            Ok(())
        }
    }

    fn ids(raw: &[u32]) -> HashSet<PlayerId> {
        raw.iter().map(|id| PlayerId(*id)).collect()
    }

    fn coordinator(provisioner: FakeProvisioner) -> (LifecycleCoordinator, Arc<WorkerRegistry>, Arc<FakeProvisioner>) {
        let registry = Arc::new(WorkerRegistry::new());
        let provisioner = Arc::new(provisioner);
        let coordinator = LifecycleCoordinator::new(Arc::clone(&registry), provisioner.clone(), None);
        (coordinator, registry, provisioner)
    }

    #[tokio::test]
    async fn test_add_players() {
        let (coordinator, registry, _) = coordinator(FakeProvisioner::default());

        let results = coordinator.add_players(ids(&[1, 2, 3])).await;

        assert_eq!(results.len(), 3);
        assert!(results.values().all(|r| r.is_ok()));
        assert_eq!(registry.len().await, 3);
        assert_eq!(
            registry.get(PlayerId(2)).await.unwrap().endpoint(),
            SocketAddr::from(([10, 0, 0, 1], 9002))
        );
    }

    #[tokio::test]
    async fn test_add_failure_is_per_player() {
        let (coordinator, registry, _) = coordinator(FakeProvisioner {
            fail_create: ids(&[2]),
            ..FakeProvisioner::default()
        });

        let results = coordinator.add_players(ids(&[1, 2, 3])).await;

        assert!(results[&PlayerId(1)].is_ok());
        assert!(results[&PlayerId(3)].is_ok());
        assert!(matches!(
            results[&PlayerId(2)],
            Err(OrchestratorError::ProvisioningFailure { player_id: PlayerId(2), .. })
        ));
        assert_eq!(registry.player_ids().await, vec![PlayerId(1), PlayerId(3)]);
    }

    #[tokio::test]
    async fn test_adds_run_concurrently() {
        let (coordinator, _, _) = coordinator(FakeProvisioner {
            delay: Duration::from_millis(200),
            ..FakeProvisioner::default()
        });

        let started = Instant::now();
        coordinator.add_players(ids(&[1, 2, 3, 4, 5])).await;

        assert!(started.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_provisioning_limit_serializes_adds() {
        let registry = Arc::new(WorkerRegistry::new());
        let provisioner = Arc::new(FakeProvisioner {
            delay: Duration::from_millis(100),
            ..FakeProvisioner::default()
        });
        let coordinator = LifecycleCoordinator::new(Arc::clone(&registry), provisioner, Some(1));

        let started = Instant::now();
        let results = coordinator.add_players(ids(&[1, 2, 3])).await;

        assert!(results.values().all(|r| r.is_ok()));
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_remove_players_is_idempotent() {
        let (coordinator, registry, provisioner) = coordinator(FakeProvisioner::default());
        coordinator.add_players(ids(&[1, 2])).await;

        let first = coordinator.remove_players(ids(&[1])).await;
        let second = coordinator.remove_players(ids(&[1])).await;

        assert!(first[&PlayerId(1)].is_ok());
        assert!(second[&PlayerId(1)].is_ok());
        assert_eq!(registry.player_ids().await, vec![PlayerId(2)]);
        assert_eq!(provisioner.destroyed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_failure_keeps_player_registered() {
        let (coordinator, registry, _) = coordinator(FakeProvisioner {
            fail_destroy: ids(&[1]),
            ..FakeProvisioner::default()
        });
        coordinator.add_players(ids(&[1, 2])).await;

        let results = coordinator.remove_players(ids(&[1, 2])).await;

        assert!(results[&PlayerId(1)].is_err());
        assert!(results[&PlayerId(2)].is_ok());
        assert_eq!(registry.player_ids().await, vec![PlayerId(1)]);
    }

    #[tokio::test]
    async fn test_update_code() {
        let (coordinator, registry, provisioner) = coordinator(FakeProvisioner::default());
        coordinator.add_players(ids(&[1])).await;

        coordinator.update_code(PlayerId(1), b"north".to_vec()).await.unwrap();

        assert_eq!(registry.get(PlayerId(1)).await.unwrap().code(), b"north");
        assert_eq!(
            provisioner.delivered.lock().unwrap().get(&PlayerId(1)),
            Some(&b"north".to_vec())
        );
    }

    #[tokio::test]
    async fn test_update_code_unknown_player() {
        let (coordinator, _, provisioner) = coordinator(FakeProvisioner::default());

        let err = coordinator.update_code(PlayerId(7), b"north".to_vec()).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(provisioner.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_codes_batch() {
        let (coordinator, registry, _) = coordinator(FakeProvisioner {
            fail_deliver: ids(&[2]),
            ..FakeProvisioner::default()
        });
        coordinator.add_players(ids(&[1, 2])).await;

        let codes: HashMap<PlayerId, Vec<u8>> = [
            (PlayerId(1), b"east".to_vec()),
            (PlayerId(2), b"west".to_vec()),
            (PlayerId(3), b"wait".to_vec()),
        ]
        .into_iter()
        .collect();
        let results = coordinator.update_codes(codes).await;

        assert!(results[&PlayerId(1)].is_ok());
        assert!(matches!(
            results[&PlayerId(2)],
            Err(OrchestratorError::ProvisioningFailure { .. })
        ));
        assert!(results[&PlayerId(3)].as_ref().unwrap_err().is_not_found());
        assert_eq!(registry.get(PlayerId(1)).await.unwrap().code(), b"east");
    }
}
