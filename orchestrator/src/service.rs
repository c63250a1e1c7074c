//! Composition root tying the registry, turn collection and lifecycle together

use crate::collector::{CollectionResult, TurnCollector};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::lifecycle::{LifecycleCoordinator, LifecycleResults};
use crate::provisioning::Provisioner;
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::transport::{UdpWorkerClient, WorkerClient};
use log::info;
use shared::PlayerId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-player outcome of [`Orchestrator::sync_players`]
#[derive(Debug, Default)]
pub struct SyncReport {
    pub added: LifecycleResults,
    pub removed: LifecycleResults,
    pub code_updated: LifecycleResults,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.added
            .values()
            .chain(self.removed.values())
            .chain(self.code_updated.values())
            .all(|r| r.is_ok())
    }
}

/// Entry point for the simulation loop and the player-management layer
///
/// All methods take `&self`; share one instance behind an `Arc` so a tick can
/// be collected while players join, leave or change their code.
pub struct Orchestrator {
    registry: Arc<WorkerRegistry>,
    collector: TurnCollector,
    lifecycle: LifecycleCoordinator,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        client: Arc<dyn WorkerClient>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let registry = Arc::new(WorkerRegistry::new());

        Self {
            collector: TurnCollector::new(
                Arc::clone(&registry),
                client,
                config.max_concurrent_fetches,
            ),
            lifecycle: LifecycleCoordinator::new(
                Arc::clone(&registry),
                provisioner,
                config.max_concurrent_provisioning,
            ),
            registry,
            config,
        }
    }

    /// Orchestrator reaching its workers over the UDP turn protocol
    pub fn with_udp_workers(config: OrchestratorConfig, provisioner: Arc<dyn Provisioner>) -> Self {
        Self::new(config, Arc::new(UdpWorkerClient::new()), provisioner)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshots the registry and collects this tick's actions within the turn deadline
    pub async fn collect_turn(&self, game_states: &HashMap<PlayerId, Vec<u8>>) -> CollectionResult {
        let snapshot = self.registry.snapshot().await;
        self.collector
            .collect(&snapshot, game_states, self.config.turn_deadline)
            .await
    }

    pub async fn add_players(&self, ids: HashSet<PlayerId>) -> LifecycleResults {
        self.lifecycle.add_players(ids).await
    }

    pub async fn remove_players(&self, ids: HashSet<PlayerId>) -> LifecycleResults {
        self.lifecycle.remove_players(ids).await
    }

    pub async fn update_code(&self, player_id: PlayerId, code: Vec<u8>) -> Result<(), OrchestratorError> {
        self.lifecycle.update_code(player_id, code).await
    }

    /// Brings the registry in line with the desired roster
    ///
    /// Missing players are added and given their code, players absent from
    /// `desired` are removed, and players whose code differs get the new code.
    pub async fn sync_players(&self, desired: HashMap<PlayerId, Vec<u8>>) -> SyncReport {
        let current: HashMap<PlayerId, WorkerHandle> = self
            .registry
            .handles()
            .await
            .into_iter()
            .map(|handle| (handle.player_id(), handle))
            .collect();

        let to_add: HashSet<PlayerId> = desired
            .keys()
            .filter(|id| !current.contains_key(*id))
            .copied()
            .collect();
        let to_remove: HashSet<PlayerId> = current
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .copied()
            .collect();

        info!(
            "Syncing players: {} to add, {} to remove",
            to_add.len(),
            to_remove.len()
        );

        let (added, removed) = tokio::join!(
            self.lifecycle.add_players(to_add),
            self.lifecycle.remove_players(to_remove)
        );

        let code_changes: HashMap<PlayerId, Vec<u8>> = desired
            .into_iter()
            .filter(|(id, code)| match current.get(id) {
                Some(handle) => handle.code() != code.as_slice(),
                None => matches!(added.get(id), Some(Ok(()))),
            })
            .collect();
        let code_updated = self.lifecycle.update_codes(code_changes).await;

        SyncReport {
            added,
            removed,
            code_updated,
        }
    }

    /// Last diagnostic log of every player that has one
    pub async fn logs(&self) -> HashMap<PlayerId, String> {
        self.registry
            .handles()
            .await
            .into_iter()
            .filter_map(|handle| {
                handle
                    .last_log()
                    .map(|log| (handle.player_id(), log.to_string()))
            })
            .collect()
    }

    /// Drops every cached log, typically once they have been published for a tick
    pub async fn clear_logs(&self) {
        self.registry.update_all(WorkerHandle::clear_log).await;
    }

    pub async fn handle(&self, player_id: PlayerId) -> Result<WorkerHandle, OrchestratorError> {
        self.registry.get(player_id).await
    }

    pub async fn player_ids(&self) -> Vec<PlayerId> {
        self.registry.player_ids().await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.is_empty().await
    }
}
