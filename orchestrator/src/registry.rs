//! Authoritative record of which players are active and how to reach their workers
//!
//! This module handles:
//! - Creation, replacement and removal of worker handles
//! - Point-in-time snapshots used by turn collection
//! - Field updates that silently drop when the player is gone or superseded
//!
//! Every access goes through one reader/writer lock, and the lock is never held
//! across network I/O, so snapshots never wait on in-flight fetches.

use crate::error::OrchestratorError;
use crate::transport::WorkerTurn;
use log::{debug, info};
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::RwLock;

/// Identity and cached state of one player's worker
///
/// Identity fields (player, endpoint, generation) are fixed once the handle is
/// registered. The remaining fields change only through registry updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    player_id: PlayerId,
    endpoint: SocketAddr,
    generation: u64,
    code: Vec<u8>,
    last_action: Option<Vec<u8>>,
    last_log: Option<String>,
    code_updated: bool,
}

impl WorkerHandle {
    /// Creates an unregistered handle with no code and no cached turn
    pub fn new(player_id: PlayerId, endpoint: SocketAddr) -> Self {
        Self {
            player_id,
            endpoint,
            generation: 0,
            code: Vec::new(),
            last_action: None,
            last_log: None,
            code_updated: false,
        }
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Registry-assigned stamp, changes whenever the player's endpoint is replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn last_action(&self) -> Option<&[u8]> {
        self.last_action.as_deref()
    }

    pub fn last_log(&self) -> Option<&str> {
        self.last_log.as_deref()
    }

    pub fn code_updated(&self) -> bool {
        self.code_updated
    }

    pub fn set_code(&mut self, code: Vec<u8>) {
        self.code = code;
    }

    /// Caches the outcome of a successful turn fetch
    pub fn record_turn(&mut self, turn: WorkerTurn) {
        self.last_action = Some(turn.action);
        self.last_log = Some(turn.log);
        self.code_updated = turn.code_updated;
    }

    pub fn clear_log(&mut self) {
        self.last_log = None;
    }
}

/// One player as seen by a turn snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub player_id: PlayerId,
    pub endpoint: SocketAddr,
    pub generation: u64,
}

/// Immutable copy of the player to endpoint mapping taken at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSnapshot {
    entries: Vec<SnapshotEntry>,
}

impl TurnSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.player_id == player_id)
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.get(player_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    handles: HashMap<PlayerId, WorkerHandle>,
    next_generation: u64,
}

/// Thread-safe mapping from player to worker handle
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    inner: RwLock<RegistryInner>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every (player, endpoint, generation) triple under one read lock
    pub async fn snapshot(&self) -> TurnSnapshot {
        let inner = self.inner.read().await;
        let entries = inner
            .handles
            .values()
            .map(|handle| SnapshotEntry {
                player_id: handle.player_id,
                endpoint: handle.endpoint,
                generation: handle.generation,
            })
            .collect();

        TurnSnapshot { entries }
    }

    pub async fn get(&self, player_id: PlayerId) -> Result<WorkerHandle, OrchestratorError> {
        self.inner
            .read()
            .await
            .handles
            .get(&player_id)
            .cloned()
            .ok_or(OrchestratorError::NotFound(player_id))
    }

    /// Inserts or replaces the handle for `handle.player_id()`
    ///
    /// Every put stamps a fresh generation, so results fetched from the
    /// replaced incarnation can no longer be written back, even when the new
    /// worker answers on the same endpoint. Putting the same handle again
    /// leaves the same player, endpoint and code registered. Returns the new
    /// generation.
    pub async fn put(&self, mut handle: WorkerHandle) -> u64 {
        let mut inner = self.inner.write().await;

        inner.next_generation += 1;
        handle.generation = inner.next_generation;

        let generation = handle.generation;
        info!(
            "Registered {} at {} (generation {})",
            handle.player_id, handle.endpoint, generation
        );
        inner.handles.insert(handle.player_id, handle);

        generation
    }

    /// Removes a handle; absent players are not an error. Returns whether one was removed.
    pub async fn delete(&self, player_id: PlayerId) -> bool {
        let removed = self.inner.write().await.handles.remove(&player_id);
        if removed.is_some() {
            info!("Unregistered {}", player_id);
        }
        removed.is_some()
    }

    /// Applies `mutator` if the player is still registered. Returns whether it ran.
    pub async fn update_field<F>(&self, player_id: PlayerId, mutator: F) -> bool
    where
        F: FnOnce(&mut WorkerHandle),
    {
        match self.inner.write().await.handles.get_mut(&player_id) {
            Some(handle) => {
                mutator(handle);
                true
            }
            None => false,
        }
    }

    /// Like [`update_field`](Self::update_field), but only while the handle still
    /// carries `generation`
    pub async fn update_if_current<F>(&self, player_id: PlayerId, generation: u64, mutator: F) -> bool
    where
        F: FnOnce(&mut WorkerHandle),
    {
        match self.inner.write().await.handles.get_mut(&player_id) {
            Some(handle) if handle.generation == generation => {
                mutator(handle);
                true
            }
            Some(handle) => {
                debug!(
                    "Dropping update for {}: generation {} superseded by {}",
                    player_id, generation, handle.generation
                );
                false
            }
            None => {
                debug!("Dropping update for removed {}", player_id);
                false
            }
        }
    }

    /// Applies `mutator` to every registered handle under one write lock
    pub async fn update_all<F>(&self, mut mutator: F)
    where
        F: FnMut(&mut WorkerHandle),
    {
        for handle in self.inner.write().await.handles.values_mut() {
            mutator(handle);
        }
    }

    /// Clones every handle, for callers that need more than a snapshot
    pub async fn handles(&self) -> Vec<WorkerHandle> {
        self.inner.read().await.handles.values().cloned().collect()
    }

    pub async fn player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.inner.read().await.handles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.handles.is_empty()
    }
}
