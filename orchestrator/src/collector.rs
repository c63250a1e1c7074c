//! Per-tick fan-out of turn requests under a wall-clock deadline
//!
//! One collection run:
//! 1. Spawns a fetch task for every snapshot player that has a game state
//! 2. Joins tasks as they finish, until all are done or the deadline passes
//! 3. Aborts whatever is still outstanding at the deadline
//! 4. Writes successful turns back to the registry, skipping handles that
//!    were removed or re-provisioned after the snapshot was taken
//!
//! Fetch tasks hand their results back only through the join set. Once a task
//! is aborted nothing it produces can reach the registry or any later result.

use crate::error::{OrchestratorError, WorkerError};
use crate::registry::{SnapshotEntry, TurnSnapshot, WorkerRegistry};
use crate::transport::{TurnRequest, WorkerClient, WorkerTurn};
use log::{debug, error, warn};
use shared::PlayerId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio::time::{timeout_at, Instant};

/// Actions gathered in one tick, handed to the simulation engine
///
/// Every player that was asked for a turn has an entry: `Some(action)` when
/// the worker answered in time, `None` otherwise. Players without a game
/// state were never asked and have no entry.
#[derive(Debug, Default)]
pub struct CollectionResult {
    tick: u64,
    actions: HashMap<PlayerId, Option<Vec<u8>>>,
    failures: HashMap<PlayerId, OrchestratorError>,
}

impl CollectionResult {
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The player's action, if one arrived before the deadline
    pub fn action(&self, player_id: PlayerId) -> Option<&[u8]> {
        self.actions.get(&player_id).and_then(|a| a.as_deref())
    }

    /// Whether the player was asked for a turn this tick
    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.actions.contains_key(&player_id)
    }

    pub fn actions(&self) -> &HashMap<PlayerId, Option<Vec<u8>>> {
        &self.actions
    }

    pub fn into_actions(self) -> HashMap<PlayerId, Option<Vec<u8>>> {
        self.actions
    }

    /// Why a player produced no action
    pub fn failure(&self, player_id: PlayerId) -> Option<&OrchestratorError> {
        self.failures.get(&player_id)
    }

    pub fn failures(&self) -> &HashMap<PlayerId, OrchestratorError> {
        &self.failures
    }

    /// Number of players that produced an action
    pub fn answered(&self) -> usize {
        self.actions.values().filter(|a| a.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

type FetchOutcome = (SnapshotEntry, Result<WorkerTurn, WorkerError>);

pub struct TurnCollector {
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
    fetch_limit: Option<Arc<Semaphore>>,
    next_tick: AtomicU64,
}

impl TurnCollector {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        client: Arc<dyn WorkerClient>,
        max_concurrent_fetches: Option<usize>,
    ) -> Self {
        Self {
            registry,
            client,
            fetch_limit: max_concurrent_fetches.map(|n| Arc::new(Semaphore::new(n))),
            next_tick: AtomicU64::new(1),
        }
    }

    /// Collects one tick's actions from the workers in `snapshot`
    ///
    /// Returns no later than `deadline` after the call (plus scheduling
    /// slack), no matter how long individual workers take.
    pub async fn collect(
        &self,
        snapshot: &TurnSnapshot,
        game_states: &HashMap<PlayerId, Vec<u8>>,
        deadline: Duration,
    ) -> CollectionResult {
        let deadline_at = Instant::now() + deadline;
        let tick = self.next_tick.fetch_add(1, Ordering::SeqCst);

        let mut result = CollectionResult {
            tick,
            ..CollectionResult::default()
        };
        let mut fetches: JoinSet<FetchOutcome> = JoinSet::new();
        let mut fetch_owners: HashMap<Id, PlayerId> = HashMap::new();

        for entry in snapshot.iter().copied() {
            let game_state = match game_states.get(&entry.player_id) {
                Some(state) => state.clone(),
                None => continue,
            };

            result.actions.insert(entry.player_id, None);

            let client = Arc::clone(&self.client);
            let limit = self.fetch_limit.clone();
            let fetch = fetches.spawn(async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };

                let request = TurnRequest {
                    tick,
                    player_id: entry.player_id,
                    game_state,
                };
                (entry, client.fetch_turn(entry.endpoint, request).await)
            });
            fetch_owners.insert(fetch.id(), entry.player_id);
        }

        let mut completed = Vec::new();
        loop {
            match timeout_at(deadline_at, fetches.join_next()).await {
                Ok(Some(Ok((entry, Ok(turn))))) => {
                    result
                        .actions
                        .insert(entry.player_id, Some(turn.action.clone()));
                    completed.push((entry, turn));
                }
                Ok(Some(Ok((entry, Err(source))))) => {
                    let failure = OrchestratorError::WorkerUnavailable {
                        player_id: entry.player_id,
                        source,
                    };
                    if matches!(
                        failure,
                        OrchestratorError::WorkerUnavailable {
                            source: WorkerError::Malformed(_),
                            ..
                        }
                    ) {
                        error!("Tick {}: {}", tick, failure);
                    } else {
                        warn!("Tick {}: {}", tick, failure);
                    }
                    result.failures.insert(entry.player_id, failure);
                }
                Ok(Some(Err(join_error))) => {
                    error!("Tick {}: fetch task failed: {}", tick, join_error);
                    if let Some(player_id) = fetch_owners.get(&join_error.id()).copied() {
                        let source = WorkerError::Rejected("fetch task panicked".to_string());
                        result
                            .failures
                            .insert(player_id, OrchestratorError::WorkerUnavailable { player_id, source });
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "Tick {}: deadline reached with {} fetches outstanding",
                        tick,
                        fetches.len()
                    );
                    fetches.abort_all();
                    break;
                }
            }
        }
        drop(fetches);

        let missing: Vec<PlayerId> = result
            .actions
            .iter()
            .filter(|(id, action)| action.is_none() && !result.failures.contains_key(*id))
            .map(|(id, _)| *id)
            .collect();
        for player_id in missing {
            let failure = OrchestratorError::WorkerUnavailable {
                player_id,
                source: WorkerError::Timeout(deadline),
            };
            warn!("Tick {}: {}", tick, failure);
            result.failures.insert(player_id, failure);
        }

        for (entry, turn) in completed {
            let written = self
                .registry
                .update_if_current(entry.player_id, entry.generation, |handle| {
                    handle.record_turn(turn)
                })
                .await;
            if !written {
                debug!(
                    "Tick {}: {} left or was re-provisioned mid-tick, cached turn not updated",
                    tick, entry.player_id
                );
            }
        }

        debug!(
            "Tick {}: {}/{} players answered",
            tick,
            result.answered(),
            result.len()
        );
        result
    }
}
