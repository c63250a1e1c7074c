//! # Turn Orchestrator Library
//!
//! This library collects, once per simulation tick, the action every connected
//! player's worker wants to take, under a hard wall-clock budget, while players
//! keep joining, leaving and changing their code.
//!
//! ## Core Responsibilities
//!
//! ### Time-Bounded Turn Collection
//! Every tick fans out one request per player that has a game state, then fans
//! the answers back in until all workers replied or the turn deadline passed.
//! A slow or dead worker costs its own player the tick, nobody else's.
//!
//! ### Worker Lifecycle
//! Players are added, removed and given new code in batches. Each player in a
//! batch succeeds or fails on its own, and lifecycle calls run concurrently
//! with collection without ever blocking on it.
//!
//! ### Registry Consistency
//! The registry is the only record of who is playing. Collection works from a
//! snapshot taken at the start of the tick, so churn during the tick shows up
//! on the next one.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! - `WorkerHandle`: endpoint, code and cached turn of one player
//! - `WorkerRegistry`: lock-guarded map, snapshots, generation-checked updates
//!
//! ### Collector Module (`collector`)
//! - Per-tick fan-out/fan-in with deadline and cancellation
//! - `CollectionResult` handed to the simulation engine
//!
//! ### Lifecycle Module (`lifecycle`)
//! - Concurrent add/remove/code-update batches with per-player results
//!
//! ### Transport Module (`transport`)
//! - `WorkerClient` seam and the UDP implementation
//!
//! ### Provisioning Module (`provisioning`)
//! - `Provisioner` seam and an in-process backend running `worker` servers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use orchestrator::config::OrchestratorConfig;
//! use orchestrator::provisioning::LocalProvisioner;
//! use orchestrator::Orchestrator;
//! use shared::PlayerId;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use worker::policy::RandomWalk;
//!
//! #[tokio::main]
//! async fn main() {
//!     let provisioner = Arc::new(LocalProvisioner::new(Arc::new(RandomWalk)));
//!     let orchestrator = Orchestrator::with_udp_workers(
//!         OrchestratorConfig::new(Duration::from_millis(200)),
//!         provisioner,
//!     );
//!
//!     orchestrator.add_players([PlayerId(1), PlayerId(2)].into_iter().collect()).await;
//!
//!     let game_states: HashMap<PlayerId, Vec<u8>> = [
//!         (PlayerId(1), b"{\"tick\":0}".to_vec()),
//!         (PlayerId(2), b"{\"tick\":0}".to_vec()),
//!     ]
//!     .into_iter()
//!     .collect();
//!
//!     // Players that missed the deadline map to None
//!     let result = orchestrator.collect_turn(&game_states).await;
//!     for (player, action) in result.actions() {
//!         println!("{}: {:?}", player, action);
//!     }
//! }
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod provisioning;
pub mod registry;
pub mod service;
pub mod transport;

pub use service::Orchestrator;
