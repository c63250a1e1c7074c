//! # Worker Library
//!
//! Reference implementation of a worker backend: the remote process that runs
//! one player's decision logic and answers the orchestrator's turn requests.
//!
//! ## Protocol
//!
//! The orchestrator sends a `Packet::TurnRequest` carrying the player's view of
//! the game state. The worker answers with either `Packet::TurnResponse`
//! (action, diagnostic log, whether new code was loaded since the previous
//! turn) or `Packet::TurnFailed` when the player's code could not decide.
//! Packets are `bincode` encoded, one per UDP datagram.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - UDP socket management and request dispatch
//! - One task per request, cancelled together with the server
//! - Optional artificial latency for exercising turn deadlines
//!
//! ### Policy Module (`policy`)
//! - The `Policy` trait mapping (code, game state) to an action
//! - `RandomWalk`, the built-in policy used by the worker binary
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use worker::network::WorkerServer;
//! use worker::policy::RandomWalk;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = WorkerServer::bind("127.0.0.1:9000", Arc::new(RandomWalk), 0).await?;
//!     server.code_loader().load(b"north east".to_vec());
//!     server.run().await
//! }
//! ```

pub mod network;
pub mod policy;
