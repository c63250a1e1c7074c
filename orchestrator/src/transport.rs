//! Turn fetches from worker backends
//!
//! [`WorkerClient`] is the seam between turn collection and however workers are
//! actually reached. [`UdpWorkerClient`] speaks the `shared::Packet` protocol,
//! one request datagram and one reply datagram per turn.

use crate::error::WorkerError;
use async_trait::async_trait;
use bincode::{deserialize, serialize};
use log::debug;
use shared::{Packet, PlayerId, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket;

/// What the orchestrator sends a worker for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub tick: u64,
    pub player_id: PlayerId,
    pub game_state: Vec<u8>,
}

/// A worker's successful answer for one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTurn {
    pub action: Vec<u8>,
    pub log: String,
    /// The worker loaded new player code since its previous turn
    pub code_updated: bool,
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Asks the worker at `endpoint` for its action.
    ///
    /// Implementations need not enforce a deadline: the caller drops the
    /// returned future when the tick's budget runs out.
    async fn fetch_turn(
        &self,
        endpoint: SocketAddr,
        request: TurnRequest,
    ) -> Result<WorkerTurn, WorkerError>;
}

/// Fetches turns over UDP, using a fresh ephemeral socket per request
#[derive(Debug, Default)]
pub struct UdpWorkerClient {
    next_request_id: AtomicU64,
}

impl UdpWorkerClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerClient for UdpWorkerClient {
    async fn fetch_turn(
        &self,
        endpoint: SocketAddr,
        request: TurnRequest,
    ) -> Result<WorkerTurn, WorkerError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let bind_addr = if endpoint.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(endpoint).await?;

        let packet = Packet::turn_request(
            request_id,
            request.tick,
            request.player_id,
            request.game_state,
        );
        let data = serialize(&packet).map_err(|e| WorkerError::Malformed(e.to_string()))?;
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(WorkerError::Malformed(format!(
                "game state too large for one datagram ({} bytes)",
                data.len()
            )));
        }
        socket.send(&data).await?;

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = socket.recv(&mut buffer).await?;
        debug!("{} bytes from {} for {}", len, endpoint, request.player_id);

        let reply = deserialize::<Packet>(&buffer[..len])
            .map_err(|e| WorkerError::Malformed(e.to_string()))?;
        parse_reply(reply, request_id, request.tick)
    }
}

/// Validates a worker's reply against the request it answers
fn parse_reply(reply: Packet, request_id: u64, tick: u64) -> Result<WorkerTurn, WorkerError> {
    match reply {
        Packet::TurnResponse {
            request_id: reply_id,
            tick: reply_tick,
            action,
            log,
            code_updated,
        } => {
            if reply_id != request_id || reply_tick != tick {
                return Err(WorkerError::Malformed(format!(
                    "reply for request {} tick {}, expected request {} tick {}",
                    reply_id, reply_tick, request_id, tick
                )));
            }
            if action.is_empty() {
                return Err(WorkerError::Malformed("empty action".to_string()));
            }
            Ok(WorkerTurn {
                action,
                log,
                code_updated,
            })
        }
        Packet::TurnFailed { reason, .. } => Err(WorkerError::Rejected(reason)),
        Packet::TurnRequest { .. } => Err(WorkerError::Malformed(
            "worker sent a turn request".to_string(),
        )),
    }
}
