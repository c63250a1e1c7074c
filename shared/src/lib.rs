use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
pub const DEFAULT_TURN_DEADLINE_MS: u64 = 2_000;

/// Opaque identifier of a player, unique within one match.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player-{}", self.0)
    }
}

impl From<u32> for PlayerId {
    fn from(value: u32) -> Self {
        PlayerId(value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    /// Orchestrator asks a worker for the action its player takes this tick.
    TurnRequest {
        protocol_version: u32,
        request_id: u64,
        tick: u64,
        player_id: PlayerId,
        game_state: Vec<u8>,
    },

    TurnResponse {
        request_id: u64,
        tick: u64,
        action: Vec<u8>,
        log: String,
        code_updated: bool,
    },
    TurnFailed {
        request_id: u64,
        reason: String,
    },
}

impl Packet {
    pub fn turn_request(request_id: u64, tick: u64, player_id: PlayerId, game_state: Vec<u8>) -> Self {
        Packet::TurnRequest {
            protocol_version: PROTOCOL_VERSION,
            request_id,
            tick,
            player_id,
            game_state,
        }
    }

    /// Request id a reply refers to, or the request's own id.
    pub fn request_id(&self) -> u64 {
        match self {
            Packet::TurnRequest { request_id, .. }
            | Packet::TurnResponse { request_id, .. }
            | Packet::TurnFailed { request_id, .. } => *request_id,
        }
    }
}
