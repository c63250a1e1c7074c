//! Error taxonomy for turn collection and worker lifecycle
//!
//! No error here is fatal to the orchestrator as a whole. Worker failures end
//! up as "no action this tick" for one player, lifecycle failures are reported
//! per player so the caller can decide whether to retry.

use shared::PlayerId;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to one worker backend during a turn fetch
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("i/o error talking to worker: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply within the {0:?} turn deadline")]
    Timeout(Duration),

    #[error("malformed reply: {0}")]
    Malformed(String),

    #[error("worker could not decide: {0}")]
    Rejected(String),
}

/// Failure reported by the provisioning backend
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("worker for {player_id} unavailable: {source}")]
    WorkerUnavailable {
        player_id: PlayerId,
        #[source]
        source: WorkerError,
    },

    #[error("provisioning failed for {player_id}: {source}")]
    ProvisioningFailure {
        player_id: PlayerId,
        #[source]
        source: ProvisionError,
    },

    #[error("{0} is not registered")]
    NotFound(PlayerId),
}

impl OrchestratorError {
    pub fn player_id(&self) -> PlayerId {
        match self {
            OrchestratorError::WorkerUnavailable { player_id, .. }
            | OrchestratorError::ProvisioningFailure { player_id, .. } => *player_id,
            OrchestratorError::NotFound(player_id) => *player_id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            OrchestratorError::WorkerUnavailable {
                source: WorkerError::Timeout(_),
                ..
            }
        )
    }
}
