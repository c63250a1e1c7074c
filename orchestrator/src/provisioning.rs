//! Worker provisioning backends
//!
//! [`Provisioner`] is the boundary to whatever actually starts and stops worker
//! processes. [`LocalProvisioner`] runs `worker` servers as tasks inside this
//! process, which is enough for local matches and tests.

use crate::error::ProvisionError;
use async_trait::async_trait;
use log::{info, warn};
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use worker::network::{CodeLoader, WorkerServer};
use worker::policy::Policy;

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Starts a worker for `player_id` and returns the address it answers on
    async fn create_worker(&self, player_id: PlayerId) -> Result<SocketAddr, ProvisionError>;

    /// Stops the player's worker. Stopping an unknown player must succeed.
    async fn destroy_worker(&self, player_id: PlayerId) -> Result<(), ProvisionError>;

    /// Hands new player code to a running worker
    ///
    /// Backends whose workers fetch their own code can keep the default.
    async fn deliver_code(&self, _player_id: PlayerId, _code: &[u8]) -> Result<(), ProvisionError> {
        Ok(())
    }
}

struct LocalWorker {
    addr: SocketAddr,
    loader: CodeLoader,
    task: JoinHandle<()>,
}

/// Runs each player's worker as a task on the current tokio runtime
pub struct LocalProvisioner {
    policy: Arc<dyn Policy>,
    default_latency_ms: u64,
    latency_overrides: HashMap<PlayerId, u64>,
    workers: Mutex<HashMap<PlayerId, LocalWorker>>,
}

impl LocalProvisioner {
    pub fn new(policy: Arc<dyn Policy>) -> Self {
        Self {
            policy,
            default_latency_ms: 0,
            latency_overrides: HashMap::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Delays every worker's replies by `latency_ms`
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.default_latency_ms = latency_ms;
        self
    }

    /// Delays one player's replies, overriding the default latency
    pub fn with_player_latency(mut self, player_id: PlayerId, latency_ms: u64) -> Self {
        self.latency_overrides.insert(player_id, latency_ms);
        self
    }

    pub fn worker_addr(&self, player_id: PlayerId) -> Option<SocketAddr> {
        self.lock_workers().get(&player_id).map(|w| w.addr)
    }

    pub fn running(&self) -> usize {
        self.lock_workers().len()
    }

    fn lock_workers(&self) -> MutexGuard<'_, HashMap<PlayerId, LocalWorker>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Local worker table lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create_worker(&self, player_id: PlayerId) -> Result<SocketAddr, ProvisionError> {
        let latency = self
            .latency_overrides
            .get(&player_id)
            .copied()
            .unwrap_or(self.default_latency_ms);

        let server = WorkerServer::bind("127.0.0.1:0", Arc::clone(&self.policy), latency)
            .await
            .map_err(|e| ProvisionError::Backend(e.to_string()))?;
        let addr = server.local_addr()?;
        let loader = server.code_loader();

        let task = tokio::spawn(async move {
            if let Err(e) = server.run().await {
                warn!("Local worker for {} stopped: {}", player_id, e);
            }
        });

        let previous = self
            .lock_workers()
            .insert(player_id, LocalWorker { addr, loader, task });
        if let Some(previous) = previous {
            warn!("Replacing running worker for {} at {}", player_id, previous.addr);
            previous.task.abort();
        }

        info!("Started local worker for {} on {}", player_id, addr);
        Ok(addr)
    }

    async fn destroy_worker(&self, player_id: PlayerId) -> Result<(), ProvisionError> {
        if let Some(worker) = self.lock_workers().remove(&player_id) {
            worker.task.abort();
            info!("Stopped local worker for {}", player_id);
        }
        Ok(())
    }

    async fn deliver_code(&self, player_id: PlayerId, code: &[u8]) -> Result<(), ProvisionError> {
        match self.lock_workers().get(&player_id) {
            Some(worker) => {
                worker.loader.load(code.to_vec());
                Ok(())
            }
            None => Err(ProvisionError::Backend(format!(
                "no local worker running for {}",
                player_id
            ))),
        }
    }
}

impl Drop for LocalProvisioner {
    fn drop(&mut self) {
        for (_, worker) in self.lock_workers().drain() {
            worker.task.abort();
        }
    }
}
