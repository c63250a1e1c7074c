//! Worker network layer answering turn requests over UDP

use crate::policy::Policy;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, PlayerId, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tokio::time::sleep;

/// State shared between the receive loop and in-flight turn tasks
struct WorkerState {
    policy: Arc<dyn Policy>,
    code: RwLock<Vec<u8>>,
    code_updated: AtomicBool,
    fake_ping_ms: u64,
}

/// A worker backend serving one player's decisions
///
/// Every request is answered from its own task, so a slow decision never
/// delays the replies to later requests. Dropping or aborting the future
/// returned by [`WorkerServer::run`] also cancels every in-flight turn.
pub struct WorkerServer {
    socket: Arc<UdpSocket>,
    state: Arc<WorkerState>,
}

impl WorkerServer {
    pub async fn bind(
        addr: &str,
        policy: Arc<dyn Policy>,
        fake_ping_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Worker listening on {}", socket.local_addr()?);

        Ok(WorkerServer {
            socket,
            state: Arc::new(WorkerState {
                policy,
                code: RwLock::new(Vec::new()),
                code_updated: AtomicBool::new(false),
                fake_ping_ms,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Cheap handle for replacing the player's code while the server runs
    pub fn code_loader(&self) -> CodeLoader {
        CodeLoader {
            state: Arc::clone(&self.state),
        }
    }

    /// Serves requests until the socket reports a non-transient error
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut turns = JoinSet::new();
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                            Ok(packet) => {
                                let socket = Arc::clone(&self.socket);
                                let state = Arc::clone(&self.state);
                                turns.spawn(async move {
                                    handle_packet(&socket, &state, packet, addr).await;
                                });
                            }
                            Err(_) => warn!("Failed to deserialize packet from {}", addr),
                        },
                        Err(e) if is_transient(&e) => {
                            warn!("Transient receive error: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                        Err(e) => {
                            error!("Error receiving packet: {}", e);
                            turns.abort_all();
                            return Err(e.into());
                        }
                    }
                },

                // Reap finished turns so the set does not grow without bound
                Some(joined) = turns.join_next(), if !turns.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Turn task panicked: {}", e);
                        }
                    }
                },
            }
        }
    }
}

/// Errors after which the socket is still usable
///
/// ICMP port-unreachable replies surface as resets or refusals on the next receive.
fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

/// Replaces the code a running worker decides with
#[derive(Clone)]
pub struct CodeLoader {
    state: Arc<WorkerState>,
}

impl CodeLoader {
    pub fn load(&self, code: Vec<u8>) {
        match self.state.code.write() {
            Ok(mut current) => *current = code,
            Err(poisoned) => *poisoned.into_inner() = code,
        }
        self.state.code_updated.store(true, Ordering::SeqCst);
    }
}

async fn handle_packet(socket: &UdpSocket, state: &WorkerState, packet: Packet, addr: SocketAddr) {
    let reply = match packet {
        Packet::TurnRequest {
            protocol_version,
            request_id,
            tick,
            player_id,
            game_state,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "Rejecting request {} with protocol version {}",
                    request_id, protocol_version
                );
                Packet::TurnFailed {
                    request_id,
                    reason: "Protocol version mismatch".to_string(),
                }
            } else {
                if state.fake_ping_ms > 0 {
                    sleep(Duration::from_millis(state.fake_ping_ms)).await;
                }
                take_turn(state, request_id, tick, player_id, &game_state)
            }
        }

        other => {
            warn!(
                "Unexpected packet type from {} (request {})",
                addr,
                other.request_id()
            );
            return;
        }
    };

    match serialize(&reply) {
        Ok(data) => {
            if let Err(e) = socket.send_to(&data, addr).await {
                error!("Failed to send reply to {}: {}", addr, e);
            }
        }
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}

fn take_turn(
    state: &WorkerState,
    request_id: u64,
    tick: u64,
    player_id: PlayerId,
    game_state: &[u8],
) -> Packet {
    let code = match state.code.read() {
        Ok(code) => code.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };

    match state.policy.decide(player_id, tick, &code, game_state) {
        Ok(decision) => {
            debug!("Tick {}: {} decided", tick, player_id);
            Packet::TurnResponse {
                request_id,
                tick,
                action: decision.action,
                log: decision.log,
                code_updated: state.code_updated.swap(false, Ordering::SeqCst),
            }
        }
        Err(reason) => {
            warn!("Tick {}: {} failed to decide: {}", tick, player_id, reason);
            Packet::TurnFailed { request_id, reason }
        }
    }
}
