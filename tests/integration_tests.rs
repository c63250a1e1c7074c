//! Integration tests for turn collection against real workers
//!
//! Every test provisions `worker` servers in-process and talks to them over
//! loopback UDP, so the full request/response path is exercised.

use assert_approx_eq::assert_approx_eq;
use orchestrator::config::OrchestratorConfig;
use orchestrator::provisioning::LocalProvisioner;
use orchestrator::Orchestrator;
use shared::PlayerId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use worker::policy::{Decision, Policy, RandomWalk};

const A: PlayerId = PlayerId(1);
const B: PlayerId = PlayerId(2);
const C: PlayerId = PlayerId(3);

fn ids(players: &[PlayerId]) -> HashSet<PlayerId> {
    players.iter().copied().collect()
}

fn states(players: &[PlayerId]) -> HashMap<PlayerId, Vec<u8>> {
    players
        .iter()
        .map(|id| (*id, format!("{{\"player\":{}}}", id.0).into_bytes()))
        .collect()
}

fn new_orchestrator(provisioner: LocalProvisioner, deadline: Duration) -> Orchestrator {
    Orchestrator::with_udp_workers(OrchestratorConfig::new(deadline), Arc::new(provisioner))
}

/// Policy whose code always crashes for one player
struct BrokenFor(PlayerId);

impl Policy for BrokenFor {
    fn decide(
        &self,
        player_id: PlayerId,
        tick: u64,
        code: &[u8],
        game_state: &[u8],
    ) -> Result<Decision, String> {
        if player_id == self.0 {
            return Err("NameError: name 'avatar' is not defined".to_string());
        }
        RandomWalk.decide(player_id, tick, code, game_state)
    }
}

/// TURN COLLECTION TESTS
mod collection_tests {
    use super::*;

    /// Players {A, B, C}, game states for {A, B}, B never answers in time
    #[tokio::test]
    async fn slow_worker_does_not_stall_the_tick() {
        let provisioner = LocalProvisioner::new(Arc::new(RandomWalk)).with_player_latency(B, 10_000);
        let orchestrator = new_orchestrator(provisioner, Duration::from_secs(2));
        let added = orchestrator.add_players(ids(&[A, B, C])).await;
        assert!(added.values().all(|r| r.is_ok()));

        let started = Instant::now();
        let result = orchestrator.collect_turn(&states(&[A, B])).await;
        let elapsed = started.elapsed().as_secs_f64();

        assert_approx_eq!(elapsed, 2.0, 0.5);
        assert!(result.action(A).is_some());
        assert!(result.contains(B));
        assert_eq!(result.action(B), None);
        assert!(!result.contains(C));

        let c = orchestrator.handle(C).await.unwrap();
        assert_eq!(c.last_action(), None);
    }

    #[tokio::test]
    async fn failing_worker_is_contained() {
        let provisioner = LocalProvisioner::new(Arc::new(BrokenFor(B)));
        let orchestrator = new_orchestrator(provisioner, Duration::from_secs(1));
        orchestrator.add_players(ids(&[A, B, C])).await;

        let started = Instant::now();
        let result = orchestrator.collect_turn(&states(&[A, B, C])).await;

        // The failure is answered immediately, so nobody waits for the deadline
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(result.action(A).is_some());
        assert!(result.action(C).is_some());
        assert_eq!(result.action(B), None);
        assert!(result
            .failure(B)
            .unwrap()
            .to_string()
            .contains("NameError"));
    }

    #[tokio::test]
    async fn cancelled_fetch_is_dropped() {
        let provisioner = LocalProvisioner::new(Arc::new(RandomWalk)).with_player_latency(A, 300);
        let orchestrator = new_orchestrator(provisioner, Duration::from_millis(50));
        orchestrator.add_players(ids(&[A])).await;

        let first = orchestrator.collect_turn(&states(&[A])).await;
        assert_eq!(first.action(A), None);
        assert!(first.failure(A).unwrap().is_timeout());

        // The worker's late reply arrives after the tick moved on
        sleep(Duration::from_millis(600)).await;

        let handle = orchestrator.handle(A).await.unwrap();
        assert_eq!(handle.last_action(), None);
        assert_eq!(handle.last_log(), None);

        let second = orchestrator.collect_turn(&states(&[A])).await;
        assert_eq!(second.tick(), first.tick() + 1);
        assert_eq!(second.action(A), None);
    }

    #[tokio::test]
    async fn successful_turn_updates_handle() {
        let orchestrator = new_orchestrator(LocalProvisioner::new(Arc::new(RandomWalk)), Duration::from_secs(1));
        orchestrator.add_players(ids(&[A])).await;
        orchestrator.update_code(A, b"east".to_vec()).await.unwrap();

        let result = orchestrator.collect_turn(&states(&[A])).await;
        assert_eq!(result.action(A), Some(&b"east"[..]));

        let handle = orchestrator.handle(A).await.unwrap();
        assert_eq!(handle.last_action(), Some(&b"east"[..]));
        assert!(handle.code_updated());
        assert!(handle.last_log().unwrap().contains("chose east"));

        let next = orchestrator.collect_turn(&states(&[A])).await;
        assert_eq!(next.action(A), Some(&b"east"[..]));
        assert!(!orchestrator.handle(A).await.unwrap().code_updated());
    }
}

/// LIFECYCLE AND CHURN TESTS
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn removal_before_collect_excludes_player() {
        let orchestrator = new_orchestrator(LocalProvisioner::new(Arc::new(RandomWalk)), Duration::from_secs(1));
        orchestrator.add_players(ids(&[A, B])).await;

        let removed = orchestrator.remove_players(ids(&[B])).await;
        assert!(removed[&B].is_ok());

        let result = orchestrator.collect_turn(&states(&[A, B])).await;
        assert!(result.contains(A));
        assert!(!result.contains(B));
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let orchestrator = new_orchestrator(LocalProvisioner::new(Arc::new(RandomWalk)), Duration::from_secs(1));
        orchestrator.add_players(ids(&[A])).await;

        let first = orchestrator.remove_players(ids(&[A])).await;
        let second = orchestrator.remove_players(ids(&[A])).await;

        assert!(first[&A].is_ok());
        assert!(second[&A].is_ok());
        assert!(orchestrator.is_empty().await);
    }

    #[tokio::test]
    async fn add_during_collect_is_picked_up_next_tick() {
        let provisioner = LocalProvisioner::new(Arc::new(RandomWalk)).with_latency(100);
        let orchestrator = Arc::new(new_orchestrator(provisioner, Duration::from_secs(1)));
        orchestrator.add_players(ids(&[A])).await;

        let game_states = states(&[A, B]);
        let collecting = orchestrator.collect_turn(&game_states);
        let adding = async {
            sleep(Duration::from_millis(20)).await;
            orchestrator.add_players(ids(&[B])).await
        };
        let (first, added) = tokio::join!(collecting, adding);

        assert!(added[&B].is_ok());
        assert!(first.action(A).is_some());
        assert!(!first.contains(B));

        let second = orchestrator.collect_turn(&game_states).await;
        assert!(second.action(A).is_some());
        assert!(second.action(B).is_some());
        assert_eq!(orchestrator.player_ids().await, vec![A, B]);
    }

    #[tokio::test]
    async fn concurrent_churn_keeps_registry_consistent() {
        let orchestrator = Arc::new(new_orchestrator(
            LocalProvisioner::new(Arc::new(RandomWalk)),
            Duration::from_millis(500),
        ));
        let everyone: Vec<PlayerId> = (1..=20).map(PlayerId).collect();
        orchestrator.add_players(everyone[..10].iter().copied().collect()).await;

        let churn = {
            let orchestrator = Arc::clone(&orchestrator);
            let joining: HashSet<PlayerId> = everyone[10..].iter().copied().collect();
            let leaving: HashSet<PlayerId> = everyone[..5].iter().copied().collect();
            tokio::spawn(async move {
                let added = orchestrator.add_players(joining).await;
                let removed = orchestrator.remove_players(leaving).await;
                (added, removed)
            })
        };

        let game_states = states(&everyone);
        for _ in 0..3 {
            let result = orchestrator.collect_turn(&game_states).await;
            assert!(result.len() <= everyone.len());
        }

        let (added, removed) = churn.await.unwrap();
        assert!(added.values().chain(removed.values()).all(|r| r.is_ok()));

        let expected: Vec<PlayerId> = everyone[5..].to_vec();
        assert_eq!(orchestrator.player_ids().await, expected);

        let result = orchestrator.collect_turn(&game_states).await;
        assert_eq!(result.len(), 15);
        assert_eq!(result.answered(), 15);
    }

    #[tokio::test]
    async fn sync_players_reconciles_roster() {
        let orchestrator = new_orchestrator(LocalProvisioner::new(Arc::new(RandomWalk)), Duration::from_secs(1));
        orchestrator.add_players(ids(&[A, B])).await;

        let desired: HashMap<PlayerId, Vec<u8>> =
            [(B, b"north".to_vec()), (C, b"south".to_vec())].into_iter().collect();
        let report = orchestrator.sync_players(desired).await;
        assert!(report.is_clean());
        assert_eq!(orchestrator.player_ids().await, vec![B, C]);

        let result = orchestrator.collect_turn(&states(&[A, B, C])).await;
        assert!(!result.contains(A));
        assert_eq!(result.action(B), Some(&b"north"[..]));
        assert_eq!(result.action(C), Some(&b"south"[..]));

        let logs = orchestrator.logs().await;
        assert_eq!(logs.len(), 2);
        orchestrator.clear_logs().await;
        assert!(orchestrator.logs().await.is_empty());
    }
}
