use shared::DEFAULT_TURN_DEADLINE_MS;
use std::time::Duration;

/// Tuning knobs for an [`Orchestrator`](crate::Orchestrator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Wall-clock budget for collecting every worker's action in one tick
    pub turn_deadline: Duration,
    /// Cap on simultaneous turn fetches, unbounded when `None`
    pub max_concurrent_fetches: Option<usize>,
    /// Cap on simultaneous create/destroy calls to the provisioning backend
    pub max_concurrent_provisioning: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            turn_deadline: Duration::from_millis(DEFAULT_TURN_DEADLINE_MS),
            max_concurrent_fetches: None,
            max_concurrent_provisioning: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(turn_deadline: Duration) -> Self {
        Self {
            turn_deadline,
            ..Self::default()
        }
    }

    pub fn with_turn_deadline(mut self, deadline: Duration) -> Self {
        self.turn_deadline = deadline;
        self
    }

    /// A limit of zero would stall every tick, so it is raised to one
    pub fn with_max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = Some(limit.max(1));
        self
    }

    pub fn with_max_concurrent_provisioning(mut self, limit: usize) -> Self {
        self.max_concurrent_provisioning = Some(limit.max(1));
        self
    }
}
