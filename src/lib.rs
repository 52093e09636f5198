//! gridsim - episodic multi-agent reinforcement-learning sandbox.
//!
//! Two grid worlds (beacon seeking and collect-and-deliver foraging), three
//! policy families (scripted, tabular Q-learning, linear genetic policy) and a
//! turn-based engine that drives them through repeated episodes.

pub mod agent;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod observation;
pub mod reward;
pub mod types;

pub use agent::{Agent, Policy};
pub use config::{AgentConfig, EnvironmentConfig, SimulationConfig};
pub use engine::{SimulationEngine, StepObserver};
pub use environment::{GridEnvironment, StepOutcome};
pub use error::{Result, SimError};
pub use metrics::{EpisodeRecord, MetricsSummary, MetricsTracker};
pub use observation::{Observation, Sensor};
pub use types::{Action, Cell, Direction, Mode};

/// Identifier type used for agents.
pub type Id = String;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
