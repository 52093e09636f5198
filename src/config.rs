//! Configuration records for environments, agents and runs.
//!
//! Every record deserializes from JSON or TOML. Problem and agent kinds are
//! internally tagged enums, so an unknown kind fails at load time.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::genetic::{FeatureSet, FitnessShaping};
use crate::agent::qlearning::StateAbstraction;
use crate::agent::scripted::ScriptedPolicy;
use crate::environment::grid::MAX_VISION_RADIUS;
use crate::error::{Result, SimError};
use crate::observation::Sensor;
use crate::reward::{BeaconRewards, ForagingRewards};
use crate::types::{Action, Cell, Mode};
use crate::Id;

/// The two grid-world problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    Beacon,
    Foraging,
}

impl ProblemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProblemKind::Beacon => "beacon",
            ProblemKind::Foraging => "foraging",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of episodes to run.
    #[serde(default = "default_episodes")]
    pub episodes: u32,
    /// Step ceiling per episode.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Seed of the single random stream driving the run.
    #[serde(default)]
    pub seed: Option<u64>,
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn collect_unknown(
    raw: &serde_json::Value,
    parsed: &serde_json::Value,
    prefix: &str,
    out: &mut Vec<String>,
) {
    let (Some(raw), Some(parsed)) = (raw.as_object(), parsed.as_object()) else {
        return;
    };
    out.extend(
        raw.keys()
            .filter(|key| !parsed.contains_key(*key))
            .map(|key| format!("{}{}", prefix, key)),
    );
}

fn default_episodes() -> u32 {
    10
}

fn default_max_steps() -> u32 {
    200
}

impl SimulationConfig {
    /// Loads a configuration file; `.toml` files are parsed as TOML, anything
    /// else as JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            _ => Self::from_json_str(&content)?,
        };
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        let raw: serde_json::Value = serde_json::from_str(content)?;
        config.warn_unknown_keys(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        let raw = serde_json::to_value(content.parse::<toml::Table>()?)?;
        config.warn_unknown_keys(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Keys of `raw` that no field of the parsed record consumed.
    ///
    /// Agent hyperparameters are flattened next to the agent fields, so a
    /// misspelt key is otherwise dropped silently and its default applies.
    pub fn unknown_keys(&self, raw: &serde_json::Value) -> Result<Vec<String>> {
        let parsed = serde_json::to_value(self)?;
        let mut unknown = Vec::new();
        collect_unknown(raw, &parsed, "", &mut unknown);
        collect_unknown(
            &raw["environment"],
            &parsed["environment"],
            "environment.",
            &mut unknown,
        );
        if let (Some(raw_agents), Some(agents)) = (raw["agents"].as_array(), parsed["agents"].as_array()) {
            for (i, (raw_agent, agent)) in raw_agents.iter().zip(agents).enumerate() {
                collect_unknown(raw_agent, agent, &format!("agents[{}].", i), &mut unknown);
            }
        }
        Ok(unknown)
    }

    fn warn_unknown_keys(&self, raw: &serde_json::Value) -> Result<()> {
        for key in self.unknown_keys(raw)? {
            warn!(key = %key, "unknown configuration key ignored");
        }
        Ok(())
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(SimError::Config("max_steps must be positive".into()));
        }
        let mut seen = BTreeSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(SimError::Config(format!("duplicate agent id '{}'", agent.id)));
            }
            agent.validate()?;
        }
        Ok(())
    }
}

/// Environment configuration, tagged by `problem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "problem", rename_all = "snake_case")]
pub enum EnvironmentConfig {
    Beacon(BeaconConfig),
    Foraging(ForagingConfig),
}

impl EnvironmentConfig {
    pub fn kind(&self) -> ProblemKind {
        match self {
            EnvironmentConfig::Beacon(_) => ProblemKind::Beacon,
            EnvironmentConfig::Foraging(_) => ProblemKind::Foraging,
        }
    }
}

/// Beacon-seeking world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub width: u32,
    pub height: u32,
    /// Target cell; the grid centre when omitted.
    pub beacon: Option<Cell>,
    pub walls: Vec<Cell>,
    pub rewards: BeaconRewards,
}

impl BeaconConfig {
    pub fn beacon_cell(&self) -> Cell {
        self.beacon
            .unwrap_or_else(|| Cell::new((self.width / 2) as i32, (self.height / 2) as i32))
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            beacon: None,
            walls: Vec::new(),
            rewards: BeaconRewards::default(),
        }
    }
}

/// Collect-and-deliver foraging world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForagingConfig {
    pub width: u32,
    pub height: u32,
    pub nest: Cell,
    pub walls: Vec<Cell>,
    /// Fixed resource cells restored on every reset.
    pub resources: Vec<Cell>,
    /// Extra resources scattered on random free cells at every reset.
    pub random_resources: usize,
    /// Place agents without an explicit spawn on the nest instead of a
    /// random free cell.
    pub spawn_at_nest: bool,
    pub rewards: ForagingRewards,
}

impl Default for ForagingConfig {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            nest: Cell::new(0, 0),
            walls: Vec::new(),
            resources: Vec::new(),
            random_resources: 0,
            spawn_at_nest: false,
            rewards: ForagingRewards::default(),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "crate::generate_id")]
    pub id: Id,
    #[serde(default)]
    pub mode: Mode,
    /// Explicit spawn cell used on every reset.
    #[serde(default)]
    pub spawn: Option<Cell>,
    /// Installed sensors; problem defaults when omitted.
    #[serde(default)]
    pub sensors: Option<Vec<Sensor>>,
    #[serde(flatten)]
    pub kind: AgentKindConfig,
}

impl AgentConfig {
    pub fn new(id: impl Into<Id>, mode: Mode, kind: AgentKindConfig) -> Self {
        Self {
            id: id.into(),
            mode,
            spawn: None,
            sensors: None,
            kind,
        }
    }

    pub fn with_spawn(mut self, cell: Cell) -> Self {
        self.spawn = Some(cell);
        self
    }

    pub fn with_sensors(mut self, sensors: Vec<Sensor>) -> Self {
        self.sensors = Some(sensors);
        self
    }

    /// Installed sensors, falling back to the defaults for `problem`.
    pub fn sensors_for(&self, problem: ProblemKind) -> Vec<Sensor> {
        match &self.sensors {
            Some(sensors) => sensors.clone(),
            None => default_sensors(problem),
        }
    }

    fn validate(&self) -> Result<()> {
        for sensor in self.sensors.iter().flatten() {
            if let Sensor::Vision { radius } = sensor {
                if *radius > MAX_VISION_RADIUS {
                    return Err(SimError::Config(format!(
                        "agent '{}': vision radius {} exceeds {}",
                        self.id, radius, MAX_VISION_RADIUS
                    )));
                }
            }
        }
        match &self.kind {
            AgentKindConfig::Scripted { .. } => Ok(()),
            AgentKindConfig::QLearner(q) => q.validate(&self.id),
            AgentKindConfig::Genetic(g) => g.validate(&self.id),
        }
    }
}

/// Default sensor set of each problem.
pub fn default_sensors(problem: ProblemKind) -> Vec<Sensor> {
    match problem {
        ProblemKind::Beacon => vec![Sensor::Vision { radius: 1 }, Sensor::Beacon],
        ProblemKind::Foraging => vec![
            Sensor::Vision { radius: 1 },
            Sensor::Nest,
            Sensor::Carrying,
            Sensor::NearestResource,
        ],
    }
}

/// Agent kind with its hyperparameters, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentKindConfig {
    Scripted {
        #[serde(default)]
        policy: ScriptedPolicy,
    },
    QLearner(QLearnerConfig),
    Genetic(GeneticConfig),
}

impl AgentKindConfig {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKindConfig::Scripted { .. } => "scripted",
            AgentKindConfig::QLearner(_) => "q_learner",
            AgentKindConfig::Genetic(_) => "genetic",
        }
    }
}

/// Hyperparameters of the tabular Q-learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QLearnerConfig {
    /// Learning rate α.
    pub alpha: f64,
    /// Discount factor γ.
    pub gamma: f64,
    /// Exploration rate ε.
    pub epsilon: f64,
    pub epsilon_min: f64,
    /// Per-episode geometric decay of ε.
    pub epsilon_decay: f64,
    pub alpha_min: f64,
    /// Per-episode geometric decay of α.
    pub alpha_decay: f64,
    /// Episode index after which the accelerated decay factor applies.
    pub accelerate_after: Option<u32>,
    /// Decay factor used for both ε and α after `accelerate_after`.
    pub accelerated_decay: f64,
    /// Action set of the learner.
    pub actions: Vec<Action>,
    /// State abstraction; the problem's compact encoding when omitted.
    pub abstraction: Option<StateAbstraction>,
    /// Initial value of the action pointing toward the goal in new rows.
    pub optimistic_prior: Option<f64>,
    /// Q-table loaded at construction.
    pub table_path: Option<PathBuf>,
}

impl Default for QLearnerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            gamma: 0.95,
            epsilon: 0.2,
            epsilon_min: 0.05,
            epsilon_decay: 0.995,
            alpha_min: 0.05,
            alpha_decay: 0.999,
            accelerate_after: None,
            accelerated_decay: 0.98,
            actions: Action::MOVES.to_vec(),
            abstraction: None,
            optimistic_prior: None,
            table_path: None,
        }
    }
}

impl QLearnerConfig {
    fn validate(&self, id: &str) -> Result<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(SimError::Config(format!(
                    "agent '{}': {} must be within [0, 1], got {}",
                    id, name, v
                )))
            }
        };
        unit("alpha", self.alpha)?;
        unit("gamma", self.gamma)?;
        unit("epsilon", self.epsilon)?;
        unit("epsilon_min", self.epsilon_min)?;
        unit("epsilon_decay", self.epsilon_decay)?;
        unit("alpha_min", self.alpha_min)?;
        unit("alpha_decay", self.alpha_decay)?;
        unit("accelerated_decay", self.accelerated_decay)?;
        if self.actions.is_empty() {
            return Err(SimError::Config(format!("agent '{}': empty action set", id)));
        }
        Ok(())
    }
}

/// Hyperparameters of the genetic linear policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    /// Size of the elite population.
    pub population_size: usize,
    /// Softmax temperatures for the early, middle and late phases of a run.
    pub temperature_high: f64,
    pub temperature_mid: f64,
    pub temperature_low: f64,
    /// Run-progress fractions separating the three temperature phases.
    pub early_phase: f64,
    pub late_phase: f64,
    /// Probability of producing a varied genome instead of reusing the best.
    pub explore_probability: f64,
    /// Fraction of the run during which variation is allowed.
    pub explore_fraction: f64,
    /// Probability that a variation uses crossover rather than mutation only.
    pub crossover_probability: f64,
    /// Probability that a feature block is inherited from the first parent.
    pub inherit_probability: f64,
    pub mutation_rate: f64,
    pub mutation_rate_min: f64,
    pub mutation_scale: f64,
    pub mutation_scale_min: f64,
    /// Per-generation decay of mutation rate and scale.
    pub mutation_decay: f64,
    /// Standard deviation of the initial random genome.
    pub init_scale: f64,
    /// Number of recent cells inspected for loops.
    pub stagnation_window: usize,
    /// A window with at most this many distinct cells counts as stagnating.
    pub stagnation_distinct: usize,
    /// Consecutive stagnating steps that force a random action.
    pub stagnation_threshold: u32,
    pub actions: Vec<Action>,
    /// Feature extractor; the problem's default when omitted.
    pub features: Option<FeatureSet>,
    /// Fitness shaping; the problem's default when omitted.
    pub fitness: Option<FitnessShaping>,
    /// Genome loaded at construction.
    pub genome_path: Option<PathBuf>,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 10,
            temperature_high: 2.0,
            temperature_mid: 1.0,
            temperature_low: 0.2,
            early_phase: 0.3,
            late_phase: 0.7,
            explore_probability: 0.2,
            explore_fraction: 0.5,
            crossover_probability: 0.5,
            inherit_probability: 0.7,
            mutation_rate: 0.3,
            mutation_rate_min: 0.05,
            mutation_scale: 0.5,
            mutation_scale_min: 0.05,
            mutation_decay: 0.98,
            init_scale: 0.1,
            stagnation_window: 8,
            stagnation_distinct: 2,
            stagnation_threshold: 5,
            actions: Action::MOVES.to_vec(),
            features: None,
            fitness: None,
            genome_path: None,
        }
    }
}

impl GeneticConfig {
    fn validate(&self, id: &str) -> Result<()> {
        if self.population_size == 0 {
            return Err(SimError::Config(format!(
                "agent '{}': population_size must be positive",
                id
            )));
        }
        if self.actions.is_empty() {
            return Err(SimError::Config(format!("agent '{}': empty action set", id)));
        }
        let temps = [self.temperature_high, self.temperature_mid, self.temperature_low];
        if temps.iter().any(|t| !(t.is_finite() && *t > 0.0)) {
            return Err(SimError::Config(format!(
                "agent '{}': temperatures must be positive",
                id
            )));
        }
        if self.stagnation_window == 0 {
            return Err(SimError::Config(format!(
                "agent '{}': stagnation_window must be positive",
                id
            )));
        }
        if self.stagnation_distinct >= self.stagnation_window {
            return Err(SimError::Config(format!(
                "agent '{}': stagnation_distinct ({}) must be below stagnation_window ({})",
                id, self.stagnation_distinct, self.stagnation_window
            )));
        }
        Ok(())
    }
}
