//! Agents and their decision policies.
//!
//! An [`Agent`] owns the bookkeeping every kind shares (id, mode, sensors,
//! last observation, episode tallies) and delegates decisions to one of a
//! closed set of policies implementing [`Policy`].

pub mod genetic;
pub mod qlearning;
pub mod scripted;

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use genetic::GeneticAgent;
pub use qlearning::QLearner;
pub use scripted::{ScriptedAgent, ScriptedPolicy};

use crate::config::{AgentConfig, AgentKindConfig, ProblemKind};
use crate::error::{Result, SimError};
use crate::observation::{Observation, Sensor};
use crate::types::{Action, Cell, Mode};
use crate::Id;

/// Environment facts handed to a policy when an episode ends.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    pub total_reward: f64,
    pub steps: u32,
    pub max_steps: u32,
    /// The agent reached the beacon.
    pub reached_goal: bool,
    /// Resources delivered this episode (foraging only).
    pub delivered: Option<u32>,
    /// The agent still holds a resource when the episode ends.
    pub carrying: bool,
}

/// One line of an agent's own episode history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episode: u32,
    pub reward: f64,
    pub steps: u32,
}

/// Decision policy plugged into an [`Agent`].
pub trait Policy {
    /// Chooses the next action from the latest observation.
    fn select_action(
        &mut self,
        observation: &Observation,
        mode: Mode,
        rng: &mut StdRng,
    ) -> Result<Action>;

    /// Reward feedback, given with the observation taken after the
    /// transition.
    fn learn(&mut self, _reward: f64, _next: &Observation, _mode: Mode) -> Result<()> {
        Ok(())
    }

    /// Called before episode `episode` of `total` starts.
    fn begin_episode(&mut self, _episode: u32, _total: u32, _mode: Mode, _rng: &mut StdRng) {}

    /// Called once the episode is over.
    fn end_episode(&mut self, _outcome: &EpisodeOutcome, _mode: Mode) {}

    /// Returns a human-readable name for this policy.
    fn name(&self) -> &str;
}

/// Closed set of agent kinds.
#[derive(Debug, Clone)]
pub enum AgentPolicy {
    Scripted(ScriptedAgent),
    QLearner(QLearner),
    Genetic(GeneticAgent),
}

impl AgentPolicy {
    fn as_policy(&self) -> &dyn Policy {
        match self {
            AgentPolicy::Scripted(p) => p,
            AgentPolicy::QLearner(p) => p,
            AgentPolicy::Genetic(p) => p,
        }
    }

    fn as_policy_mut(&mut self) -> &mut dyn Policy {
        match self {
            AgentPolicy::Scripted(p) => p,
            AgentPolicy::QLearner(p) => p,
            AgentPolicy::Genetic(p) => p,
        }
    }
}

/// A participant of the simulation.
#[derive(Debug, Clone)]
pub struct Agent {
    id: Id,
    mode: Mode,
    sensors: Vec<Sensor>,
    spawn: Option<Cell>,
    policy: AgentPolicy,
    last_observation: Option<Observation>,
    episode: u32,
    episode_reward: f64,
    episode_steps: u32,
    history: Vec<EpisodeSummary>,
}

impl Agent {
    pub fn new(id: impl Into<Id>, mode: Mode, sensors: Vec<Sensor>, policy: AgentPolicy) -> Self {
        Self {
            id: id.into(),
            mode,
            sensors,
            spawn: None,
            policy,
            last_observation: None,
            episode: 0,
            episode_reward: 0.0,
            episode_steps: 0,
            history: Vec::new(),
        }
    }

    /// Agent factory: builds the policy named by `config` for `problem`.
    pub fn from_config(config: &AgentConfig, problem: ProblemKind, rng: &mut StdRng) -> Result<Self> {
        let policy = match &config.kind {
            AgentKindConfig::Scripted { policy } => {
                if !policy.supports(problem) {
                    return Err(SimError::ProblemMismatch {
                        agent: config.id.clone(),
                        kind: policy.name(),
                        problem: problem.name(),
                    });
                }
                AgentPolicy::Scripted(ScriptedAgent::new(*policy))
            }
            AgentKindConfig::QLearner(q) => {
                AgentPolicy::QLearner(QLearner::from_config(&config.id, q, problem)?)
            }
            AgentKindConfig::Genetic(g) => {
                AgentPolicy::Genetic(GeneticAgent::from_config(&config.id, g, problem, rng)?)
            }
        };
        let mut agent = Agent::new(
            config.id.clone(),
            config.mode,
            config.sensors_for(problem),
            policy,
        );
        agent.spawn = config.spawn;
        debug!(
            agent = %agent.id,
            kind = agent.policy_name(),
            mode = %agent.mode,
            "agent created"
        );
        Ok(agent)
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Explicit spawn cell, if configured.
    pub fn spawn(&self) -> Option<Cell> {
        self.spawn
    }

    pub fn with_spawn(mut self, cell: Cell) -> Self {
        self.spawn = Some(cell);
        self
    }

    pub fn policy_name(&self) -> &str {
        self.policy.as_policy().name()
    }

    pub fn policy(&self) -> &AgentPolicy {
        &self.policy
    }

    pub fn q_learner(&self) -> Option<&QLearner> {
        match &self.policy {
            AgentPolicy::QLearner(q) => Some(q),
            _ => None,
        }
    }

    pub fn genetic(&self) -> Option<&GeneticAgent> {
        match &self.policy {
            AgentPolicy::Genetic(g) => Some(g),
            _ => None,
        }
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }

    /// Cumulative reward of the running episode.
    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    pub fn episode_steps(&self) -> u32 {
        self.episode_steps
    }

    pub fn history(&self) -> &[EpisodeSummary] {
        &self.history
    }

    /// Stores the latest observation.
    pub fn observe(&mut self, observation: Observation) {
        self.last_observation = Some(observation);
    }

    /// Chooses an action from the latest observation.
    pub fn act(&mut self, rng: &mut StdRng) -> Result<Action> {
        let observation = self
            .last_observation
            .as_ref()
            .ok_or_else(|| SimError::NoObservation(self.id.clone()))?;
        self.policy
            .as_policy_mut()
            .select_action(observation, self.mode, rng)
    }

    /// Records the reward of the last action; the latest observation must
    /// already reflect the post-transition state.
    pub fn learn(&mut self, reward: f64) -> Result<()> {
        self.episode_reward += reward;
        self.episode_steps += 1;
        let observation = self
            .last_observation
            .as_ref()
            .ok_or_else(|| SimError::NoObservation(self.id.clone()))?;
        self.policy
            .as_policy_mut()
            .learn(reward, observation, self.mode)
    }

    /// Prepares episode `episode` of `total`.
    pub fn reset(&mut self, episode: u32, total: u32, rng: &mut StdRng) {
        self.episode = episode;
        self.episode_reward = 0.0;
        self.episode_steps = 0;
        self.last_observation = None;
        self.policy
            .as_policy_mut()
            .begin_episode(episode, total, self.mode, rng);
    }

    /// Closes the running episode.
    pub fn end_episode(&mut self, outcome: &EpisodeOutcome) {
        self.history.push(EpisodeSummary {
            episode: self.episode,
            reward: outcome.total_reward,
            steps: outcome.steps,
        });
        self.policy.as_policy_mut().end_episode(outcome, self.mode);
    }

    fn artifact_path(&self, dir: &Path) -> Option<PathBuf> {
        match &self.policy {
            AgentPolicy::Scripted(_) => None,
            AgentPolicy::QLearner(_) => Some(dir.join(format!("{}.qtable.json", self.id))),
            AgentPolicy::Genetic(_) => Some(dir.join(format!("{}.genome.json", self.id))),
        }
    }

    /// Writes the learned state into `dir`; scripted agents write nothing.
    pub fn save(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let Some(path) = self.artifact_path(dir) else {
            return Ok(None);
        };
        match &self.policy {
            AgentPolicy::QLearner(q) => q.save_table(&path)?,
            AgentPolicy::Genetic(g) => g.save_genome(&path)?,
            AgentPolicy::Scripted(_) => {}
        }
        Ok(Some(path))
    }

    /// Loads learned state from `dir` when a matching file exists.
    pub fn load(&mut self, dir: &Path) -> Result<bool> {
        let Some(path) = self.artifact_path(dir) else {
            return Ok(false);
        };
        if !path.exists() {
            info!(agent = %self.id, path = %path.display(), "no saved state found");
            return Ok(false);
        }
        match &mut self.policy {
            AgentPolicy::QLearner(q) => q.load_table(&path)?,
            AgentPolicy::Genetic(g) => g.load_genome(&path)?,
            AgentPolicy::Scripted(_) => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn scripted(policy: ScriptedPolicy) -> Agent {
        Agent::new(
            "s",
            Mode::Test,
            vec![Sensor::Beacon],
            AgentPolicy::Scripted(ScriptedAgent::new(policy)),
        )
    }

    #[test]
    fn act_without_observation_fails() {
        let mut agent = scripted(ScriptedPolicy::Stay);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(agent.act(&mut rng), Err(SimError::NoObservation(_))));
    }

    #[test]
    fn learn_accumulates_reward() {
        let mut agent = scripted(ScriptedPolicy::Stay);
        agent.observe(Observation::bare(Cell::new(0, 0), 3, 3));
        agent.learn(1.5).unwrap();
        agent.learn(-0.5).unwrap();
        assert_eq!(agent.episode_reward(), 1.0);
        assert_eq!(agent.episode_steps(), 2);
    }

    #[test]
    fn reset_clears_observation_and_tallies() {
        let mut agent = scripted(ScriptedPolicy::Stay);
        let mut rng = StdRng::seed_from_u64(0);
        agent.observe(Observation::bare(Cell::new(0, 0), 3, 3));
        agent.learn(2.0).unwrap();
        agent.end_episode(&EpisodeOutcome {
            total_reward: 2.0,
            steps: 1,
            max_steps: 10,
            reached_goal: false,
            delivered: None,
            carrying: false,
        });
        agent.reset(1, 5, &mut rng);
        assert!(agent.last_observation().is_none());
        assert_eq!(agent.episode_reward(), 0.0);
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.history()[0].reward, 2.0);
    }

    #[test]
    fn factory_rejects_mismatched_scripted_policy() {
        let config = AgentConfig::new(
            "s",
            Mode::Test,
            AgentKindConfig::Scripted {
                policy: ScriptedPolicy::Forager,
            },
        );
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            Agent::from_config(&config, ProblemKind::Beacon, &mut rng),
            Err(SimError::ProblemMismatch { .. })
        ));
    }

    #[test]
    fn scripted_agents_save_nothing() {
        let agent = scripted(ScriptedPolicy::Random);
        let dir = std::env::temp_dir();
        assert!(agent.save(&dir).unwrap().is_none());
    }
}
