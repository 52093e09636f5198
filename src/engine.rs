//! Episode and step orchestration.
//!
//! # Step order
//!
//! Within one step every active agent observes, then every active agent
//! chooses an action, then every action is applied in agent order. After the
//! environment clock advances, each agent observes the post-transition state
//! and only then receives its reward. Learners depend on that last ordering.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::agent::{Agent, EpisodeOutcome};
use crate::config::SimulationConfig;
use crate::environment::{EnvironmentSnapshot, GridEnvironment, StepOutcome};
use crate::error::{Result, SimError};
use crate::metrics::{EpisodeRecord, MetricsTracker};
use crate::types::{Action, Cell};
use crate::Id;

/// Read-only hook for renderers and loggers.
///
/// Observers see snapshots only and never touch the random stream, so a run
/// produces the same trajectories with or without one.
pub trait StepObserver {
    fn on_reset(&mut self, _episode: u32, _snapshot: &EnvironmentSnapshot) {}

    fn on_step(
        &mut self,
        _episode: u32,
        _step: u32,
        _snapshot: &EnvironmentSnapshot,
        _rewards: &BTreeMap<Id, f64>,
    ) {
    }

    fn on_episode_end(&mut self, _record: &EpisodeRecord) {}
}

/// Drives agents through repeated episodes of one environment.
pub struct SimulationEngine {
    environment: GridEnvironment,
    agents: Vec<Agent>,
    episodes: u32,
    max_steps: u32,
    seed: u64,
    rng: StdRng,
    tracker: MetricsTracker,
    observer: Option<Box<dyn StepObserver>>,
}

impl SimulationEngine {
    /// Creates an engine over already built parts.
    ///
    /// Agent ids must be unique and explicit spawns must fit the layout.
    pub fn new(
        environment: GridEnvironment,
        agents: Vec<Agent>,
        episodes: u32,
        max_steps: u32,
        seed: u64,
    ) -> Result<Self> {
        Self::with_rng(environment, agents, episodes, max_steps, seed, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        mut environment: GridEnvironment,
        agents: Vec<Agent>,
        episodes: u32,
        max_steps: u32,
        seed: u64,
        rng: StdRng,
    ) -> Result<Self> {
        let mut ids: Vec<Id> = Vec::with_capacity(agents.len());
        for agent in &agents {
            if ids.contains(agent.id()) {
                return Err(SimError::Config(format!("duplicate agent id '{}'", agent.id())));
            }
            if let Some(cell) = agent.spawn() {
                environment.validate_spawn(agent.id(), cell)?;
            }
            ids.push(agent.id().clone());
        }
        environment.register_agents(&ids);
        Ok(Self {
            environment,
            agents,
            episodes,
            max_steps,
            seed,
            rng,
            tracker: MetricsTracker::new(ids),
            observer: None,
        })
    }

    /// Builds environment and agents from a configuration record.
    ///
    /// Without a configured seed a random one is drawn and logged.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        let environment = GridEnvironment::from_config(&config.environment, config.max_steps)?;
        let problem = environment.kind();
        let agents = config
            .agents
            .iter()
            .map(|a| Agent::from_config(a, problem, &mut rng))
            .collect::<Result<Vec<_>>>()?;
        info!(
            problem = %problem,
            agents = agents.len(),
            episodes = config.episodes,
            max_steps = config.max_steps,
            seed,
            "simulation configured"
        );
        Self::with_rng(environment, agents, config.episodes, config.max_steps, seed, rng)
    }

    pub fn set_observer(&mut self, observer: Box<dyn StepObserver>) {
        self.observer = Some(observer);
    }

    pub fn environment(&self) -> &GridEnvironment {
        &self.environment
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn tracker(&self) -> &MetricsTracker {
        &self.tracker
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn episodes(&self) -> u32 {
        self.episodes
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Runs every configured episode; any error aborts the run.
    pub fn run(&mut self) -> Result<&MetricsTracker> {
        info!(episodes = self.episodes, seed = self.seed, "simulation started");
        for episode in 0..self.episodes {
            self.run_episode(episode)?;
        }
        let summary = self.tracker.summary();
        info!(
            episodes = summary.n_episodes,
            mean_steps = summary.mean_steps,
            "simulation finished"
        );
        Ok(&self.tracker)
    }

    /// Runs a single episode and records its metrics.
    pub fn run_episode(&mut self, episode: u32) -> Result<EpisodeRecord> {
        let spawns: BTreeMap<Id, Cell> = self
            .agents
            .iter()
            .filter_map(|a| a.spawn().map(|cell| (a.id().clone(), cell)))
            .collect();
        let snapshot = self.environment.reset(&spawns, &mut self.rng)?;
        for agent in &mut self.agents {
            agent.reset(episode, self.episodes, &mut self.rng);
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_reset(episode, &snapshot);
        }

        let mut active = vec![true; self.agents.len()];
        let mut steps = 0;
        while steps < self.max_steps && !self.environment.is_episode_finished() {
            for (agent, _) in self.agents.iter_mut().zip(&active).filter(|(_, a)| **a) {
                let observation = self.environment.observe(agent.id(), agent.sensors())?;
                agent.observe(observation);
            }

            let mut actions: Vec<Option<Action>> = Vec::with_capacity(self.agents.len());
            for (agent, is_active) in self.agents.iter_mut().zip(&active) {
                actions.push(if *is_active {
                    Some(agent.act(&mut self.rng)?)
                } else {
                    None
                });
            }

            let mut outcomes: Vec<Option<StepOutcome>> = Vec::with_capacity(self.agents.len());
            for (agent, action) in self.agents.iter().zip(&actions) {
                outcomes.push(match action {
                    Some(action) => Some(self.environment.step(agent.id(), *action)?),
                    None => None,
                });
            }
            self.environment.advance_time();
            steps += 1;

            let mut rewards = BTreeMap::new();
            for (i, (agent, outcome)) in self.agents.iter_mut().zip(&outcomes).enumerate() {
                let Some(outcome) = outcome else {
                    continue;
                };
                let observation = self.environment.observe(agent.id(), agent.sensors())?;
                agent.observe(observation);
                agent.learn(outcome.reward)?;
                rewards.insert(agent.id().clone(), outcome.reward);
                if outcome.terminated {
                    active[i] = false;
                }
            }

            if let Some(observer) = self.observer.as_mut() {
                observer.on_step(episode, steps, &self.environment.snapshot(), &rewards);
            }
        }

        let record = self.finish_episode(episode, steps);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_episode_end(&record);
        }
        self.tracker.record(record.clone());
        Ok(record)
    }

    fn finish_episode(&mut self, episode: u32, steps: u32) -> EpisodeRecord {
        let mut record = EpisodeRecord::new(episode, steps);
        record.success_rate = self.environment.success_rate();
        record.resources_delivered = self.environment.total_delivered();
        record.final_distance = self.environment.final_distances();

        for agent in &mut self.agents {
            let reached = self.environment.reached_goal(agent.id());
            if record.success_rate.is_some() {
                record.reached.insert(agent.id().clone(), reached);
            }
            record
                .rewards
                .insert(agent.id().clone(), agent.episode_reward());
            agent.end_episode(&EpisodeOutcome {
                total_reward: agent.episode_reward(),
                steps: agent.episode_steps(),
                max_steps: self.max_steps,
                reached_goal: reached,
                delivered: record.resources_delivered,
                carrying: self.environment.is_carrying(agent.id()),
            });
        }

        info!(
            episode,
            steps,
            success_rate = ?record.success_rate,
            delivered = ?record.resources_delivered,
            "episode finished"
        );
        for (id, reward) in &record.rewards {
            debug!(episode, agent = %id, reward, "episode reward");
        }
        record
    }

    /// Saves every learner's state into `dir`, creating it if needed.
    pub fn save_agents(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for agent in &self.agents {
            if let Some(path) = agent.save(dir)? {
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Loads saved learner state from `dir`; returns how many agents loaded.
    pub fn load_agents(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for agent in &mut self.agents {
            if agent.load(dir)? {
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentPolicy, ScriptedAgent, ScriptedPolicy};
    use crate::config::{BeaconConfig, EnvironmentConfig};
    use crate::observation::Sensor;
    use crate::types::Mode;

    fn seeker(id: &str, spawn: Cell) -> Agent {
        Agent::new(
            id,
            Mode::Test,
            vec![Sensor::Beacon],
            AgentPolicy::Scripted(ScriptedAgent::new(ScriptedPolicy::BeaconSeeker)),
        )
        .with_spawn(spawn)
    }

    fn beacon_env() -> GridEnvironment {
        let config = EnvironmentConfig::Beacon(BeaconConfig {
            width: 5,
            height: 5,
            beacon: Some(Cell::new(2, 2)),
            ..BeaconConfig::default()
        });
        GridEnvironment::from_config(&config, 20).unwrap()
    }

    #[test]
    fn spawn_on_wall_rejected_at_construction() {
        let config = EnvironmentConfig::Beacon(BeaconConfig {
            width: 3,
            height: 3,
            walls: vec![Cell::new(0, 0)],
            ..BeaconConfig::default()
        });
        let env = GridEnvironment::from_config(&config, 10).unwrap();
        let result = SimulationEngine::new(env, vec![seeker("a", Cell::new(0, 0))], 1, 10, 0);
        assert!(matches!(result, Err(SimError::InvalidSpawn { .. })));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let agents = vec![seeker("a", Cell::new(0, 0)), seeker("a", Cell::new(4, 4))];
        let result = SimulationEngine::new(beacon_env(), agents, 1, 10, 0);
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn terminated_agent_stops_acting() {
        let agents = vec![seeker("fast", Cell::new(2, 1)), seeker("slow", Cell::new(0, 0))];
        let mut engine = SimulationEngine::new(beacon_env(), agents, 1, 20, 0).unwrap();
        let record = engine.run_episode(0).unwrap();
        assert_eq!(record.steps, 4);
        assert_eq!(engine.agent("fast").unwrap().episode_steps(), 1);
        assert_eq!(engine.agent("slow").unwrap().episode_steps(), 4);
        assert_eq!(record.success_rate, Some(1.0));
    }

    #[test]
    fn step_ceiling_ends_episode() {
        let stay = Agent::new(
            "idle",
            Mode::Test,
            vec![],
            AgentPolicy::Scripted(ScriptedAgent::new(ScriptedPolicy::Stay)),
        );
        let mut engine = SimulationEngine::new(beacon_env(), vec![stay], 2, 7, 1).unwrap();
        engine.run().unwrap();
        let records = engine.tracker().records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.steps == 7));
        assert_eq!(records[0].success_rate, Some(0.0));
        assert!((records[0].rewards["idle"] + 0.07).abs() < 1e-9);
    }
}
