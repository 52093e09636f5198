//! Evolutionary linear controller.
//!
//! The policy scores each action as the dot product of a weight row with the
//! observation features. Weights evolve at episode granularity: every
//! finished episode contributes one `(fitness, genome)` pair to a bounded
//! elite population, and the next genome is usually the best one found so
//! far, occasionally a crossover or mutation of the elite.

pub mod features;
pub mod population;

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use features::FeatureSet;
pub use population::{Population, Scored};

use super::{EpisodeOutcome, Policy};
use crate::config::{GeneticConfig, ProblemKind};
use crate::error::{Result, SimError};
use crate::observation::Observation;
use crate::types::{Action, Cell, Mode};

/// How an episode is turned into a fitness value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FitnessShaping {
    /// Plain cumulative episode reward.
    CumulativeReward,
    /// Reward plus a large completion bonus scaled by speed.
    Beacon {
        #[serde(default = "default_completion_bonus")]
        completion_bonus: f64,
        #[serde(default = "default_beacon_efficiency")]
        efficiency_weight: f64,
    },
    /// Deliveries dominate, with efficiency and exploration bonuses and a
    /// penalty per stagnation event.
    Foraging {
        #[serde(default = "default_delivery_weight")]
        delivery_weight: f64,
        /// Credit for a resource still held when the episode ends.
        #[serde(default = "default_carry_weight")]
        carry_weight: f64,
        #[serde(default = "default_foraging_efficiency")]
        efficiency_weight: f64,
        #[serde(default = "default_exploration_weight")]
        exploration_weight: f64,
        #[serde(default = "default_stagnation_penalty")]
        stagnation_penalty: f64,
    },
}

fn default_completion_bonus() -> f64 {
    1000.0
}

fn default_beacon_efficiency() -> f64 {
    500.0
}

fn default_delivery_weight() -> f64 {
    1000.0
}

fn default_carry_weight() -> f64 {
    500.0
}

fn default_foraging_efficiency() -> f64 {
    100.0
}

fn default_exploration_weight() -> f64 {
    1.0
}

fn default_stagnation_penalty() -> f64 {
    5.0
}

/// Behaviour counters collected by the policy itself during an episode.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BehaviourStats {
    pub distinct_cells: usize,
    pub stagnation_events: u32,
}

impl FitnessShaping {
    pub fn default_for(problem: ProblemKind) -> Self {
        match problem {
            ProblemKind::Beacon => FitnessShaping::Beacon {
                completion_bonus: default_completion_bonus(),
                efficiency_weight: default_beacon_efficiency(),
            },
            ProblemKind::Foraging => FitnessShaping::Foraging {
                delivery_weight: default_delivery_weight(),
                carry_weight: default_carry_weight(),
                efficiency_weight: default_foraging_efficiency(),
                exploration_weight: default_exploration_weight(),
                stagnation_penalty: default_stagnation_penalty(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FitnessShaping::CumulativeReward => "cumulative_reward",
            FitnessShaping::Beacon { .. } => "beacon",
            FitnessShaping::Foraging { .. } => "foraging",
        }
    }

    fn problem(&self) -> Option<ProblemKind> {
        match self {
            FitnessShaping::CumulativeReward => None,
            FitnessShaping::Beacon { .. } => Some(ProblemKind::Beacon),
            FitnessShaping::Foraging { .. } => Some(ProblemKind::Foraging),
        }
    }

    pub fn evaluate(&self, outcome: &EpisodeOutcome, stats: &BehaviourStats) -> f64 {
        let speed = if outcome.max_steps == 0 {
            0.0
        } else {
            (1.0 - outcome.steps as f64 / outcome.max_steps as f64).max(0.0)
        };
        match *self {
            FitnessShaping::CumulativeReward => outcome.total_reward,
            FitnessShaping::Beacon {
                completion_bonus,
                efficiency_weight,
            } => {
                let mut fitness = outcome.total_reward;
                if outcome.reached_goal {
                    fitness += completion_bonus + efficiency_weight * speed;
                }
                fitness
            }
            FitnessShaping::Foraging {
                delivery_weight,
                carry_weight,
                efficiency_weight,
                exploration_weight,
                stagnation_penalty,
            } => {
                let delivered = outcome.delivered.unwrap_or(0) as f64;
                let carried = if outcome.carrying { 1.0 } else { 0.0 };
                let efficiency = if delivered + carried > 0.0 { speed } else { 0.0 };
                outcome.total_reward
                    + delivery_weight * delivered
                    + carry_weight * carried
                    + efficiency_weight * efficiency
                    + exploration_weight * stats.distinct_cells as f64
                    - stagnation_penalty * stats.stagnation_events as f64
            }
        }
    }
}

/// Persisted form of the best genome.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenomeFile {
    features: FeatureSet,
    actions: Vec<Action>,
    fitness: Option<f64>,
    genome: Vec<f64>,
}

/// Linear softmax policy evolved across episodes.
#[derive(Debug, Clone)]
pub struct GeneticAgent {
    config: GeneticConfig,
    features: FeatureSet,
    fitness: FitnessShaping,
    genome: Vec<f64>,
    population: Population,
    best: Option<Scored>,
    generation: u32,
    progress: f64,
    mutation_rate: f64,
    mutation_scale: f64,
    recent: VecDeque<Cell>,
    stagnation: u32,
    stagnation_events: u32,
    visited: BTreeSet<Cell>,
}

impl GeneticAgent {
    /// Creates the policy with a small random genome.
    pub fn new(config: GeneticConfig, features: FeatureSet, fitness: FitnessShaping, rng: &mut StdRng) -> Self {
        let size = config.actions.len() * features.len();
        let genome = (0..size)
            .map(|_| population::gaussian(rng) * config.init_scale)
            .collect();
        Self {
            population: Population::new(config.population_size),
            mutation_rate: config.mutation_rate,
            mutation_scale: config.mutation_scale,
            recent: VecDeque::with_capacity(config.stagnation_window),
            config,
            features,
            fitness,
            genome,
            best: None,
            generation: 0,
            progress: 0.0,
            stagnation: 0,
            stagnation_events: 0,
            visited: BTreeSet::new(),
        }
    }

    pub fn from_config(
        agent: &str,
        config: &GeneticConfig,
        problem: ProblemKind,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let features = config.features.unwrap_or_else(|| FeatureSet::default_for(problem));
        if features.problem() != problem {
            return Err(SimError::ProblemMismatch {
                agent: agent.to_string(),
                kind: features.name(),
                problem: problem.name(),
            });
        }
        let fitness = config
            .fitness
            .unwrap_or_else(|| FitnessShaping::default_for(problem));
        if fitness.problem().is_some_and(|p| p != problem) {
            return Err(SimError::ProblemMismatch {
                agent: agent.to_string(),
                kind: fitness.name(),
                problem: problem.name(),
            });
        }
        let mut policy = Self::new(config.clone(), features, fitness, rng);
        if let Some(path) = &config.genome_path {
            policy.load_genome(path)?;
        }
        Ok(policy)
    }

    pub fn genome(&self) -> &[f64] {
        &self.genome
    }

    /// Replaces the active genome; its length must match the weight matrix.
    pub fn set_genome(&mut self, genome: Vec<f64>) -> Result<()> {
        self.check_genome(&genome)?;
        self.genome = genome;
        Ok(())
    }

    pub fn best_genome(&self) -> Option<&[f64]> {
        self.best.as_ref().map(|b| b.genome.as_slice())
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.fitness)
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn mutation_rate(&self) -> f64 {
        self.mutation_rate
    }

    pub fn mutation_scale(&self) -> f64 {
        self.mutation_scale
    }

    fn check_genome(&self, genome: &[f64]) -> Result<()> {
        let expected = self.config.actions.len() * self.features.len();
        if genome.len() != expected {
            return Err(SimError::FeatureShapeMismatch {
                expected,
                actual: genome.len(),
            });
        }
        Ok(())
    }

    /// Softmax temperature for the current run progress.
    pub fn temperature(&self) -> f64 {
        if self.progress < self.config.early_phase {
            self.config.temperature_high
        } else if self.progress < self.config.late_phase {
            self.config.temperature_mid
        } else {
            self.config.temperature_low
        }
    }

    /// One score per action; the feature vector must match the genome rows.
    pub fn scores(&self, features: &[f64]) -> Result<Vec<f64>> {
        let n_features = self.features.len();
        if features.len() != n_features {
            return Err(SimError::FeatureShapeMismatch {
                expected: n_features,
                actual: features.len(),
            });
        }
        self.check_genome(&self.genome)?;
        Ok(self
            .genome
            .chunks(n_features)
            .map(|row| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>())
            .collect())
    }

    fn sample_softmax(&self, scores: &[f64], rng: &mut StdRng) -> Action {
        let temperature = self.temperature();
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = scores
            .iter()
            .map(|s| ((s - max) / temperature).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            warn!(?scores, temperature, "degenerate softmax, acting uniformly");
            return self.random_action(rng);
        }
        let mut threshold = rng.gen::<f64>() * total;
        for (action, w) in self.config.actions.iter().zip(&weights) {
            threshold -= w;
            if threshold <= 0.0 {
                return *action;
            }
        }
        self.config
            .actions
            .last()
            .copied()
            .unwrap_or(Action::Stay)
    }

    fn greedy(&self, scores: &[f64]) -> Action {
        let mut best: Option<(Action, f64)> = None;
        for (action, score) in self.config.actions.iter().zip(scores) {
            if best.map_or(true, |(_, b)| *score > b) {
                best = Some((*action, *score));
            }
        }
        best.map(|(a, _)| a).unwrap_or(Action::Stay)
    }

    fn random_action(&self, rng: &mut StdRng) -> Action {
        self.config
            .actions
            .choose(rng)
            .copied()
            .unwrap_or(Action::Stay)
    }

    /// Records the current cell; true when the recent window has collapsed
    /// onto too few distinct cells.
    fn track_position(&mut self, cell: Cell) -> bool {
        self.visited.insert(cell);
        self.recent.push_back(cell);
        while self.recent.len() > self.config.stagnation_window {
            self.recent.pop_front();
        }
        if self.recent.len() < self.config.stagnation_window {
            return false;
        }
        let distinct: BTreeSet<&Cell> = self.recent.iter().collect();
        distinct.len() <= self.config.stagnation_distinct
    }

    fn next_genome(&mut self, rng: &mut StdRng) {
        let Some(best) = self.best.as_ref() else {
            return;
        };
        let explore = self.progress < self.config.explore_fraction
            && rng.gen::<f64>() < self.config.explore_probability;
        if !explore {
            self.genome = best.genome.clone();
            return;
        }
        let members = self.population.members();
        let mut child = if members.len() >= 2 && rng.gen::<f64>() < self.config.crossover_probability {
            population::crossover(
                &members[0].genome,
                &members[1].genome,
                self.features.len(),
                self.config.inherit_probability,
                rng,
            )
        } else {
            best.genome.clone()
        };
        population::mutate(&mut child, self.mutation_rate, self.mutation_scale, rng);
        self.genome = child;
    }

    pub fn save_genome(&self, path: &Path) -> Result<()> {
        let (genome, fitness) = match &self.best {
            Some(best) => (best.genome.clone(), Some(best.fitness)),
            None => (self.genome.clone(), None),
        };
        let file = GenomeFile {
            features: self.features,
            actions: self.config.actions.clone(),
            fitness,
            genome,
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        info!(path = %path.display(), ?fitness, "genome saved");
        Ok(())
    }

    /// Loads a saved genome as both the active and the best genome.
    pub fn load_genome(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let file: GenomeFile = serde_json::from_str(&content)?;
        if file.features != self.features {
            return Err(SimError::Config(format!(
                "genome {} uses {} features, policy expects {}",
                path.display(),
                file.features.name(),
                self.features.name()
            )));
        }
        if file.actions != self.config.actions {
            return Err(SimError::Config(format!(
                "genome {} was trained with a different action set",
                path.display()
            )));
        }
        self.check_genome(&file.genome)?;
        self.genome = file.genome.clone();
        if let Some(fitness) = file.fitness {
            self.population.insert(fitness, file.genome.clone());
            self.best = Some(Scored {
                fitness,
                genome: file.genome,
            });
        }
        info!(path = %path.display(), fitness = ?file.fitness, "genome loaded");
        Ok(())
    }
}

impl Policy for GeneticAgent {
    fn select_action(&mut self, observation: &Observation, mode: Mode, rng: &mut StdRng) -> Result<Action> {
        if self.track_position(observation.position) {
            self.stagnation += 1;
        } else {
            self.stagnation = 0;
        }
        if mode.is_learning() && self.stagnation >= self.config.stagnation_threshold {
            self.stagnation = 0;
            self.stagnation_events += 1;
            return Ok(self.random_action(rng));
        }

        let features = self.features.extract(observation);
        let scores = self.scores(&features)?;
        if mode.is_learning() {
            Ok(self.sample_softmax(&scores, rng))
        } else {
            Ok(self.greedy(&scores))
        }
    }

    fn begin_episode(&mut self, episode: u32, total: u32, mode: Mode, rng: &mut StdRng) {
        self.progress = if total == 0 {
            0.0
        } else {
            episode as f64 / total as f64
        };
        self.recent.clear();
        self.visited.clear();
        self.stagnation = 0;
        self.stagnation_events = 0;
        if mode.is_learning() {
            self.next_genome(rng);
        }
    }

    fn end_episode(&mut self, outcome: &EpisodeOutcome, mode: Mode) {
        if !mode.is_learning() {
            return;
        }
        let stats = BehaviourStats {
            distinct_cells: self.visited.len(),
            stagnation_events: self.stagnation_events,
        };
        let fitness = self.fitness.evaluate(outcome, &stats);
        self.population.insert(fitness, self.genome.clone());
        let improved = self
            .best
            .as_ref()
            .map_or(true, |b| population::rank(fitness) > population::rank(b.fitness));
        if improved {
            self.best = Some(Scored {
                fitness,
                genome: self.genome.clone(),
            });
            debug!(generation = self.generation, fitness, "new best genome");
        }
        self.generation += 1;
        self.mutation_rate =
            (self.mutation_rate * self.config.mutation_decay).max(self.config.mutation_rate_min);
        self.mutation_scale =
            (self.mutation_scale * self.config.mutation_decay).max(self.config.mutation_scale_min);
    }

    fn name(&self) -> &str {
        "genetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::GoalReading;
    use rand::SeedableRng;

    fn agent(problem: ProblemKind) -> GeneticAgent {
        let mut rng = StdRng::seed_from_u64(0);
        GeneticAgent::from_config("g", &GeneticConfig::default(), problem, &mut rng).unwrap()
    }

    fn outcome(total_reward: f64) -> EpisodeOutcome {
        EpisodeOutcome {
            total_reward,
            steps: 10,
            max_steps: 100,
            reached_goal: false,
            delivered: None,
            carrying: false,
        }
    }

    #[test]
    fn genome_has_actions_times_features() {
        let g = agent(ProblemKind::Beacon);
        assert_eq!(g.genome().len(), 4 * FeatureSet::BEACON_LEN);
    }

    #[test]
    fn wrong_genome_length_is_rejected() {
        let mut g = agent(ProblemKind::Foraging);
        assert!(matches!(
            g.set_genome(vec![0.0; 3]),
            Err(SimError::FeatureShapeMismatch { .. })
        ));
    }

    #[test]
    fn wrong_feature_length_is_rejected() {
        let g = agent(ProblemKind::Beacon);
        assert!(matches!(
            g.scores(&[1.0, 2.0]),
            Err(SimError::FeatureShapeMismatch {
                expected: 14,
                actual: 2
            })
        ));
    }

    #[test]
    fn elitism_keeps_best_after_worse_episode() {
        let config = GeneticConfig {
            fitness: Some(FitnessShaping::CumulativeReward),
            ..GeneticConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut g = GeneticAgent::from_config("g", &config, ProblemKind::Beacon, &mut rng).unwrap();

        g.begin_episode(0, 10, Mode::Learn, &mut rng);
        g.end_episode(&outcome(10.0), Mode::Learn);
        let best_genome = g.best_genome().unwrap().to_vec();

        g.begin_episode(1, 10, Mode::Learn, &mut rng);
        g.end_episode(&outcome(2.0), Mode::Learn);

        assert_eq!(g.best_fitness(), Some(10.0));
        assert_eq!(g.best_genome().unwrap(), best_genome.as_slice());
        assert_eq!(g.population().len(), 2);
    }

    #[test]
    fn test_mode_does_not_evolve() {
        let mut g = agent(ProblemKind::Beacon);
        let mut rng = StdRng::seed_from_u64(1);
        let before = g.genome().to_vec();
        g.begin_episode(0, 4, Mode::Test, &mut rng);
        g.end_episode(&outcome(50.0), Mode::Test);
        assert!(g.best_fitness().is_none());
        assert_eq!(g.genome(), before.as_slice());
        assert_eq!(g.generation(), 0);
    }

    #[test]
    fn mutation_decays_to_floor() {
        let mut g = agent(ProblemKind::Beacon);
        for _ in 0..500 {
            g.end_episode(&outcome(0.0), Mode::Learn);
        }
        assert_eq!(g.mutation_rate(), 0.05);
        assert_eq!(g.mutation_scale(), 0.05);
    }

    #[test]
    fn temperature_follows_run_phases() {
        let mut g = agent(ProblemKind::Beacon);
        let mut rng = StdRng::seed_from_u64(0);
        g.begin_episode(0, 10, Mode::Test, &mut rng);
        assert_eq!(g.temperature(), 2.0);
        g.begin_episode(5, 10, Mode::Test, &mut rng);
        assert_eq!(g.temperature(), 1.0);
        g.begin_episode(9, 10, Mode::Test, &mut rng);
        assert_eq!(g.temperature(), 0.2);
    }

    #[test]
    fn greedy_in_test_mode() {
        let mut g = agent(ProblemKind::Beacon);
        let n = FeatureSet::BEACON_LEN;
        let mut genome = vec![0.0; 4 * n];
        // Bias weight of the third action (Left) dominates.
        genome[2 * n] = 5.0;
        g.set_genome(genome).unwrap();
        let mut obs = Observation::bare(Cell::new(1, 1), 5, 5);
        obs.beacon = Some(GoalReading::between(Cell::new(1, 1), Cell::new(3, 3)));
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..5 {
            assert_eq!(g.select_action(&obs, Mode::Test, &mut rng).unwrap(), Action::Left);
        }
    }

    #[test]
    fn nan_scores_fall_back_to_uniform() {
        let mut g = agent(ProblemKind::Beacon);
        let n = FeatureSet::BEACON_LEN;
        g.set_genome(vec![f64::NAN; 4 * n]).unwrap();
        let obs = Observation::bare(Cell::new(0, 0), 5, 5);
        let mut rng = StdRng::seed_from_u64(0);
        let action = g.select_action(&obs, Mode::Learn, &mut rng).unwrap();
        assert!(action.is_move());
    }

    #[test]
    fn stagnation_forces_random_action() {
        let config = GeneticConfig {
            stagnation_window: 2,
            stagnation_distinct: 1,
            stagnation_threshold: 2,
            ..GeneticConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let mut g = GeneticAgent::from_config("g", &config, ProblemKind::Beacon, &mut rng).unwrap();
        let obs = Observation::bare(Cell::new(0, 0), 5, 5);
        for _ in 0..3 {
            g.select_action(&obs, Mode::Learn, &mut rng).unwrap();
        }
        assert_eq!(g.stagnation_events, 1);
        assert_eq!(g.stagnation, 0);
    }

    #[test]
    fn foraging_fitness_rewards_deliveries() {
        let shaping = FitnessShaping::default_for(ProblemKind::Foraging);
        let mut out = outcome(3.0);
        out.delivered = Some(2);
        let stats = BehaviourStats {
            distinct_cells: 4,
            stagnation_events: 1,
        };
        let fitness = shaping.evaluate(&out, &stats);
        assert!((fitness - (3.0 + 2000.0 + 90.0 + 4.0 - 5.0)).abs() < 1e-9);
    }

    #[test]
    fn foraging_fitness_credits_resource_in_hand() {
        let shaping = FitnessShaping::default_for(ProblemKind::Foraging);
        let mut out = outcome(2.0);
        out.delivered = Some(0);
        let empty_handed = shaping.evaluate(&out, &BehaviourStats::default());
        assert_eq!(empty_handed, 2.0);
        out.carrying = true;
        let fitness = shaping.evaluate(&out, &BehaviourStats::default());
        assert!((fitness - (2.0 + 500.0 + 90.0)).abs() < 1e-9);
    }

    #[test]
    fn nan_first_fitness_is_replaced_by_a_real_one() {
        let config = GeneticConfig {
            fitness: Some(FitnessShaping::CumulativeReward),
            ..GeneticConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut g = GeneticAgent::from_config("g", &config, ProblemKind::Beacon, &mut rng).unwrap();

        g.begin_episode(0, 10, Mode::Learn, &mut rng);
        g.end_episode(&outcome(f64::NAN), Mode::Learn);
        assert!(g.best_fitness().unwrap().is_nan());

        g.begin_episode(1, 10, Mode::Learn, &mut rng);
        g.end_episode(&outcome(-3.0), Mode::Learn);
        assert_eq!(g.best_fitness(), Some(-3.0));
        assert_eq!(g.population().best().unwrap().fitness, -3.0);
    }

    #[test]
    fn beacon_fitness_rewards_completion() {
        let shaping = FitnessShaping::default_for(ProblemKind::Beacon);
        let mut out = outcome(100.0);
        assert_eq!(shaping.evaluate(&out, &BehaviourStats::default()), 100.0);
        out.reached_goal = true;
        let fitness = shaping.evaluate(&out, &BehaviourStats::default());
        assert!((fitness - (100.0 + 1000.0 + 450.0)).abs() < 1e-9);
    }
}
