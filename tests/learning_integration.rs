//! Learning agents driven through the engine: determinism, test-mode
//! immutability and persistence

use std::collections::BTreeMap;

use gridsim::environment::EnvironmentSnapshot;
use gridsim::{Action, Cell, Id, Mode, SimulationConfig, SimulationEngine, StepObserver};
use tempfile::TempDir;

const MIXED_BEACON: &str = r#"{
    "episodes": 6,
    "max_steps": 40,
    "seed": 99,
    "environment": {
        "problem": "beacon",
        "width": 6,
        "height": 6,
        "walls": [[1, 1], [4, 2]]
    },
    "agents": [
        { "id": "q", "type": "q_learner", "mode": "learn" },
        { "id": "g", "type": "genetic", "mode": "learn", "population_size": 4 },
        { "id": "r", "type": "scripted", "policy": "random" }
    ]
}"#;

fn q_only(mode: &str) -> SimulationConfig {
    let src = format!(
        r#"{{
            "episodes": 8,
            "max_steps": 30,
            "seed": 5,
            "environment": {{ "problem": "beacon", "width": 5, "height": 5 }},
            "agents": [{{ "id": "q", "type": "q_learner", "mode": "{}" }}]
        }}"#,
        mode
    );
    SimulationConfig::from_json_str(&src).unwrap()
}

/// Renders every step into a buffer it never reads back.
struct NoisyRenderer(Vec<String>);

impl StepObserver for NoisyRenderer {
    fn on_step(
        &mut self,
        _episode: u32,
        _step: u32,
        snapshot: &EnvironmentSnapshot,
        _rewards: &BTreeMap<Id, f64>,
    ) {
        self.0.push(snapshot.render_ascii());
    }
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_same_seed_same_trajectories() {
    let config = SimulationConfig::from_json_str(MIXED_BEACON).unwrap();

    let mut first = SimulationEngine::from_config(&config).unwrap();
    let a = first.run().unwrap().records().to_vec();

    let mut second = SimulationEngine::from_config(&config).unwrap();
    let b = second.run().unwrap().records().to_vec();

    assert_eq!(a, b);
}

#[test]
fn test_rendering_does_not_change_outcomes() {
    let config = SimulationConfig::from_json_str(MIXED_BEACON).unwrap();

    let mut plain = SimulationEngine::from_config(&config).unwrap();
    let a = plain.run().unwrap().records().to_vec();

    let mut rendered = SimulationEngine::from_config(&config).unwrap();
    rendered.set_observer(Box::new(NoisyRenderer(Vec::new())));
    let b = rendered.run().unwrap().records().to_vec();

    assert_eq!(a, b);
    assert_eq!(
        plain.agent("q").unwrap().q_learner().unwrap().table(),
        rendered.agent("q").unwrap().q_learner().unwrap().table()
    );
}

// ============================================================================
// Q-learning
// ============================================================================

#[test]
fn test_learning_mode_fills_table_and_decays() {
    let mut engine = SimulationEngine::from_config(&q_only("learn")).unwrap();
    engine.run().unwrap();
    let q = engine.agent("q").unwrap().q_learner().unwrap();
    assert!(!q.table().is_empty());
    assert!(q.epsilon() < 0.2);
    assert!(q.epsilon() >= 0.05);
    assert_eq!(engine.agent("q").unwrap().history().len(), 8);
}

#[test]
fn test_update_bootstraps_from_post_move_state() {
    // One step east along a 4x1 corridor; the beacon sits at the far end.
    let src = r#"{
        "episodes": 1,
        "max_steps": 1,
        "seed": 2,
        "environment": { "problem": "beacon", "width": 4, "height": 1, "beacon": [3, 0] },
        "agents": [{
            "id": "q",
            "type": "q_learner",
            "mode": "learn",
            "spawn": [0, 0],
            "epsilon": 0.0,
            "epsilon_min": 0.0,
            "actions": ["right"],
            "optimistic_prior": 10.0
        }]
    }"#;
    let config = SimulationConfig::from_json_str(src).unwrap();
    let mut engine = SimulationEngine::from_config(&config).unwrap();
    engine.run().unwrap();

    let agent = engine.agent("q").unwrap();
    let after = agent.last_observation().unwrap();
    assert_eq!(after.position, Cell::new(1, 0));

    let q = agent.q_learner().unwrap();
    let next_key = q.abstraction().encode(after).unwrap();
    assert!(q.table().row(&next_key).is_some());
    assert_eq!(q.table().len(), 2);

    let (start_key, row) = q
        .table()
        .iter()
        .find(|(key, _)| **key != next_key)
        .unwrap();
    assert_ne!(start_key, &next_key);
    // 10 + 0.4 * (0.01 + 0.95 * 10 - 10)
    assert!((row[&Action::Right] - 9.804).abs() < 1e-9);
}

#[test]
fn test_test_mode_never_changes_loaded_table() {
    let dir = TempDir::new().unwrap();

    let mut trainer = SimulationEngine::from_config(&q_only("learn")).unwrap();
    trainer.run().unwrap();
    let written = trainer.save_agents(dir.path()).unwrap();
    assert_eq!(written.len(), 1);
    let trained = trainer.agent("q").unwrap().q_learner().unwrap().table().clone();

    let mut evaluator = SimulationEngine::from_config(&q_only("test")).unwrap();
    assert_eq!(evaluator.load_agents(dir.path()).unwrap(), 1);
    let before = evaluator
        .agent("q")
        .unwrap()
        .q_learner()
        .unwrap()
        .table()
        .fingerprint();
    assert_eq!(before, trained.fingerprint());

    evaluator.run().unwrap();
    let q = evaluator.agent("q").unwrap().q_learner().unwrap();
    assert_eq!(q.table().fingerprint(), before);
    assert_eq!(q.table(), &trained);
    assert_eq!(q.epsilon(), 0.2);
}

#[test]
fn test_missing_save_file_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let mut engine = SimulationEngine::from_config(&q_only("test")).unwrap();
    assert_eq!(engine.load_agents(dir.path()).unwrap(), 0);
}

// ============================================================================
// Genetic policy
// ============================================================================

#[test]
fn test_genetic_best_survives_persistence() {
    let src = r#"{
        "episodes": 5,
        "max_steps": 25,
        "seed": 11,
        "environment": {
            "problem": "foraging",
            "width": 5,
            "height": 5,
            "resources": [[4, 4], [2, 3]],
            "spawn_at_nest": true
        },
        "agents": [{ "id": "g", "type": "genetic", "mode": "learn" }]
    }"#;
    let config = SimulationConfig::from_json_str(src).unwrap();
    let dir = TempDir::new().unwrap();

    let mut trainer = SimulationEngine::from_config(&config).unwrap();
    trainer.run().unwrap();
    let g = trainer.agent("g").unwrap().genetic().unwrap();
    let best = g.best_fitness().unwrap();
    let genome = g.best_genome().unwrap().to_vec();
    assert_eq!(g.generation(), 5);
    // Best fitness dominates every recorded member.
    assert!(g.population().members().iter().all(|m| m.fitness <= best));
    trainer.save_agents(dir.path()).unwrap();

    let mut test_config = config.clone();
    test_config.agents[0].mode = Mode::Test;
    let mut evaluator = SimulationEngine::from_config(&test_config).unwrap();
    evaluator.load_agents(dir.path()).unwrap();
    let loaded = evaluator.agent("g").unwrap().genetic().unwrap();
    assert_eq!(loaded.best_fitness(), Some(best));
    assert_eq!(loaded.genome(), genome.as_slice());

    evaluator.run().unwrap();
    let after = evaluator.agent("g").unwrap().genetic().unwrap();
    assert_eq!(after.best_fitness(), Some(best));
    assert_eq!(after.genome(), genome.as_slice());
}
