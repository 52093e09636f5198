use thiserror::Error;

use crate::types::Cell;
use crate::Id;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid spawn {cell} for agent {agent}: {reason}")]
    InvalidSpawn {
        agent: Id,
        cell: Cell,
        reason: &'static str,
    },

    #[error("Agent {agent} of kind {kind} cannot run in the {problem} problem")]
    ProblemMismatch {
        agent: Id,
        kind: &'static str,
        problem: &'static str,
    },

    #[error("Agent {0} asked to act before receiving any observation")]
    NoObservation(Id),

    #[error("Agent {0} is not registered in the environment")]
    UnknownAgent(Id),

    #[error("Not enough free cells to spawn agents: needed {needed}, available {available}")]
    InsufficientFreeCells { needed: usize, available: usize },

    #[error("Feature shape mismatch: expected {expected}, got {actual}")]
    FeatureShapeMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_observation_display() {
        let e = SimError::NoObservation("a1".to_string());
        assert_eq!(
            e.to_string(),
            "Agent a1 asked to act before receiving any observation"
        );
    }

    #[test]
    fn invalid_spawn_display() {
        let e = SimError::InvalidSpawn {
            agent: "a1".to_string(),
            cell: Cell::new(3, 4),
            reason: "cell is a wall",
        };
        assert_eq!(
            e.to_string(),
            "Invalid spawn (3, 4) for agent a1: cell is a wall"
        );
    }

    #[test]
    fn insufficient_cells_display() {
        let e = SimError::InsufficientFreeCells {
            needed: 5,
            available: 2,
        };
        assert!(e.to_string().contains("needed 5, available 2"));
    }

    #[test]
    fn feature_shape_display() {
        let e = SimError::FeatureShapeMismatch {
            expected: 14,
            actual: 12,
        };
        assert_eq!(
            e.to_string(),
            "Feature shape mismatch: expected 14, got 12"
        );
    }
}
