//! Elite population and variation operators.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A genome with the fitness it earned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scored {
    pub fitness: f64,
    pub genome: Vec<f64>,
}

/// Bounded population kept sorted by fitness, best first.
#[derive(Debug, Clone)]
pub struct Population {
    capacity: usize,
    members: Vec<Scored>,
}

impl Population {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: Vec::with_capacity(capacity + 1),
        }
    }

    /// Inserts a member and drops the worst beyond capacity.
    ///
    /// Ties keep insertion order; NaN fitness sorts last.
    pub fn insert(&mut self, fitness: f64, genome: Vec<f64>) {
        let pos = self
            .members
            .iter()
            .position(|m| rank(m.fitness) < rank(fitness))
            .unwrap_or(self.members.len());
        self.members.insert(pos, Scored { fitness, genome });
        self.members.truncate(self.capacity);
    }

    pub fn members(&self) -> &[Scored] {
        &self.members
    }

    pub fn best(&self) -> Option<&Scored> {
        self.members.first()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Sort key for fitness values; NaN ranks below every number.
pub fn rank(fitness: f64) -> f64 {
    if fitness.is_nan() {
        f64::NEG_INFINITY
    } else {
        fitness
    }
}

/// Standard normal sample via the Box-Muller transform.
pub fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::EPSILON);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Block-wise crossover over an `actions × features` weight matrix.
///
/// Each feature column is copied whole from `first` with probability
/// `inherit`, otherwise from `second`.
pub fn crossover<R: Rng>(
    first: &[f64],
    second: &[f64],
    n_features: usize,
    inherit: f64,
    rng: &mut R,
) -> Vec<f64> {
    let mut child = first.to_vec();
    if n_features == 0 {
        return child;
    }
    let n_actions = first.len() / n_features;
    for f in 0..n_features {
        if rng.gen::<f64>() < inherit {
            continue;
        }
        for a in 0..n_actions {
            let idx = a * n_features + f;
            if let Some(gene) = second.get(idx) {
                child[idx] = *gene;
            }
        }
    }
    child
}

/// Adds `N(0, scale²)` noise to each gene with probability `rate`.
pub fn mutate<R: Rng>(genome: &mut [f64], rate: f64, scale: f64, rng: &mut R) {
    for gene in genome.iter_mut() {
        if rng.gen::<f64>() < rate {
            *gene += gaussian(rng) * scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn population_is_sorted_and_bounded() {
        let mut pop = Population::new(3);
        for (i, f) in [5.0, 1.0, 9.0, 3.0, 7.0].into_iter().enumerate() {
            pop.insert(f, vec![i as f64]);
        }
        let fitness: Vec<f64> = pop.members().iter().map(|m| m.fitness).collect();
        assert_eq!(fitness, vec![9.0, 7.0, 5.0]);
        assert_eq!(pop.best().unwrap().genome, vec![2.0]);
    }

    #[test]
    fn nan_fitness_sorts_last() {
        let mut pop = Population::new(2);
        pop.insert(f64::NAN, vec![0.0]);
        pop.insert(-100.0, vec![1.0]);
        assert_eq!(pop.best().unwrap().fitness, -100.0);
    }

    #[test]
    fn crossover_copies_whole_columns() {
        let mut rng = StdRng::seed_from_u64(11);
        let a = vec![0.0; 6];
        let b = vec![1.0; 6];
        // 2 actions × 3 features.
        let child = crossover(&a, &b, 3, 0.5, &mut rng);
        for f in 0..3 {
            assert_eq!(child[f], child[3 + f]);
        }
    }

    #[test]
    fn zero_rate_mutation_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut genome = vec![0.5, -0.25, 1.0];
        mutate(&mut genome, 0.0, 1.0, &mut rng);
        assert_eq!(genome, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn gaussian_is_roughly_centred() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 5000;
        let mean: f64 = (0..n).map(|_| gaussian(&mut rng)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.1);
    }
}
