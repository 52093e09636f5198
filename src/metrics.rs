//! Per-episode statistics and their tabular export.
//!
//! The tracker is a passive, append-only sink filled by the engine at the
//! end of each episode. The exported column set depends on which metrics
//! were populated.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::error::{Result, SimError};
use crate::Id;

/// Statistics of one finished episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeRecord {
    pub episode: u32,
    /// Environment steps executed.
    pub steps: u32,
    /// Cumulative reward per agent.
    pub rewards: BTreeMap<Id, f64>,
    /// Beacon: fraction of agents that reached the target.
    pub success_rate: Option<f64>,
    /// Foraging: resources delivered to the nest.
    pub resources_delivered: Option<u32>,
    /// Beacon: final Manhattan distance per agent.
    pub final_distance: BTreeMap<Id, u32>,
    /// Beacon: whether each agent reached the target.
    pub reached: BTreeMap<Id, bool>,
}

impl EpisodeRecord {
    pub fn new(episode: u32, steps: u32) -> Self {
        Self {
            episode,
            steps,
            rewards: BTreeMap::new(),
            success_rate: None,
            resources_delivered: None,
            final_distance: BTreeMap::new(),
            reached: BTreeMap::new(),
        }
    }
}

/// Append-only list of [`EpisodeRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct MetricsTracker {
    agent_ids: Vec<Id>,
    records: Vec<EpisodeRecord>,
}

impl MetricsTracker {
    /// Creates a tracker whose per-agent columns follow `agent_ids` order.
    pub fn new(agent_ids: Vec<Id>) -> Self {
        Self {
            agent_ids,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: EpisodeRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpisodeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reward series of one agent, indexed by episode.
    pub fn rewards_of(&self, agent: &str) -> Vec<f64> {
        self.records
            .iter()
            .filter_map(|r| r.rewards.get(agent).copied())
            .collect()
    }

    fn has_success(&self) -> bool {
        self.records.iter().any(|r| r.success_rate.is_some())
    }

    fn has_delivered(&self) -> bool {
        self.records.iter().any(|r| r.resources_delivered.is_some())
    }

    fn agents_with<F>(&self, present: F) -> Vec<&Id>
    where
        F: Fn(&EpisodeRecord, &Id) -> bool,
    {
        self.agent_ids
            .iter()
            .filter(|id| self.records.iter().any(|r| present(r, id)))
            .collect()
    }

    /// Header of the exported table.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = vec!["episode".to_string(), "steps".to_string()];
        for id in self.agents_with(|r, id| r.rewards.contains_key(id)) {
            columns.push(format!("reward_{}", id));
        }
        if self.has_success() {
            columns.push("success_rate".to_string());
        }
        if self.has_delivered() {
            columns.push("resources_delivered".to_string());
        }
        for id in self.agents_with(|r, id| r.final_distance.contains_key(id)) {
            columns.push(format!("final_distance_{}", id));
        }
        for id in self.agents_with(|r, id| r.reached.contains_key(id)) {
            columns.push(format!("success_{}", id));
        }
        columns
    }

    /// One row per episode, aligned with [`MetricsTracker::columns`]; absent
    /// values are empty strings.
    pub fn rows(&self) -> Vec<Vec<String>> {
        let reward_ids = self.agents_with(|r, id| r.rewards.contains_key(id));
        let distance_ids = self.agents_with(|r, id| r.final_distance.contains_key(id));
        let reached_ids = self.agents_with(|r, id| r.reached.contains_key(id));
        let has_success = self.has_success();
        let has_delivered = self.has_delivered();

        self.records
            .iter()
            .map(|r| {
                let mut row = vec![r.episode.to_string(), r.steps.to_string()];
                for id in &reward_ids {
                    row.push(r.rewards.get(*id).map(|v| v.to_string()).unwrap_or_default());
                }
                if has_success {
                    row.push(r.success_rate.map(|v| v.to_string()).unwrap_or_default());
                }
                if has_delivered {
                    row.push(
                        r.resources_delivered
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                    );
                }
                for id in &distance_ids {
                    row.push(
                        r.final_distance
                            .get(*id)
                            .map(|v| v.to_string())
                            .unwrap_or_default(),
                    );
                }
                for id in &reached_ids {
                    row.push(
                        r.reached
                            .get(*id)
                            .map(|v| u8::from(*v).to_string())
                            .unwrap_or_default(),
                    );
                }
                row
            })
            .collect()
    }

    /// Writes header and rows as CSV.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(self.columns())?;
        for row in self.rows() {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| SimError::Config(format!("non UTF-8 CSV output: {}", e)))
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_records(&self.agent_ids, &self.records)
    }
}

/// Aggregates over all recorded episodes.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub n_episodes: usize,
    pub mean_steps: f64,
    /// Mean episode reward per agent.
    pub mean_rewards: BTreeMap<Id, f64>,
    /// Best episode reward per agent.
    pub best_rewards: BTreeMap<Id, f64>,
    pub mean_success_rate: Option<f64>,
    pub mean_delivered: Option<f64>,
    pub total_delivered: Option<u32>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

impl MetricsSummary {
    fn from_records(agent_ids: &[Id], records: &[EpisodeRecord]) -> Self {
        let mut mean_rewards = BTreeMap::new();
        let mut best_rewards = BTreeMap::new();
        for id in agent_ids {
            let series: Vec<f64> = records
                .iter()
                .filter_map(|r| r.rewards.get(id).copied())
                .collect();
            if let Some(m) = mean(series.iter().copied()) {
                mean_rewards.insert(id.clone(), m);
                let best = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                best_rewards.insert(id.clone(), best);
            }
        }
        let delivered: Vec<u32> = records
            .iter()
            .filter_map(|r| r.resources_delivered)
            .collect();
        Self {
            n_episodes: records.len(),
            mean_steps: mean(records.iter().map(|r| r.steps as f64)).unwrap_or(0.0),
            mean_rewards,
            best_rewards,
            mean_success_rate: mean(records.iter().filter_map(|r| r.success_rate)),
            mean_delivered: mean(delivered.iter().map(|d| *d as f64)),
            total_delivered: (!delivered.is_empty()).then(|| delivered.iter().sum()),
        }
    }
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Simulation Summary ({} episodes) ===", self.n_episodes)?;
        writeln!(f, "  Mean steps:              {:.1}", self.mean_steps)?;
        for (id, reward) in &self.mean_rewards {
            let best = self.best_rewards.get(id).copied().unwrap_or(*reward);
            writeln!(f, "  Reward [{}]: mean {:.2}, best {:.2}", id, reward, best)?;
        }
        if let Some(rate) = self.mean_success_rate {
            writeln!(f, "  Mean success rate:       {:.1}%", rate * 100.0)?;
        }
        if let (Some(mean), Some(total)) = (self.mean_delivered, self.total_delivered) {
            writeln!(f, "  Resources delivered:     {} (mean {:.2})", total, mean)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon_record(episode: u32, reward: f64, reached: bool) -> EpisodeRecord {
        let mut r = EpisodeRecord::new(episode, 4);
        r.rewards.insert("a".to_string(), reward);
        r.success_rate = Some(if reached { 1.0 } else { 0.0 });
        r.final_distance.insert("a".to_string(), if reached { 0 } else { 3 });
        r.reached.insert("a".to_string(), reached);
        r
    }

    #[test]
    fn beacon_columns_skip_foraging_metrics() {
        let mut t = MetricsTracker::new(vec!["a".to_string()]);
        t.record(beacon_record(0, 10.0, true));
        assert_eq!(
            t.columns(),
            vec![
                "episode",
                "steps",
                "reward_a",
                "success_rate",
                "final_distance_a",
                "success_a"
            ]
        );
        assert_eq!(t.rows()[0], vec!["0", "4", "10", "1", "0", "1"]);
    }

    #[test]
    fn foraging_columns() {
        let mut t = MetricsTracker::new(vec!["a".to_string(), "b".to_string()]);
        let mut r = EpisodeRecord::new(0, 20);
        r.rewards.insert("a".to_string(), 1.5);
        r.rewards.insert("b".to_string(), -0.5);
        r.resources_delivered = Some(2);
        t.record(r);
        assert_eq!(
            t.columns(),
            vec!["episode", "steps", "reward_a", "reward_b", "resources_delivered"]
        );
    }

    #[test]
    fn csv_has_header_and_rows() {
        let mut t = MetricsTracker::new(vec!["a".to_string()]);
        t.record(beacon_record(0, 10.0, true));
        t.record(beacon_record(1, -2.0, false));
        let csv = t.to_csv_string().unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("episode,steps,reward_a"));
        assert_eq!(lines[2], "1,4,-2,0,3,0");
    }

    #[test]
    fn summary_aggregates() {
        let mut t = MetricsTracker::new(vec!["a".to_string()]);
        t.record(beacon_record(0, 10.0, true));
        t.record(beacon_record(1, 0.0, false));
        let s = t.summary();
        assert_eq!(s.n_episodes, 2);
        assert_eq!(s.mean_rewards["a"], 5.0);
        assert_eq!(s.best_rewards["a"], 10.0);
        assert_eq!(s.mean_success_rate, Some(0.5));
        assert_eq!(s.total_delivered, None);
        assert!(s.to_string().contains("50.0%"));
    }

    #[test]
    fn empty_tracker_has_base_columns() {
        let t = MetricsTracker::new(vec!["a".to_string()]);
        assert_eq!(t.columns(), vec!["episode", "steps"]);
        assert_eq!(t.summary().mean_steps, 0.0);
    }
}
