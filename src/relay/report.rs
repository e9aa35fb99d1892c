//! Per-run progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which part of a run a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPhase {
    /// One link of a sequential relay
    Hop,
    /// Source to middleman
    FanOut,
    /// Middleman to destination
    FanIn,
}

/// One relay step, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayOutcome {
    pub phase: RelayPhase,
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub attempts_used: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A fan-in leg that was skipped without a send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedLeg {
    pub address: String,
    pub balance: f64,
    pub fee: f64,
}

/// Everything a run did, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayReport {
    pub run_id: String,
    pub strategy: String,
    pub amount: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<RelayOutcome>,
    pub skipped: Vec<SkippedLeg>,
}

impl RelayReport {
    pub fn new(run_id: impl Into<String>, strategy: impl Into<String>, amount: f64) -> Self {
        Self {
            run_id: run_id.into(),
            strategy: strategy.into(),
            amount,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: RelayOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn record_skip(&mut self, skipped: SkippedLeg) {
        self.skipped.push(skipped);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn completed(&self) -> impl Iterator<Item = &RelayOutcome> {
        self.outcomes.iter().filter(|o| o.success)
    }

    /// Steps that exhausted their attempts and did not abort the run
    pub fn failed_legs(&self) -> impl Iterator<Item = &RelayOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_legs().next().is_some()
    }

    /// The last successful step, i.e. where the funds were last seen moving
    pub fn last_completed(&self) -> Option<&RelayOutcome> {
        self.outcomes.iter().rev().find(|o| o.success)
    }

    /// Sum of amounts successfully sent in `phase`
    pub fn total_sent(&self, phase: RelayPhase) -> f64 {
        self.completed()
            .filter(|o| o.phase == phase)
            .map(|o| o.amount)
            .sum()
    }
}
