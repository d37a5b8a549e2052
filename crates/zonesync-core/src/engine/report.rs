//! Per-zone apply bookkeeping

use chrono::{DateTime, Utc};
use std::fmt;

use crate::changes::{Change, Operation, ResourceKind};

/// Where a single change stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeState {
    Planned,
    Applying,
    Applied,
    Failed(String),
    /// Not attempted because an earlier change in the zone failed
    Skipped,
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeState::Planned => f.write_str("planned"),
            ChangeState::Applying => f.write_str("applying"),
            ChangeState::Applied => f.write_str("applied"),
            ChangeState::Failed(error) => write!(f, "failed: {}", error),
            ChangeState::Skipped => f.write_str("skipped"),
        }
    }
}

/// One change and what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOutcome {
    pub description: String,
    pub operation: Operation,
    pub kind: ResourceKind,
    pub state: ChangeState,
}

impl ChangeOutcome {
    pub fn planned(change: &Change) -> Self {
        Self {
            description: change.description(),
            operation: change.operation,
            kind: change.kind(),
            state: ChangeState::Planned,
        }
    }

    pub fn zone_create(zone: &str) -> Self {
        Self {
            description: format!("create zone {}", zone),
            operation: Operation::Create,
            kind: ResourceKind::Zone,
            state: ChangeState::Planned,
        }
    }
}

/// Result of applying one zone's change set
///
/// Outcomes are listed in apply order, the zone create (if any) first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub zone: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<ChangeOutcome>,
}

impl ApplyReport {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn set_state(&mut self, index: usize, state: ChangeState) {
        if let Some(outcome) = self.outcomes.get_mut(index) {
            outcome.state = state;
        }
    }

    /// Mark every change after `index` as skipped
    pub(crate) fn skip_after(&mut self, index: usize) {
        for outcome in self.outcomes.iter_mut().skip(index + 1) {
            outcome.state = ChangeState::Skipped;
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    fn count(&self, matches: impl Fn(&ChangeState) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches(&outcome.state))
            .count()
    }

    pub fn applied(&self) -> usize {
        self.count(|state| *state == ChangeState::Applied)
    }

    pub fn failed(&self) -> usize {
        self.count(|state| matches!(state, ChangeState::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|state| *state == ChangeState::Skipped)
    }

    /// Whether every change was applied
    pub fn is_complete(&self) -> bool {
        self.applied() == self.outcomes.len()
    }

    /// Descriptions of the changes in a given state
    pub fn described(&self, matches: impl Fn(&ChangeState) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| matches(&outcome.state))
            .map(|outcome| outcome.description.as_str())
            .collect()
    }

    /// One-line summary, e.g. `zone example.com.: 3 applied, 1 failed, 2 skipped`
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "zone {}: {} applied, {} failed, {} skipped",
            self.zone,
            self.applied(),
            self.failed(),
            self.skipped()
        );
        if let Some(outcome) = self
            .outcomes
            .iter()
            .find(|outcome| matches!(outcome.state, ChangeState::Failed(_)))
        {
            summary.push_str(&format!(" ({} {})", outcome.description, outcome.state));
        }
        summary
    }
}
