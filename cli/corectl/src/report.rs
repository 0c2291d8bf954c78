//! Per-node outcomes of a verb.

use crate::error::ClusterError;

/// Outcome of one command against one target.
#[derive(Debug)]
pub struct NodeOutcome {
    /// Node name, or the pool name for pool-wide commands.
    pub target: String,
    pub action: String,
    pub result: Result<(), ClusterError>,
}

/// Everything a verb did, in the order it did it.
#[derive(Debug)]
pub struct VerbReport {
    verb: String,
    outcomes: Vec<NodeOutcome>,
}

impl VerbReport {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn record(
        &mut self,
        target: impl Into<String>,
        action: impl Into<String>,
        result: Result<(), ClusterError>,
    ) {
        self.outcomes.push(NodeOutcome {
            target: target.into(),
            action: action.into(),
            result,
        });
    }

    pub fn succeeded(&mut self, target: impl Into<String>, action: impl Into<String>) {
        self.record(target, action, Ok(()));
    }

    pub fn failed(
        &mut self,
        target: impl Into<String>,
        action: impl Into<String>,
        err: ClusterError,
    ) {
        self.record(target, action, Err(err));
    }

    pub fn outcomes(&self) -> &[NodeOutcome] {
        &self.outcomes
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}
