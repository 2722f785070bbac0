//! Outcome of a reconciliation pass.

use crate::executor::{Mode, TaskError, Verdict};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use nimbus_core::{RunId, TaskName};
use std::fmt;

/// What happened to one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Applied; the object now matches
    Converged {
        /// Verdict that was carried out
        verdict: Verdict,
        /// Object identifier
        id: String,
    },
    /// Dry run; the verdict that apply would carry out
    Planned {
        /// Verdict
        verdict: Verdict,
    },
    /// The task itself failed
    Failed(TaskError),
    /// Not run because a dependency failed
    Skipped {
        /// Failed task upstream
        blocked_by: TaskName,
    },
    /// Not run because the pass was cancelled
    Cancelled,
}

impl TaskOutcome {
    /// Verdict, if the task ran to completion
    #[must_use]
    pub const fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::Converged { verdict, .. } | Self::Planned { verdict } => Some(verdict),
            _ => None,
        }
    }

    /// Whether the task ran to completion
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.verdict().is_some()
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged { verdict, id } => write!(f, "{} [{}]", verdict, id),
            Self::Planned { verdict } => write!(f, "would {}", verdict),
            Self::Failed(e) => write!(f, "failed: {}", e),
            Self::Skipped { blocked_by } => write!(f, "skipped: {} failed", blocked_by),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-task outcomes of one pass, in plan order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Pass identifier
    pub run_id: RunId,
    /// Mode the pass ran in
    pub mode: Mode,
    /// Outcome per task
    pub outcomes: IndexMap<TaskName, TaskOutcome>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Finish time
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Whether every task ran to completion
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_ok)
    }

    /// Tasks that failed themselves, with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&TaskName, &TaskError)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            TaskOutcome::Failed(e) => Some((name, e)),
            _ => None,
        })
    }

    /// Tasks skipped because of an upstream failure
    pub fn skipped(&self) -> impl Iterator<Item = &TaskName> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TaskOutcome::Skipped { .. }))
            .map(|(name, _)| name)
    }

    /// Tasks never started because of cancellation
    pub fn cancelled(&self) -> impl Iterator<Item = &TaskName> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TaskOutcome::Cancelled))
            .map(|(name, _)| name)
    }

    /// Number of create verdicts
    #[must_use]
    pub fn creates(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Create))
    }

    /// Number of update verdicts
    #[must_use]
    pub fn updates(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Update { .. }))
    }

    /// Number of no-op verdicts
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|v| matches!(v, Verdict::NoOp))
    }

    /// Wall-clock duration of the pass
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    fn count(&self, f: impl Fn(&Verdict) -> bool) -> usize {
        self.outcomes
            .values()
            .filter_map(TaskOutcome::verdict)
            .filter(|v| f(*v))
            .count()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({})", self.run_id, self.mode)?;
        for (name, outcome) in &self.outcomes {
            writeln!(f, "  {}: {}", name, outcome)?;
        }
        write!(
            f,
            "{} to create, {} to update, {} unchanged, {} failed",
            self.creates(),
            self.updates(),
            self.unchanged(),
            self.failures().count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudError;

    fn name(s: &str) -> TaskName {
        TaskName::new(s).unwrap()
    }

    fn report(outcomes: Vec<(&str, TaskOutcome)>) -> ExecutionReport {
        let now = Utc::now();
        ExecutionReport {
            run_id: RunId::new(),
            mode: Mode::Apply,
            outcomes: outcomes.into_iter().map(|(n, o)| (name(n), o)).collect(),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_success_report() {
        let r = report(vec![
            (
                "Network/c",
                TaskOutcome::Converged {
                    verdict: Verdict::Create,
                    id: "network-1".to_string(),
                },
            ),
            ("LoadBalancer/api.c", TaskOutcome::Planned { verdict: Verdict::NoOp }),
        ]);
        assert!(r.is_success());
        assert_eq!(r.creates(), 1);
        assert_eq!(r.unchanged(), 1);
        assert_eq!(r.updates(), 0);
        assert_eq!(r.failures().count(), 0);
    }

    #[test]
    fn test_partial_failure_report() {
        let err = TaskError::Cloud(CloudError::NotFound("Network/c".to_string()));
        let r = report(vec![
            ("Network/c", TaskOutcome::Failed(err.clone())),
            (
                "LoadBalancer/api.c",
                TaskOutcome::Skipped {
                    blocked_by: name("Network/c"),
                },
            ),
            ("ClusterSpec/c", TaskOutcome::Cancelled),
        ]);
        assert!(!r.is_success());

        let failures: Vec<_> = r.failures().collect();
        assert_eq!(failures, vec![(&name("Network/c"), &err)]);
        let skipped: Vec<_> = r.skipped().map(TaskName::as_str).collect();
        assert_eq!(skipped, vec!["LoadBalancer/api.c"]);
        assert_eq!(r.cancelled().count(), 1);

        let text = r.to_string();
        assert!(text.contains("LoadBalancer/api.c: skipped: Network/c failed"));
        assert!(text.ends_with("0 to create, 0 to update, 0 unchanged, 1 failed"));
    }
}
