//! Scheduler over a validated execution plan.
//!
//! Hands out tasks whose dependencies have all completed, in plan order.
//! A failed task never releases its dependents; they are skipped with the
//! failure recorded as the blocker.

use indexmap::{IndexMap, IndexSet};
use nimbus_core::TaskName;
use nimbus_plan::ExecutionPlan;
use std::collections::VecDeque;

/// Scheduling decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Run this task next
    Run(TaskName),
    /// Nothing is ready; wait for running tasks
    Wait,
    /// Every task is finished
    Complete,
}

/// Dependency-driven scheduler for one pass
#[derive(Debug)]
pub struct Scheduler<'a> {
    plan: &'a ExecutionPlan,
    /// Unfinished dependencies per waiting task
    remaining: IndexMap<&'a TaskName, usize>,
    ready: VecDeque<&'a TaskName>,
    running: IndexSet<&'a TaskName>,
    completed: IndexSet<&'a TaskName>,
    failed: IndexSet<&'a TaskName>,
    /// Skipped task to the failed task that blocked it
    skipped: IndexMap<&'a TaskName, &'a TaskName>,
}

impl<'a> Scheduler<'a> {
    /// Create a scheduler for `plan`
    #[must_use]
    pub fn new(plan: &'a ExecutionPlan) -> Self {
        let mut remaining = IndexMap::new();
        let mut ready = VecDeque::new();
        for name in plan.order() {
            let deps = plan.task(name.as_str()).map_or(0, |t| t.dependencies().len());
            if deps == 0 {
                ready.push_back(name);
            } else {
                remaining.insert(name, deps);
            }
        }
        Self {
            plan,
            remaining,
            ready,
            running: IndexSet::new(),
            completed: IndexSet::new(),
            failed: IndexSet::new(),
            skipped: IndexMap::new(),
        }
    }

    /// Next scheduling decision, without changing state
    #[must_use]
    pub fn decide(&self) -> ScheduleDecision {
        if let Some(name) = self.ready.front() {
            ScheduleDecision::Run((*name).clone())
        } else if self.is_complete() {
            ScheduleDecision::Complete
        } else {
            ScheduleDecision::Wait
        }
    }

    /// Take the next ready task and mark it running
    pub fn next_ready(&mut self) -> Option<&'a TaskName> {
        let name = self.ready.pop_front()?;
        self.running.insert(name);
        Some(name)
    }

    /// Record success and release dependents whose dependencies are all done
    pub fn mark_complete(&mut self, name: &TaskName) {
        let Some(name) = self.running.shift_take(name) else {
            return;
        };
        self.completed.insert(name);
        let plan = self.plan;
        for dependent in plan.dependents(name.as_str()) {
            if let Some(count) = self.remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    if let Some((key, _)) = self.remaining.shift_remove_entry(dependent) {
                        self.ready.push_back(key);
                    }
                }
            }
        }
    }

    /// Record failure and skip every transitive dependent
    ///
    /// Returns the newly skipped tasks in discovery order.
    pub fn mark_failed(&mut self, name: &TaskName) -> Vec<&'a TaskName> {
        let Some(name) = self.running.shift_take(name) else {
            return Vec::new();
        };
        self.failed.insert(name);

        let plan = self.plan;
        let mut newly = Vec::new();
        let mut queue: VecDeque<&'a TaskName> = plan.dependents(name.as_str()).iter().collect();
        while let Some(dependent) = queue.pop_front() {
            if self.remaining.shift_remove(dependent).is_none() {
                continue;
            }
            self.skipped.insert(dependent, name);
            newly.push(dependent);
            queue.extend(plan.dependents(dependent.as_str()));
        }
        newly
    }

    /// Tasks never started: ready or still waiting
    #[must_use]
    pub fn unscheduled(&self) -> Vec<&'a TaskName> {
        self.plan
            .order()
            .iter()
            .filter(|n| self.ready.contains(n) || self.remaining.contains_key(n))
            .collect()
    }

    /// Failed task that caused `name` to be skipped
    #[must_use]
    pub fn blocker(&self, name: &TaskName) -> Option<&'a TaskName> {
        self.skipped.get(name).copied()
    }

    /// Whether every task has finished, failed or been skipped
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty() && self.remaining.is_empty()
    }

    /// Number of running tasks
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Number of completed tasks
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Number of failed tasks
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Number of skipped tasks
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}
