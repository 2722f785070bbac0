//! Task graph and its validated execution plan.
//!
//! The graph is built once per pass and validated before any task runs.
//! Validation rejects unknown dependencies and cycles; a cycle is always
//! reported, never broken.

use crate::task::Task;
use indexmap::{IndexMap, IndexSet};
use nimbus_core::TaskName;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two tasks share a name
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskName),

    /// A task depends on a name not in the graph
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// Task declaring the dependency
        task: TaskName,
        /// Missing name
        dependency: TaskName,
    },

    /// Dependencies form a cycle
    #[error("dependency cycle: {}", CyclePath(.0))]
    Cycle(Vec<TaskName>),

    /// A task name could not be formed
    #[error("invalid task name: {0}")]
    InvalidName(String),
}

impl From<nimbus_core::CoreError> for GraphError {
    fn from(err: nimbus_core::CoreError) -> Self {
        Self::InvalidName(err.to_string())
    }
}

struct CyclePath<'a>(&'a [TaskName]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.0 {
            write!(f, "{} -> ", name)?;
        }
        match self.0.first() {
            Some(first) => write!(f, "{}", first),
            None => Ok(()),
        }
    }
}

/// Tasks of one pass, keyed by name in insertion order
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: IndexMap<TaskName, Task>,
}

impl TaskGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task
    ///
    /// # Errors
    ///
    /// Returns error if a task with the same name exists
    pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(task.name()) {
            return Err(GraphError::DuplicateTask(task.name().clone()));
        }
        self.tasks.insert(task.name().clone(), task);
        Ok(())
    }

    /// Get a task by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Iterate tasks in insertion order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Names of tasks that depend directly on `name`
    #[must_use]
    pub fn dependents(&self, name: &TaskName) -> Vec<&TaskName> {
        self.tasks
            .values()
            .filter(|t| t.dependencies().contains(name))
            .map(Task::name)
            .collect()
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the graph and compute a topological order
    ///
    /// The order is deterministic: among tasks whose dependencies are all
    /// satisfied, insertion order wins.
    ///
    /// # Errors
    ///
    /// Returns error on an unknown dependency or a cycle
    pub fn into_plan(self) -> Result<ExecutionPlan, GraphError> {
        let mut dependents: IndexMap<TaskName, Vec<TaskName>> =
            self.tasks.keys().map(|name| (name.clone(), Vec::new())).collect();
        let mut in_degree: IndexMap<&TaskName, usize> = IndexMap::new();

        for task in self.tasks.values() {
            for dep in task.dependencies() {
                let Some(list) = dependents.get_mut(dep) else {
                    return Err(GraphError::UnknownDependency {
                        task: task.name().clone(),
                        dependency: dep.clone(),
                    });
                };
                list.push(task.name().clone());
            }
            in_degree.insert(task.name(), task.dependencies().len());
        }

        let mut ready: VecDeque<&TaskName> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(name) = ready.pop_front() {
            order.push(name.clone());
            for dependent in &dependents[name] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }

        if order.len() < self.tasks.len() {
            let remaining: IndexSet<&TaskName> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(name, _)| *name)
                .collect();
            return Err(GraphError::Cycle(self.find_cycle(&remaining)));
        }

        Ok(ExecutionPlan {
            graph: self,
            order,
            dependents,
        })
    }

    /// Walk dependencies inside `remaining` until a name repeats
    ///
    /// Every task left over after the topological sort has at least one
    /// dependency that is also left over, so the walk always closes.
    fn find_cycle(&self, remaining: &IndexSet<&TaskName>) -> Vec<TaskName> {
        let mut path: Vec<&TaskName> = Vec::new();
        let mut position: IndexMap<&TaskName, usize> = IndexMap::new();
        let mut current = remaining.first().copied();

        while let Some(name) = current {
            if let Some(&start) = position.get(name) {
                return path[start..].iter().map(|n| (*n).clone()).collect();
            }
            position.insert(name, path.len());
            path.push(name);
            current = self.tasks.get(name).and_then(|task| {
                task.dependencies()
                    .iter()
                    .find(|dep| remaining.contains(dep))
            });
        }
        path.into_iter().cloned().collect()
    }
}

/// A validated graph with its execution order
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: TaskGraph,
    order: Vec<TaskName>,
    dependents: IndexMap<TaskName, Vec<TaskName>>,
}

impl ExecutionPlan {
    /// The underlying graph
    #[must_use]
    pub const fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Task names in topological order
    #[must_use]
    pub fn order(&self) -> &[TaskName] {
        &self.order
    }

    /// Get a task by name
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.graph.get(name)
    }

    /// Direct dependents of `name`
    #[must_use]
    pub fn dependents(&self, name: &str) -> &[TaskName] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the plan has no tasks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
