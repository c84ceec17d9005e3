//! Task graph with deterministic scheduling order

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::Task;

/// Errors from graph construction and validation
#[derive(Debug, Error)]
pub enum GraphError {
    /// A task id was added twice
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    /// A task depends on itself
    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// A dependency references an id not present in the graph
    #[error("task '{dependent}' depends on unknown task '{dependency}'")]
    UnknownTask {
        dependent: String,
        dependency: String,
    },

    /// The graph contains a dependency cycle
    #[error("dependency cycle involving: {0}")]
    Cycle(String),
}

/// Directed acyclic graph of tasks.
///
/// Tasks are stored in a `BTreeMap` so iteration, topological sorting, and
/// serialization are all deterministic: identical inputs produce
/// byte-identical serialized plans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDag {
    tasks: BTreeMap<String, Task>,
}

impl TaskDag {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, rejecting duplicate ids and self-dependencies.
    ///
    /// Dependencies may reference ids added later; unknown ids are caught
    /// by [`TaskDag::validate`].
    pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask(task.id));
        }
        if task.depends_on.contains(&task.id) {
            return Err(GraphError::SelfDependency(task.id));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Look up a task by id
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Whether the graph contains the id
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Iterate tasks in id order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate edge references and acyclicity
    pub fn validate(&self) -> Result<(), GraphError> {
        self.topo_order().map(|_| ())
    }

    /// Deterministic topological order (Kahn's algorithm).
    ///
    /// Repeated calls on an unmodified graph return the identical order.
    /// Fails with [`GraphError::UnknownTask`] on dangling edges and
    /// [`GraphError::Cycle`] naming every member of the cyclic remainder.
    pub fn topo_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for task in self.tasks.values() {
            in_degree.entry(&task.id).or_insert(0);
            for dep in &task.depends_on {
                if !self.tasks.contains_key(dep) {
                    return Err(GraphError::UnknownTask {
                        dependent: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                *in_degree.entry(&task.id).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(&task.id);
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(id) = ready.pop_front() {
            order.push(id.to_string());
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.push_back(child);
                        }
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            let mut remaining: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            remaining.sort_unstable();
            return Err(GraphError::Cycle(remaining.join(", ")));
        }

        Ok(order)
    }

    /// Partition tasks into parallel levels.
    ///
    /// A task's level is one past the deepest of its dependencies; tasks
    /// with no dependencies form level 0. Within a level, topological
    /// order is preserved.
    pub fn levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let order = self.topo_order()?;
        let mut level_of: BTreeMap<&str, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();

        for id in &order {
            let task = &self.tasks[id];
            let level = task
                .depends_on
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level_of.insert(&task.id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }

        Ok(levels)
    }
}
