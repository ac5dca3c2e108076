//! Execution planner - orders tasks into dependency stages

use crate::task::{BoxedTask, Task};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors found while staging a plan
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// The dependency edges form a cycle
    #[error("dependency cycle among tasks: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },
}

/// An ordered list of tasks with dependency edges
#[derive(Default)]
pub struct ExecutionPlan<'a> {
    tasks: Vec<BoxedTask<'a>>,
}

impl<'a> ExecutionPlan<'a> {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Append a task. Plan order is the tie-break within a stage.
    pub fn push(&mut self, task: BoxedTask<'a>) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[BoxedTask<'a>] {
        &self.tasks
    }

    /// Filter plan to only include tasks matching a predicate
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Task) -> bool,
    {
        Self {
            tasks: self
                .tasks
                .into_iter()
                .filter(|t| predicate(t.as_ref()))
                .collect(),
        }
    }

    /// Number of tasks in the plan
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks that may change something
    pub fn change_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_change()).count()
    }

    /// Layer tasks into stages (Kahn's algorithm).
    ///
    /// Every task lands in the first stage after all of its dependencies.
    /// Within a stage tasks keep plan order, so staging is deterministic.
    /// Dependencies on ids not in the plan are ignored.
    pub fn stages(&self) -> Result<Vec<Vec<usize>>, PlanError> {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, task) in self.tasks.iter().enumerate() {
            by_id.entry(task.id()).or_default().push(idx);
        }

        let deps: Vec<HashSet<usize>> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| {
                task.depends_on()
                    .iter()
                    .filter_map(|dep| by_id.get(dep))
                    .flatten()
                    .copied()
                    .filter(|&d| d != idx)
                    .collect()
            })
            .collect();

        let mut placed = vec![false; self.tasks.len()];
        let mut remaining = self.tasks.len();
        let mut stages = Vec::new();

        while remaining > 0 {
            let stage: Vec<usize> = (0..self.tasks.len())
                .filter(|&idx| !placed[idx] && deps[idx].iter().all(|&d| placed[d]))
                .collect();

            if stage.is_empty() {
                let ids = (0..self.tasks.len())
                    .filter(|&idx| !placed[idx])
                    .map(|idx| self.tasks[idx].id())
                    .collect();
                return Err(PlanError::Cycle { ids });
            }

            for &idx in &stage {
                placed[idx] = true;
            }
            remaining -= stage.len();
            stages.push(stage);
        }

        Ok(stages)
    }
}
