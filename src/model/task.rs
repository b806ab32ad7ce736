use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::Category;
use super::project::Person;

/// Where a task in the merged view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOrigin {
    /// Read from the template sheet, not yet edited by anyone.
    Template,
    /// Persisted in the live store.
    Live,
}

/// A checklist item owned by exactly one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: Uuid,
    pub name: String,
    pub completed: bool,
}

impl SubTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            completed: false,
        }
    }
}

/// `round(100 * completed / total)`, or 0 without sub-tasks. Halves round up.
pub fn derive_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total) as u64;
    let total = total as u64;
    ((200 * completed + total) / (2 * total)) as u8
}

/// Color step of a progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressBand {
    Red,
    Orange,
    Yellow,
    Blue,
    Teal,
}

impl ProgressBand {
    pub fn from_progress(progress: u8) -> Self {
        match progress {
            0..=19 => ProgressBand::Red,
            20..=49 => ProgressBand::Orange,
            50..=79 => ProgressBand::Yellow,
            80..=99 => ProgressBand::Blue,
            _ => ProgressBand::Teal,
        }
    }
}

/// A main task row in a category's Gantt chart.
///
/// `progress` is always derived from the sub-tasks, so it is only reachable
/// through [`Task::progress`]; anything that changes sub-task completion
/// goes through a method that re-derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub category: Category,
    pub assigned_person: Option<Person>,
    /// Display order within the category. `None` sorts last.
    pub order_index: Option<i64>,
    pub origin: TaskOrigin,
    sub_tasks: Vec<SubTask>,
    progress: u8,
}

impl Task {
    /// Create a task. An end date before the start is pulled up to the start.
    pub fn new(
        name: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
        category: Category,
        origin: TaskOrigin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start,
            end: end.max(start),
            category,
            assigned_person: None,
            order_index: None,
            origin,
            sub_tasks: Vec::new(),
            progress: 0,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_order_index(mut self, order_index: Option<i64>) -> Self {
        self.order_index = order_index;
        self
    }

    pub fn with_assignee(mut self, person: Option<Person>) -> Self {
        self.assigned_person = person;
        self
    }

    pub fn with_sub_tasks(mut self, sub_tasks: Vec<SubTask>) -> Self {
        self.sub_tasks = sub_tasks;
        self.recompute_progress();
        self
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn sub_tasks(&self) -> &[SubTask] {
        &self.sub_tasks
    }

    pub fn completed_sub_tasks(&self) -> usize {
        self.sub_tasks.iter().filter(|s| s.completed).count()
    }

    pub fn is_template(&self) -> bool {
        self.origin == TaskOrigin::Template
    }

    /// Number of calendar days covered, both ends included.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Flip one sub-task and re-derive progress. Returns the new completion
    /// state, or `None` if the sub-task does not belong to this task.
    pub fn toggle_sub_task(&mut self, sub_task_id: Uuid) -> Option<bool> {
        let sub = self.sub_tasks.iter_mut().find(|s| s.id == sub_task_id)?;
        sub.completed = !sub.completed;
        let completed = sub.completed;
        self.recompute_progress();
        Some(completed)
    }

    fn recompute_progress(&mut self) {
        self.progress = derive_progress(self.completed_sub_tasks(), self.sub_tasks.len());
    }
}
