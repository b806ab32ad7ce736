use std::collections::HashSet;

use uuid::Uuid;

use super::task::{SubTask, Task};

/// One line of the chart, in top-to-bottom order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Row<'a> {
    Main(&'a Task),
    Sub(&'a Task, &'a SubTask),
    /// Inline "add sub-task" line under an expanded task.
    AddSub(&'a Task),
}

/// Session-only view state of a category chart. Nothing here is persisted;
/// a fresh view starts with every task collapsed and shown.
#[derive(Debug, Clone, Default)]
pub struct GanttViewState {
    expanded: HashSet<Uuid>,
    hidden: HashSet<Uuid>,
}

impl GanttViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, task_id: Uuid) -> bool {
        self.expanded.contains(&task_id)
    }

    pub fn toggle_expanded(&mut self, task_id: Uuid) {
        if !self.expanded.remove(&task_id) {
            self.expanded.insert(task_id);
        }
    }

    pub fn is_hidden(&self, task_id: Uuid) -> bool {
        self.hidden.contains(&task_id)
    }

    pub fn hide(&mut self, task_id: Uuid) {
        self.hidden.insert(task_id);
    }

    pub fn show(&mut self, task_id: Uuid) {
        self.hidden.remove(&task_id);
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }

    /// Drop view state for a task that no longer exists.
    pub fn forget(&mut self, task_id: Uuid) {
        self.expanded.remove(&task_id);
        self.hidden.remove(&task_id);
    }

    /// Carry expansion across a promotion, where the task gets a new id.
    pub fn rekey(&mut self, old: Uuid, new: Uuid) {
        if self.expanded.remove(&old) {
            self.expanded.insert(new);
        }
        if self.hidden.remove(&old) {
            self.hidden.insert(new);
        }
    }

    /// Flatten shown tasks into display rows. Expanded tasks contribute
    /// their sub-tasks. Live tasks also get an add line; template tasks
    /// have no stored row to add to until they are promoted.
    pub fn visible_rows<'a>(&self, tasks: &'a [Task]) -> Vec<Row<'a>> {
        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks.iter().filter(|t| !self.is_hidden(t.id)) {
            rows.push(Row::Main(task));
            if self.is_expanded(task.id) {
                rows.extend(task.sub_tasks().iter().map(|sub| Row::Sub(task, sub)));
                if !task.is_template() {
                    rows.push(Row::AddSub(task));
                }
            }
        }
        rows
    }

    /// Hidden tasks still present in `tasks`, in list order.
    pub fn hidden_tasks<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.is_hidden(t.id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, TaskOrigin};
    use chrono::NaiveDate;

    fn task(name: &str, subs: &[&str], origin: TaskOrigin) -> Task {
        let day = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        Task::new(name, day, day, Category::Training, origin)
            .with_sub_tasks(subs.iter().map(|s| SubTask::new(*s)).collect())
    }

    fn describe(rows: &[Row<'_>]) -> Vec<String> {
        rows.iter()
            .map(|row| match row {
                Row::Main(t) => t.name.clone(),
                Row::Sub(_, s) => format!("  {}", s.name),
                Row::AddSub(t) => format!("  + {}", t.name),
            })
            .collect()
    }

    #[test]
    fn collapsed_by_default() {
        let tasks = vec![task("a", &["a1"], TaskOrigin::Live), task("b", &[], TaskOrigin::Live)];
        let view = GanttViewState::new();
        assert_eq!(describe(&view.visible_rows(&tasks)), vec!["a", "b"]);
    }

    #[test]
    fn expanding_reveals_sub_rows() {
        let tasks = vec![
            task("a", &["a1", "a2"], TaskOrigin::Live),
            task("t", &["t1"], TaskOrigin::Template),
        ];
        let mut view = GanttViewState::new();
        view.toggle_expanded(tasks[0].id);
        view.toggle_expanded(tasks[1].id);
        assert_eq!(
            describe(&view.visible_rows(&tasks)),
            vec!["a", "  a1", "  a2", "  + a", "t", "  t1"]
        );

        view.toggle_expanded(tasks[0].id);
        assert!(!view.is_expanded(tasks[0].id));
    }

    #[test]
    fn hide_and_show_are_local() {
        let tasks = vec![task("a", &[], TaskOrigin::Live), task("b", &[], TaskOrigin::Live)];
        let mut view = GanttViewState::new();
        view.hide(tasks[0].id);
        assert_eq!(describe(&view.visible_rows(&tasks)), vec!["b"]);
        assert_eq!(view.hidden_count(), 1);
        assert_eq!(view.hidden_tasks(&tasks)[0].name, "a");

        view.show(tasks[0].id);
        assert_eq!(describe(&view.visible_rows(&tasks)), vec!["a", "b"]);

        view.hide(tasks[1].id);
        let fresh = GanttViewState::new();
        assert_eq!(fresh.visible_rows(&tasks).len(), 2);
    }

    #[test]
    fn rekey_moves_state_to_promoted_id() {
        let mut view = GanttViewState::new();
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        view.toggle_expanded(old);
        view.rekey(old, new);
        assert!(view.is_expanded(new));
        assert!(!view.is_expanded(old));

        view.forget(new);
        assert!(!view.is_expanded(new));
    }
}
