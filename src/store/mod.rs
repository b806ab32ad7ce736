//! Access to the live task store: projects, people, tasks and sub-tasks,
//! plus push notifications when any of them change.

pub mod sqlite;

use std::ops::Deref;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Category, Person, Project, SubTask, Task};

pub use sqlite::SqliteStore;

/// Template display orders stay below this value; tasks added by users are
/// numbered above it so they sort after the template.
pub const TEMPLATE_ORDER_CEILING: i64 = 10_000;

/// Fields for a new live task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub assigned_person_id: Option<Uuid>,
    /// Explicit display order. `None` appends after everything in scope.
    pub order_index: Option<i64>,
}

/// Partial update of a task. Only these fields can change.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the assignment.
    pub assigned_person: Option<Option<Uuid>>,
    /// New `(start, end)`, e.g. after a drag.
    pub schedule: Option<(NaiveDate, NaiveDate)>,
    /// Progress is derived from sub-tasks; a value here only triggers the
    /// derivation and is otherwise ignored.
    pub progress: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct SubTaskPatch {
    pub name: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the open date.
    pub open_date: Option<Option<NaiveDate>>,
}

/// The first edit made to a template task, applied while it is copied into
/// the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionEdit {
    AssignPerson(Option<Uuid>),
    /// Id of the template sub-task to flip.
    ToggleSubTask(Uuid),
    Reschedule(NaiveDate, NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Projects,
    People,
    Tasks,
    SubTasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed change. Task and sub-task events carry the scope of the
/// owning task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub category: Option<Category>,
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    Projects,
    People,
    Tasks { project_id: Uuid, category: Category },
}

impl Subscription {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match *self {
            Subscription::Projects => event.table == Table::Projects,
            Subscription::People => event.table == Table::People,
            Subscription::Tasks {
                project_id,
                category,
            } => {
                matches!(event.table, Table::Tasks | Table::SubTasks)
                    && event.project_id == Some(project_id)
                    && event.category == Some(category)
            }
        }
    }
}

/// CRUD and change notification over the live store.
///
/// Every mutation is all-or-nothing: on error nothing was written and no
/// event was sent.
pub trait LiveStore: Send + Sync {
    fn list_projects(&self) -> Result<Vec<Project>, StoreError>;
    fn add_project(&self, name: &str) -> Result<Project, StoreError>;
    fn update_project(&self, id: Uuid, patch: ProjectPatch) -> Result<(), StoreError>;
    /// Also removes every task of the project.
    fn delete_project(&self, id: Uuid) -> Result<(), StoreError>;

    fn list_people(&self) -> Result<Vec<Person>, StoreError>;
    fn add_person(&self, first_name: &str, last_name: &str) -> Result<Person, StoreError>;
    fn update_person(&self, id: Uuid, first_name: &str, last_name: &str)
        -> Result<(), StoreError>;
    /// Tasks assigned to the person become unassigned.
    fn delete_person(&self, id: Uuid) -> Result<(), StoreError>;

    fn list_tasks(&self, project_id: Uuid, category: Category) -> Result<Vec<Task>, StoreError>;
    fn add_task(
        &self,
        project_id: Uuid,
        category: Category,
        task: NewTask,
    ) -> Result<Task, StoreError>;
    fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<(), StoreError>;
    /// Also removes the task's sub-tasks.
    fn delete_task(&self, id: Uuid) -> Result<(), StoreError>;

    /// Appends to the end of the task's sub-task list.
    fn add_sub_task(&self, task_id: Uuid, name: &str) -> Result<SubTask, StoreError>;
    /// Returns the parent's new progress when completion changed.
    fn update_sub_task(&self, id: Uuid, patch: SubTaskPatch) -> Result<Option<u8>, StoreError>;
    /// Returns the parent's new progress.
    fn delete_sub_task(&self, id: Uuid) -> Result<u8, StoreError>;

    /// Copy a template task into the store and apply the edit that caused
    /// the copy, in one transaction.
    fn promote_task(
        &self,
        project_id: Uuid,
        template: &Task,
        edit: PromotionEdit,
    ) -> Result<Task, StoreError>;

    fn subscribe(&self, subscription: Subscription) -> ChangeReceiver;
}

/// Receiving end of a subscription. Dropping it ends the subscription.
#[derive(Debug)]
pub struct ChangeReceiver {
    rx: Receiver<ChangeEvent>,
    _alive: Arc<()>,
}

impl Deref for ChangeReceiver {
    type Target = Receiver<ChangeEvent>;

    fn deref(&self) -> &Self::Target {
        &self.rx
    }
}

#[derive(Debug)]
struct Subscriber {
    subscription: Subscription,
    tx: Sender<ChangeEvent>,
    alive: Weak<()>,
}

/// Fan-out of change events to subscribers. Dropped receivers are pruned
/// on every subscribe and publish.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Notifier {
    pub fn subscribe(&self, subscription: Subscription) -> ChangeReceiver {
        let (tx, rx) = mpsc::channel();
        let alive = Arc::new(());
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| s.alive.strong_count() > 0);
        subscribers.push(Subscriber {
            subscription,
            tx,
            alive: Arc::downgrade(&alive),
        });
        ChangeReceiver { rx, _alive: alive }
    }

    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(?event, "store change");
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| {
                s.alive.strong_count() > 0
                    && (!s.subscription.matches(&event) || s.tx.send(event.clone()).is_ok())
            });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
