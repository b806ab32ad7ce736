use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    ChangeEvent, ChangeKind, ChangeReceiver, LiveStore, NewTask, Notifier, ProjectPatch, PromotionEdit,
    SubTaskPatch, Subscription, Table, TaskPatch, TEMPLATE_ORDER_CEILING,
};
use crate::error::StoreError;
use crate::model::task::derive_progress;
use crate::model::{Category, Person, PersonColor, Project, SubTask, Task, TaskOrigin};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id          BLOB PRIMARY KEY,
    name        TEXT NOT NULL,
    open_date   TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS people (
    id          BLOB PRIMARY KEY,
    first_name  TEXT NOT NULL,
    last_name   TEXT NOT NULL,
    color       TEXT NOT NULL DEFAULT 'blue',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id                  BLOB PRIMARY KEY,
    project_id          BLOB NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    category            TEXT NOT NULL,
    name                TEXT NOT NULL,
    start_date          TEXT NOT NULL,
    end_date            TEXT NOT NULL,
    progress            INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    assigned_person_id  BLOB REFERENCES people(id) ON DELETE SET NULL,
    order_index         INTEGER,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL,
    CHECK (start_date <= end_date)
);
CREATE INDEX IF NOT EXISTS idx_tasks_scope ON tasks(project_id, category);
CREATE TABLE IF NOT EXISTS subtasks (
    id           BLOB PRIMARY KEY,
    task_id      BLOB NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    name         TEXT NOT NULL,
    completed    INTEGER NOT NULL DEFAULT 0,
    order_index  INTEGER NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id, order_index);
";

/// Live store backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    notifier: Notifier,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidInput(format!("{}: {e}", parent.display())))?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: Notifier::default(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn publish(&self, table: Table, kind: ChangeKind, id: Uuid, scope: Option<(Uuid, Category)>) {
        self.notifier.publish(ChangeEvent {
            table,
            kind,
            id,
            project_id: scope.map(|s| s.0),
            category: scope.map(|s| s.1),
        });
    }
}

fn validate_name(name: &str, entity: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidInput(format!("{entity} name must not be blank")));
    }
    Ok(())
}

fn validate_schedule(start: NaiveDate, end: NaiveDate) -> Result<(), StoreError> {
    if start > end {
        return Err(StoreError::InvalidInput(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok(())
}

fn ensure_exists(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: Uuid,
) -> Result<(), StoreError> {
    let found = conn
        .query_row(&format!("SELECT 1 FROM {table} WHERE id = ?1"), params![id], |_| Ok(()))
        .optional()?;
    found.ok_or(StoreError::NotFound { entity, id })
}

fn parse_category(label: &str) -> Result<Category, StoreError> {
    Category::parse(label).ok_or_else(|| StoreError::Corrupt(format!("unknown category '{label}'")))
}

/// Project and category of a task.
fn task_scope(conn: &Connection, task_id: Uuid) -> Result<(Uuid, Category), StoreError> {
    let row: Option<(Uuid, String)> = conn
        .query_row(
            "SELECT project_id, category FROM tasks WHERE id = ?1",
            params![task_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (project_id, label) = row.ok_or(StoreError::NotFound {
        entity: "task",
        id: task_id,
    })?;
    Ok((project_id, parse_category(&label)?))
}

/// Re-derive and persist a task's progress from its sub-tasks.
fn recompute_progress(conn: &Connection, task_id: Uuid) -> Result<u8, StoreError> {
    let (total, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM subtasks WHERE task_id = ?1",
        params![task_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let progress = derive_progress(completed as usize, total as usize);
    conn.execute(
        "UPDATE tasks SET progress = ?1, updated_at = ?2 WHERE id = ?3",
        params![progress, Utc::now(), task_id],
    )?;
    Ok(progress)
}

#[allow(clippy::too_many_arguments)]
fn insert_task_row(
    conn: &Connection,
    id: Uuid,
    project_id: Uuid,
    category: Category,
    name: &str,
    start: NaiveDate,
    end: NaiveDate,
    person: Option<Uuid>,
    order_index: Option<i64>,
) -> Result<(), StoreError> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO tasks (id, project_id, category, name, start_date, end_date, progress,
                            assigned_person_id, order_index, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?9)",
        params![id, project_id, category.label(), name, start, end, person, order_index, now],
    )?;
    Ok(())
}

fn insert_sub_task_row(
    conn: &Connection,
    id: Uuid,
    task_id: Uuid,
    name: &str,
    completed: bool,
    order_index: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO subtasks (id, task_id, name, completed, order_index, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![id, task_id, name, completed, order_index, Utc::now()],
    )?;
    Ok(())
}

fn load_people(conn: &Connection) -> Result<Vec<Person>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, color FROM people ORDER BY created_at, rowid",
    )?;
    let people = stmt
        .query_map([], |r| {
            let color: String = r.get(3)?;
            Ok(Person {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                display_color: PersonColor::from_key(&color),
            })
        })?
        .filter_map(|row| match row {
            Ok(person) => Some(person),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable person row");
                None
            }
        })
        .collect();
    Ok(people)
}

fn load_sub_tasks(conn: &Connection, task_id: Uuid) -> Result<Vec<SubTask>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, completed FROM subtasks WHERE task_id = ?1 ORDER BY order_index, rowid",
    )?;
    let subs = stmt
        .query_map(params![task_id], |r| {
            Ok(SubTask {
                id: r.get(0)?,
                name: r.get(1)?,
                completed: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subs)
}

struct TaskRow {
    id: Uuid,
    category: String,
    name: String,
    start: NaiveDate,
    end: NaiveDate,
    person: Option<Uuid>,
    order_index: Option<i64>,
}

const TASK_COLUMNS: &str =
    "id, category, name, start_date, end_date, assigned_person_id, order_index";

fn read_task_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: r.get(0)?,
        category: r.get(1)?,
        name: r.get(2)?,
        start: r.get(3)?,
        end: r.get(4)?,
        person: r.get(5)?,
        order_index: r.get(6)?,
    })
}

fn build_task(
    conn: &Connection,
    row: TaskRow,
    people: &HashMap<Uuid, Person>,
) -> Result<Task, StoreError> {
    let category = parse_category(&row.category)?;
    let sub_tasks = load_sub_tasks(conn, row.id)?;
    Ok(
        Task::new(row.name, row.start, row.end, category, TaskOrigin::Live)
            .with_id(row.id)
            .with_order_index(row.order_index)
            .with_assignee(row.person.and_then(|id| people.get(&id).cloned()))
            .with_sub_tasks(sub_tasks),
    )
}

fn people_by_id(conn: &Connection) -> Result<HashMap<Uuid, Person>, StoreError> {
    Ok(load_people(conn)?.into_iter().map(|p| (p.id, p)).collect())
}

fn load_task(conn: &Connection, id: Uuid) -> Result<Task, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            read_task_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound { entity: "task", id })?;
    build_task(conn, row, &people_by_id(conn)?)
}

impl LiveStore for SqliteStore {
    fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, open_date FROM projects ORDER BY created_at DESC, rowid DESC",
        )?;
        let projects = stmt
            .query_map([], |r| {
                Ok(Project {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    open_date: r.get(2)?,
                })
            })?
            .filter_map(|row| match row {
                Ok(project) => Some(project),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable project row");
                    None
                }
            })
            .collect();
        Ok(projects)
    }

    fn add_project(&self, name: &str) -> Result<Project, StoreError> {
        validate_name(name, "project")?;
        let project = Project::new(name.trim());
        let now = Utc::now();
        self.lock()?.execute(
            "INSERT INTO projects (id, name, open_date, created_at, updated_at)
             VALUES (?1, ?2, NULL, ?3, ?3)",
            params![project.id, project.name, now],
        )?;
        tracing::info!(project = %project.name, "project created");
        self.publish(Table::Projects, ChangeKind::Insert, project.id, None);
        Ok(project)
    }

    fn update_project(&self, id: Uuid, patch: ProjectPatch) -> Result<(), StoreError> {
        if let Some(name) = &patch.name {
            validate_name(name, "project")?;
        }
        {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            ensure_exists(&tx, "projects", "project", id)?;
            let now = Utc::now();
            if let Some(name) = &patch.name {
                tx.execute(
                    "UPDATE projects SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name.trim(), now, id],
                )?;
            }
            if let Some(open_date) = patch.open_date {
                tx.execute(
                    "UPDATE projects SET open_date = ?1, updated_at = ?2 WHERE id = ?3",
                    params![open_date, now, id],
                )?;
            }
            tx.commit()?;
        }
        self.publish(Table::Projects, ChangeKind::Update, id, None);
        Ok(())
    }

    fn delete_project(&self, id: Uuid) -> Result<(), StoreError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                entity: "project",
                id,
            });
        }
        tracing::info!(%id, "project deleted");
        self.publish(Table::Projects, ChangeKind::Delete, id, None);
        Ok(())
    }

    fn list_people(&self) -> Result<Vec<Person>, StoreError> {
        let conn = self.lock()?;
        load_people(&conn)
    }

    fn add_person(&self, first_name: &str, last_name: &str) -> Result<Person, StoreError> {
        validate_name(&format!("{first_name}{last_name}"), "person")?;
        let person = Person {
            id: Uuid::new_v4(),
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            display_color: PersonColor::default(),
        };
        let now = Utc::now();
        self.lock()?.execute(
            "INSERT INTO people (id, first_name, last_name, color, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                person.id,
                person.first_name,
                person.last_name,
                person.display_color.key(),
                now
            ],
        )?;
        self.publish(Table::People, ChangeKind::Insert, person.id, None);
        Ok(person)
    }

    fn update_person(
        &self,
        id: Uuid,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), StoreError> {
        validate_name(&format!("{first_name}{last_name}"), "person")?;
        let updated = self.lock()?.execute(
            "UPDATE people SET first_name = ?1, last_name = ?2, updated_at = ?3 WHERE id = ?4",
            params![first_name.trim(), last_name.trim(), Utc::now(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "person",
                id,
            });
        }
        self.publish(Table::People, ChangeKind::Update, id, None);
        Ok(())
    }

    fn delete_person(&self, id: Uuid) -> Result<(), StoreError> {
        let removed = self
            .lock()?
            .execute("DELETE FROM people WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                entity: "person",
                id,
            });
        }
        self.publish(Table::People, ChangeKind::Delete, id, None);
        Ok(())
    }

    fn list_tasks(&self, project_id: Uuid, category: Category) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        let people = people_by_id(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE project_id = ?1 AND category = ?2
             ORDER BY order_index IS NULL, order_index, created_at, rowid"
        ))?;
        let rows: Vec<rusqlite::Result<TaskRow>> = stmt
            .query_map(params![project_id, category.label()], read_task_row)?
            .collect();

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            match row.map_err(StoreError::from).and_then(|r| build_task(&conn, r, &people)) {
                Ok(task) => tasks.push(task),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable task row"),
            }
        }
        Ok(tasks)
    }

    fn add_task(
        &self,
        project_id: Uuid,
        category: Category,
        task: NewTask,
    ) -> Result<Task, StoreError> {
        validate_name(&task.name, "task")?;
        validate_schedule(task.start, task.end)?;

        let id = Uuid::new_v4();
        let created = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            ensure_exists(&tx, "projects", "project", project_id)?;
            if let Some(person) = task.assigned_person_id {
                ensure_exists(&tx, "people", "person", person)?;
            }
            let order_index = match task.order_index {
                Some(idx) => idx,
                None => {
                    let max: Option<i64> = tx.query_row(
                        "SELECT MAX(order_index) FROM tasks WHERE project_id = ?1 AND category = ?2",
                        params![project_id, category.label()],
                        |r| r.get(0),
                    )?;
                    max.unwrap_or(0).max(TEMPLATE_ORDER_CEILING) + 1
                }
            };
            insert_task_row(
                &tx,
                id,
                project_id,
                category,
                task.name.trim(),
                task.start,
                task.end,
                task.assigned_person_id,
                Some(order_index),
            )?;
            tx.commit()?;
            load_task(&conn, id)?
        };

        tracing::info!(task = %created.name, %category, order = ?created.order_index, "task added");
        self.publish(Table::Tasks, ChangeKind::Insert, id, Some((project_id, category)));
        Ok(created)
    }

    fn update_task(&self, id: Uuid, patch: TaskPatch) -> Result<(), StoreError> {
        if let Some(name) = &patch.name {
            validate_name(name, "task")?;
        }
        if let Some((start, end)) = patch.schedule {
            validate_schedule(start, end)?;
        }

        let scope = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let scope = task_scope(&tx, id)?;
            let now = Utc::now();
            if let Some(name) = &patch.name {
                tx.execute(
                    "UPDATE tasks SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name.trim(), now, id],
                )?;
            }
            if let Some(person) = patch.assigned_person {
                if let Some(person_id) = person {
                    ensure_exists(&tx, "people", "person", person_id)?;
                }
                tx.execute(
                    "UPDATE tasks SET assigned_person_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![person, now, id],
                )?;
            }
            if let Some((start, end)) = patch.schedule {
                tx.execute(
                    "UPDATE tasks SET start_date = ?1, end_date = ?2, updated_at = ?3 WHERE id = ?4",
                    params![start, end, now, id],
                )?;
            }
            if let Some(requested) = patch.progress {
                let derived = recompute_progress(&tx, id)?;
                if derived != requested {
                    tracing::debug!(%id, requested, derived, "ignoring requested progress");
                }
            }
            tx.commit()?;
            scope
        };

        self.publish(Table::Tasks, ChangeKind::Update, id, Some(scope));
        Ok(())
    }

    fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        let scope = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let scope = task_scope(&tx, id)?;
            tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            tx.commit()?;
            scope
        };
        tracing::info!(%id, "task deleted");
        self.publish(Table::Tasks, ChangeKind::Delete, id, Some(scope));
        Ok(())
    }

    fn add_sub_task(&self, task_id: Uuid, name: &str) -> Result<SubTask, StoreError> {
        validate_name(name, "sub-task")?;
        let sub = SubTask::new(name.trim());

        let scope = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let scope = task_scope(&tx, task_id)?;
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(order_index) + 1, 0) FROM subtasks WHERE task_id = ?1",
                params![task_id],
                |r| r.get(0),
            )?;
            insert_sub_task_row(&tx, sub.id, task_id, &sub.name, false, next)?;
            recompute_progress(&tx, task_id)?;
            tx.commit()?;
            scope
        };

        self.publish(Table::SubTasks, ChangeKind::Insert, sub.id, Some(scope));
        Ok(sub)
    }

    fn update_sub_task(&self, id: Uuid, patch: SubTaskPatch) -> Result<Option<u8>, StoreError> {
        if let Some(name) = &patch.name {
            validate_name(name, "sub-task")?;
        }

        let (scope, progress) = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let task_id: Uuid = tx
                .query_row(
                    "SELECT task_id FROM subtasks WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound {
                    entity: "sub-task",
                    id,
                })?;
            let scope = task_scope(&tx, task_id)?;
            let now = Utc::now();
            if let Some(name) = &patch.name {
                tx.execute(
                    "UPDATE subtasks SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name.trim(), now, id],
                )?;
            }
            let progress = match patch.completed {
                Some(completed) => {
                    tx.execute(
                        "UPDATE subtasks SET completed = ?1, updated_at = ?2 WHERE id = ?3",
                        params![completed, now, id],
                    )?;
                    Some(recompute_progress(&tx, task_id)?)
                }
                None => None,
            };
            tx.commit()?;
            (scope, progress)
        };

        self.publish(Table::SubTasks, ChangeKind::Update, id, Some(scope));
        Ok(progress)
    }

    fn delete_sub_task(&self, id: Uuid) -> Result<u8, StoreError> {
        let (scope, progress) = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let task_id: Uuid = tx
                .query_row(
                    "SELECT task_id FROM subtasks WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or(StoreError::NotFound {
                    entity: "sub-task",
                    id,
                })?;
            let scope = task_scope(&tx, task_id)?;
            tx.execute("DELETE FROM subtasks WHERE id = ?1", params![id])?;
            let progress = recompute_progress(&tx, task_id)?;
            tx.commit()?;
            (scope, progress)
        };

        self.publish(Table::SubTasks, ChangeKind::Delete, id, Some(scope));
        Ok(progress)
    }

    fn promote_task(
        &self,
        project_id: Uuid,
        template: &Task,
        edit: PromotionEdit,
    ) -> Result<Task, StoreError> {
        let name = template.name.trim();
        validate_name(name, "task")?;
        if let PromotionEdit::Reschedule(start, end) = edit {
            validate_schedule(start, end)?;
        }
        let category = template.category;

        let (task, kind) = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            ensure_exists(&tx, "projects", "project", project_id)?;

            // Another session may have promoted the same row already.
            let existing: Option<Uuid> = tx
                .query_row(
                    "SELECT id FROM tasks WHERE project_id = ?1 AND category = ?2 AND name = ?3
                     ORDER BY created_at, rowid LIMIT 1",
                    params![project_id, category.label(), name],
                    |r| r.get(0),
                )
                .optional()?;

            let (task_id, kind) = match existing {
                Some(id) => (id, ChangeKind::Update),
                None => {
                    let id = Uuid::new_v4();
                    insert_task_row(
                        &tx,
                        id,
                        project_id,
                        category,
                        name,
                        template.start,
                        template.end,
                        template.assigned_person.as_ref().map(|p| p.id),
                        template.order_index,
                    )?;
                    for (i, sub) in template.sub_tasks().iter().enumerate() {
                        insert_sub_task_row(&tx, Uuid::new_v4(), id, &sub.name, sub.completed, i as i64)?;
                    }
                    (id, ChangeKind::Insert)
                }
            };

            let now = Utc::now();
            match edit {
                PromotionEdit::AssignPerson(person) => {
                    if let Some(person_id) = person {
                        ensure_exists(&tx, "people", "person", person_id)?;
                    }
                    tx.execute(
                        "UPDATE tasks SET assigned_person_id = ?1, updated_at = ?2 WHERE id = ?3",
                        params![person, now, task_id],
                    )?;
                }
                PromotionEdit::ToggleSubTask(sub_id) => {
                    let sub_name = template
                        .sub_tasks()
                        .iter()
                        .find(|s| s.id == sub_id)
                        .map(|s| s.name.clone())
                        .ok_or(StoreError::NotFound {
                            entity: "sub-task",
                            id: sub_id,
                        })?;
                    let (live_id, completed): (Uuid, bool) = tx
                        .query_row(
                            "SELECT id, completed FROM subtasks WHERE task_id = ?1 AND name = ?2
                             ORDER BY order_index LIMIT 1",
                            params![task_id, sub_name],
                            |r| Ok((r.get(0)?, r.get(1)?)),
                        )
                        .optional()?
                        .ok_or(StoreError::NotFound {
                            entity: "sub-task",
                            id: sub_id,
                        })?;
                    tx.execute(
                        "UPDATE subtasks SET completed = ?1, updated_at = ?2 WHERE id = ?3",
                        params![!completed, now, live_id],
                    )?;
                }
                PromotionEdit::Reschedule(start, end) => {
                    tx.execute(
                        "UPDATE tasks SET start_date = ?1, end_date = ?2, updated_at = ?3 WHERE id = ?4",
                        params![start, end, now, task_id],
                    )?;
                }
            }
            recompute_progress(&tx, task_id)?;
            tx.commit()?;
            (load_task(&conn, task_id)?, kind)
        };

        tracing::info!(task = %task.name, %category, ?edit, "template task promoted");
        self.publish(Table::Tasks, kind, task.id, Some((project_id, category)));
        Ok(task)
    }

    fn subscribe(&self, subscription: Subscription) -> ChangeReceiver {
        self.notifier.subscribe(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn new_task(name: &str) -> NewTask {
        NewTask {
            name: name.to_string(),
            start: d(2024, 9, 1),
            end: d(2024, 9, 5),
            assigned_person_id: None,
            order_index: None,
        }
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    fn setup() -> (SqliteStore, Project) {
        let store = SqliteStore::open_in_memory().unwrap();
        let project = store.add_project("新宿店").unwrap();
        (store, project)
    }

    fn template_task(subs: &[(&str, bool)]) -> Task {
        Task::new(
            "契約手続き",
            d(2024, 9, 1),
            d(2024, 9, 5),
            Category::Communication,
            TaskOrigin::Template,
        )
        .with_order_index(Some(3))
        .with_sub_tasks(
            subs.iter()
                .map(|(name, done)| SubTask {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    completed: *done,
                })
                .collect(),
        )
    }

    #[test]
    fn projects_are_listed_newest_first_and_updated() {
        let (store, first) = setup();
        let second = store.add_project("渋谷店").unwrap();
        let names: Vec<_> = store.list_projects().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["渋谷店", "新宿店"]);

        store
            .update_project(
                first.id,
                ProjectPatch {
                    open_date: Some(Some(d(2024, 10, 1))),
                    ..Default::default()
                },
            )
            .unwrap();
        let reloaded = store.list_projects().unwrap();
        let first_row = reloaded.iter().find(|p| p.id == first.id).unwrap();
        assert_eq!(first_row.open_date, Some(d(2024, 10, 1)));
        assert_eq!(first_row.name, "新宿店");

        store
            .update_project(first.id, ProjectPatch { open_date: Some(None), ..Default::default() })
            .unwrap();
        assert_eq!(
            store.list_projects().unwrap().iter().find(|p| p.id == first.id).unwrap().open_date,
            None
        );

        assert!(matches!(
            store.update_project(Uuid::new_v4(), ProjectPatch::default()),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(store.add_project("  "), Err(StoreError::InvalidInput(_))));
        store.delete_project(second.id).unwrap();
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn deleting_project_cascades_to_tasks() {
        let (store, project) = setup();
        let task = store
            .add_task(project.id, Category::Network, new_task("回線手配"))
            .unwrap();
        store.add_sub_task(task.id, "申込").unwrap();

        store.delete_project(project.id).unwrap();
        assert_eq!(count(&store, "tasks"), 0);
        assert_eq!(count(&store, "subtasks"), 0);
    }

    #[test]
    fn added_tasks_sort_after_template_range() {
        let (store, project) = setup();
        let a = store.add_task(project.id, Category::Training, new_task("a")).unwrap();
        let b = store.add_task(project.id, Category::Training, new_task("b")).unwrap();
        assert_eq!(a.order_index, Some(TEMPLATE_ORDER_CEILING + 1));
        assert_eq!(b.order_index, Some(TEMPLATE_ORDER_CEILING + 2));
        assert_eq!(a.progress(), 0);
        assert_eq!(a.origin, TaskOrigin::Live);

        let other = store.add_task(project.id, Category::Other, new_task("c")).unwrap();
        assert_eq!(other.order_index, Some(TEMPLATE_ORDER_CEILING + 1));

        let explicit = store
            .add_task(
                project.id,
                Category::Training,
                NewTask {
                    order_index: Some(2),
                    ..new_task("promoted")
                },
            )
            .unwrap();
        assert_eq!(explicit.order_index, Some(2));

        let listed: Vec<_> = store
            .list_tasks(project.id, Category::Training)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(listed, vec!["promoted", "a", "b"]);
    }

    #[test]
    fn invalid_tasks_are_rejected_without_writes() {
        let (store, project) = setup();
        assert!(matches!(
            store.add_task(project.id, Category::Other, new_task(" ")),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.add_task(
                project.id,
                Category::Other,
                NewTask {
                    start: d(2024, 9, 6),
                    ..new_task("late")
                }
            ),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.add_task(Uuid::new_v4(), Category::Other, new_task("orphan")),
            Err(StoreError::NotFound { entity: "project", .. })
        ));
        assert!(matches!(
            store.add_task(
                project.id,
                Category::Other,
                NewTask {
                    assigned_person_id: Some(Uuid::new_v4()),
                    ..new_task("nobody")
                }
            ),
            Err(StoreError::NotFound { entity: "person", .. })
        ));
        assert_eq!(count(&store, "tasks"), 0);
    }

    #[test]
    fn update_task_fields_and_clear_assignment() {
        let (store, project) = setup();
        let person = store.add_person("太郎", "山田").unwrap();
        let task = store.add_task(project.id, Category::Recruitment, new_task("求人掲載")).unwrap();

        store
            .update_task(
                task.id,
                TaskPatch {
                    name: Some("求人広告掲載".into()),
                    assigned_person: Some(Some(person.id)),
                    schedule: Some((d(2024, 8, 20), d(2024, 8, 30))),
                    ..Default::default()
                },
            )
            .unwrap();
        let updated = &store.list_tasks(project.id, Category::Recruitment).unwrap()[0];
        assert_eq!(updated.name, "求人広告掲載");
        assert_eq!(updated.assigned_person.as_ref().map(|p| p.id), Some(person.id));
        assert_eq!((updated.start, updated.end), (d(2024, 8, 20), d(2024, 8, 30)));

        store
            .update_task(task.id, TaskPatch { assigned_person: Some(None), ..Default::default() })
            .unwrap();
        let cleared = &store.list_tasks(project.id, Category::Recruitment).unwrap()[0];
        assert!(cleared.assigned_person.is_none());

        let bad = store.update_task(
            task.id,
            TaskPatch {
                name: Some("never stored".into()),
                schedule: Some((d(2024, 9, 10), d(2024, 9, 1))),
                ..Default::default()
            },
        );
        assert!(matches!(bad, Err(StoreError::InvalidInput(_))));
        let unchanged = &store.list_tasks(project.id, Category::Recruitment).unwrap()[0];
        assert_eq!(unchanged.name, "求人広告掲載");

        assert!(matches!(
            store.update_task(Uuid::new_v4(), TaskPatch::default()),
            Err(StoreError::NotFound { entity: "task", .. })
        ));
    }

    #[test]
    fn requested_progress_is_replaced_by_derived_value() {
        let (store, project) = setup();
        let task = store.add_task(project.id, Category::Other, new_task("x")).unwrap();
        store.add_sub_task(task.id, "one").unwrap();
        store
            .update_task(task.id, TaskPatch { progress: Some(90), ..Default::default() })
            .unwrap();
        let stored: u8 = store
            .lock()
            .unwrap()
            .query_row("SELECT progress FROM tasks WHERE id = ?1", params![task.id], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[test]
    fn sub_task_completion_recomputes_parent_progress() {
        let (store, project) = setup();
        let task = store.add_task(project.id, Category::Marketing, new_task("チラシ")).unwrap();
        let subs: Vec<SubTask> = ["デザイン", "校正", "印刷", "配布"]
            .iter()
            .map(|n| store.add_sub_task(task.id, n).unwrap())
            .collect();

        for sub in &subs[..3] {
            store
                .update_sub_task(sub.id, SubTaskPatch { completed: Some(true), ..Default::default() })
                .unwrap();
        }
        let listed = &store.list_tasks(project.id, Category::Marketing).unwrap()[0];
        assert_eq!(listed.progress(), 75);
        assert_eq!(
            listed.sub_tasks().iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["デザイン", "校正", "印刷", "配布"]
        );

        let progress = store
            .update_sub_task(subs[3].id, SubTaskPatch { completed: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(progress, Some(100));

        let renamed = store
            .update_sub_task(subs[0].id, SubTaskPatch { name: Some("デザイン案".into()), ..Default::default() })
            .unwrap();
        assert_eq!(renamed, None);

        let progress = store.delete_sub_task(subs[3].id).unwrap();
        assert_eq!(progress, 100);
        store.add_sub_task(task.id, "追加").unwrap();
        let listed = &store.list_tasks(project.id, Category::Marketing).unwrap()[0];
        assert_eq!(listed.progress(), 75);
        assert_eq!(listed.sub_tasks().last().unwrap().name, "追加");
    }

    #[test]
    fn deleting_task_removes_sub_tasks() {
        let (store, project) = setup();
        let task = store.add_task(project.id, Category::Other, new_task("x")).unwrap();
        store.add_sub_task(task.id, "a").unwrap();
        store.add_sub_task(task.id, "b").unwrap();
        store.delete_task(task.id).unwrap();
        assert_eq!(count(&store, "subtasks"), 0);
        assert!(matches!(store.delete_task(task.id), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn deleting_person_unassigns_tasks() {
        let (store, project) = setup();
        let person = store.add_person("花子", "佐藤").unwrap();
        assert_eq!(person.display_color, PersonColor::Blue);
        store
            .add_task(
                project.id,
                Category::Other,
                NewTask {
                    assigned_person_id: Some(person.id),
                    ..new_task("x")
                },
            )
            .unwrap();
        store.update_person(person.id, "花子", "鈴木").unwrap();
        assert_eq!(store.list_people().unwrap()[0].last_name, "鈴木");

        store.delete_person(person.id).unwrap();
        assert!(store.list_people().unwrap().is_empty());
        let task = &store.list_tasks(project.id, Category::Other).unwrap()[0];
        assert!(task.assigned_person.is_none());
    }

    #[test]
    fn promotion_copies_template_and_applies_edit() {
        let (store, project) = setup();
        let person = store.add_person("太郎", "山田").unwrap();
        let template = template_task(&[("書類準備", false), ("押印", false)]);

        let live = store
            .promote_task(project.id, &template, PromotionEdit::AssignPerson(Some(person.id)))
            .unwrap();
        assert_eq!(live.origin, TaskOrigin::Live);
        assert_ne!(live.id, template.id);
        assert_eq!(live.order_index, Some(3));
        assert_eq!((live.start, live.end), (template.start, template.end));
        assert_eq!(live.sub_tasks().len(), 2);
        assert_eq!(live.assigned_person.as_ref().map(|p| p.id), Some(person.id));

        // A second promotion of the same row edits the existing live copy.
        let toggled = store
            .promote_task(
                project.id,
                &template,
                PromotionEdit::ToggleSubTask(template.sub_tasks()[1].id),
            )
            .unwrap();
        assert_eq!(toggled.id, live.id);
        assert_eq!(toggled.progress(), 50);
        assert_eq!(count(&store, "tasks"), 1);
    }

    #[test]
    fn promotion_by_toggle_and_reschedule() {
        let (store, project) = setup();
        let template = template_task(&[("a", false), ("b", false), ("c", false), ("d", true)]);

        let live = store
            .promote_task(
                project.id,
                &template,
                PromotionEdit::ToggleSubTask(template.sub_tasks()[0].id),
            )
            .unwrap();
        assert_eq!(live.progress(), 50);
        assert!(live.sub_tasks()[0].completed);
        assert!(live.sub_tasks()[3].completed);

        let (store, project) = setup();
        let moved = store
            .promote_task(
                project.id,
                &template,
                PromotionEdit::Reschedule(d(2024, 9, 3), d(2024, 9, 9)),
            )
            .unwrap();
        assert_eq!((moved.start, moved.end), (d(2024, 9, 3), d(2024, 9, 9)));
        assert_eq!(moved.progress(), 25);
    }

    #[test]
    fn failed_promotion_writes_nothing() {
        let (store, project) = setup();
        let template = template_task(&[("a", false)]);
        let result = store.promote_task(
            project.id,
            &template,
            PromotionEdit::ToggleSubTask(Uuid::new_v4()),
        );
        assert!(matches!(result, Err(StoreError::NotFound { entity: "sub-task", .. })));
        assert_eq!(count(&store, "tasks"), 0);
        assert_eq!(count(&store, "subtasks"), 0);
    }

    #[test]
    fn subscribers_hear_committed_changes_in_scope() {
        let (store, project) = setup();
        let rx = store.subscribe(Subscription::Tasks {
            project_id: project.id,
            category: Category::Communication,
        });
        let people_rx = store.subscribe(Subscription::People);

        let task = store
            .add_task(project.id, Category::Communication, new_task("x"))
            .unwrap();
        store.add_task(project.id, Category::Other, new_task("y")).unwrap();
        let sub = store.add_sub_task(task.id, "s").unwrap();
        let _ = store.add_task(project.id, Category::Communication, new_task(""));

        let events: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].table, events[0].kind, events[0].id), (Table::Tasks, ChangeKind::Insert, task.id));
        assert_eq!((events[1].table, events[1].id), (Table::SubTasks, sub.id));
        assert!(people_rx.try_recv().is_err());

        store.add_person("a", "b").unwrap();
        assert_eq!(people_rx.try_recv().unwrap().kind, ChangeKind::Insert);
    }
}
