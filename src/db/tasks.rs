//! Task CRUD, status transitions and search/filter queries.

use super::deps::blocking_tasks_internal;
use super::recurrence::spawn_next_occurrence;
use super::tags::{normalize_tag_names, replace_task_tags_internal};
use super::{Database, clean_opt, new_id, now_ms};
use crate::config::TasksConfig;
use crate::error::ActionError;
use crate::types::{NewTask, Priority, Task, TaskDetail, TaskFilter, TaskSort, TaskStatus, TaskUpdate};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use tracing::{debug, info};

/// Hard cap on rows returned by a single list query.
const MAX_LIST_LIMIT: u32 = 500;

/// SQL expression ranking priorities, higher is more important.
const PRIORITY_RANK: &str = "CASE t.priority WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END";

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;

    Ok(Task {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: status.parse().unwrap_or_default(),
        priority: priority.parse().unwrap_or_default(),
        due_date: row.get("due_date")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(
    conn: &Connection,
    user_id: &str,
    task_id: &str,
) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT * FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

/// Like `get_task_internal`, but a missing task is a `NotFound` error.
pub(crate) fn require_task(conn: &Connection, user_id: &str, task_id: &str) -> Result<Task> {
    get_task_internal(conn, user_id, task_id)?
        .ok_or_else(|| ActionError::not_found("Task", task_id).into())
}

fn ensure_project_owned(conn: &Connection, user_id: &str, project_id: &str) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM projects WHERE id = ?1 AND user_id = ?2",
            params![project_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(ActionError::not_found("Project", project_id)
            .with_field("project_id")
            .into());
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ActionError::missing_field("title").into());
    }
    if title.chars().count() > 500 {
        return Err(ActionError::invalid_value("title", "Title must be at most 500 characters").into());
    }
    Ok(title.to_string())
}

/// Refuse a transition to done while dependencies are open, if enforcement is on.
pub(crate) fn check_completion_allowed(
    conn: &Connection,
    task_id: &str,
    tasks_config: &TasksConfig,
) -> Result<()> {
    if !tasks_config.enforce_dependencies {
        return Ok(());
    }
    let blocking = blocking_tasks_internal(conn, task_id)?;
    if blocking.is_empty() {
        return Ok(());
    }
    let titles: Vec<String> = blocking.into_iter().map(|b| b.title).collect();
    Err(ActionError::deps_not_satisfied(&titles).into())
}

/// Mark a task done if it is not already.
///
/// Returns true when the status actually changed. A recurring task spawns its
/// next occurrence on the transition.
pub(crate) fn complete_task_internal(
    conn: &Connection,
    user_id: &str,
    task_id: &str,
    now: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET status = 'done', completed_at = ?1, updated_at = ?1
         WHERE id = ?2 AND user_id = ?3 AND status != 'done'",
        params![now, task_id, user_id],
    )?;
    if changed == 0 {
        return Ok(false);
    }

    let task = require_task(conn, user_id, task_id)?;
    if let Some(next_id) = spawn_next_occurrence(conn, &task)? {
        info!(task_id = %task_id, next_task_id = %next_id, "Spawned next occurrence");
    }
    Ok(true)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn order_clause(sort: TaskSort) -> String {
    match sort {
        TaskSort::DueDate => format!(
            "t.due_date IS NULL, t.due_date ASC, {} DESC, t.created_at ASC",
            PRIORITY_RANK
        ),
        TaskSort::Priority => format!(
            "{} DESC, t.due_date IS NULL, t.due_date ASC, t.created_at ASC",
            PRIORITY_RANK
        ),
        TaskSort::Created => "t.created_at DESC".to_string(),
        TaskSort::Updated => "t.updated_at DESC".to_string(),
    }
}

impl Database {
    /// Create a new task owned by `user_id`.
    pub fn create_task(&self, user_id: &str, input: NewTask) -> Result<Task> {
        self.create_task_with_tags(user_id, input, &[])
    }

    /// Create a task and attach the named tags, creating missing ones.
    ///
    /// Everything is validated before the first write and inserted in one
    /// transaction, so a bad tag name leaves no task behind.
    pub fn create_task_with_tags(
        &self,
        user_id: &str,
        input: NewTask,
        tag_names: &[String],
    ) -> Result<Task> {
        let title = validate_title(&input.title)?;
        let tags = normalize_tag_names(tag_names)?;
        let now = now_ms();
        let status = input.status.unwrap_or_default();

        let task = Task {
            id: new_id(),
            user_id: user_id.to_string(),
            project_id: clean_opt(input.project_id.as_deref()),
            title,
            description: clean_opt(input.description.as_deref()),
            status,
            priority: input.priority.unwrap_or_default(),
            due_date: input.due_date,
            completed_at: status.is_done().then_some(now),
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if let Some(project_id) = &task.project_id {
                ensure_project_owned(&tx, user_id, project_id)?;
            }

            tx.execute(
                "INSERT INTO tasks (id, user_id, project_id, title, description, status, priority,
                                    due_date, completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    task.id,
                    task.user_id,
                    task.project_id,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.due_date,
                    task.completed_at,
                    task.created_at,
                    task.updated_at,
                ],
            )?;
            if !tags.is_empty() {
                replace_task_tags_internal(&tx, user_id, &task.id, &tags)?;
            }
            tx.commit()?;
            Ok(())
        })?;

        info!(task_id = %task.id, user_id = %user_id, tags = tags.len(), "Task created");
        Ok(task)
    }

    /// Get a task by id, scoped to its owner.
    pub fn get_task(&self, user_id: &str, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, user_id, task_id))
    }

    /// Apply a partial update.
    ///
    /// Moving to done stamps `completed_at`; moving away from done clears it.
    pub fn update_task(
        &self,
        user_id: &str,
        task_id: &str,
        update: TaskUpdate,
        tasks_config: &TasksConfig,
    ) -> Result<Task> {
        let now = now_ms();

        let task = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current = require_task(&tx, user_id, task_id)?;

            let title = match &update.title {
                Some(t) => validate_title(t)?,
                None => current.title.clone(),
            };
            let description = match &update.description {
                Some(d) => clean_opt(d.as_deref()),
                None => current.description.clone(),
            };
            let project_id = match &update.project_id {
                Some(p) => clean_opt(p.as_deref()),
                None => current.project_id.clone(),
            };
            if let Some(project_id) = &project_id {
                if current.project_id.as_ref() != Some(project_id) {
                    ensure_project_owned(&tx, user_id, project_id)?;
                }
            }
            let due_date = match update.due_date {
                Some(d) => d,
                None => current.due_date,
            };
            let priority = update.priority.unwrap_or(current.priority);
            let status = update.status.unwrap_or(current.status);

            let becoming_done = status.is_done() && !current.status.is_done();
            if becoming_done {
                check_completion_allowed(&tx, task_id, tasks_config)?;
            }
            let completed_at = match (current.status.is_done(), status.is_done()) {
                (false, true) => Some(now),
                (true, false) => None,
                _ => current.completed_at,
            };

            tx.execute(
                "UPDATE tasks SET title = ?1, description = ?2, project_id = ?3, status = ?4,
                        priority = ?5, due_date = ?6, completed_at = ?7, updated_at = ?8
                 WHERE id = ?9 AND user_id = ?10",
                params![
                    title,
                    description,
                    project_id,
                    status.as_str(),
                    priority.as_str(),
                    due_date,
                    completed_at,
                    now,
                    task_id,
                    user_id,
                ],
            )?;

            let updated = require_task(&tx, user_id, task_id)?;
            if becoming_done {
                if let Some(next_id) = spawn_next_occurrence(&tx, &updated)? {
                    info!(task_id = %task_id, next_task_id = %next_id, "Spawned next occurrence");
                }
            }

            tx.commit()?;
            Ok(updated)
        })?;

        debug!(task_id = %task_id, status = %task.status, "Task updated");
        Ok(task)
    }

    /// Shorthand for a status-only update.
    pub fn set_task_status(
        &self,
        user_id: &str,
        task_id: &str,
        status: TaskStatus,
        tasks_config: &TasksConfig,
    ) -> Result<Task> {
        let update = TaskUpdate {
            status: Some(status),
            ..Default::default()
        };
        self.update_task(user_id, task_id, update, tasks_config)
    }

    /// Delete a task. Subtasks, tag links, dependency edges, recurrence and
    /// reminders go with it.
    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![task_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            Ok(())
        })?;

        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    /// List tasks matching a filter.
    pub fn list_tasks(&self, user_id: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = String::from("SELECT t.* FROM tasks t WHERE t.user_id = ?");
        let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_string())];

        if let Some(query) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", escape_like(query));
            sql.push_str(
                " AND (t.title LIKE ? ESCAPE '\\' OR COALESCE(t.description, '') LIKE ? ESCAPE '\\')",
            );
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern));
        }

        match filter.status {
            Some(status) => {
                sql.push_str(" AND t.status = ?");
                params_vec.push(Box::new(status.as_str()));
            }
            None if !filter.include_done => sql.push_str(" AND t.status != 'done'"),
            None => {}
        }

        if let Some(project_id) = &filter.project_id {
            sql.push_str(" AND t.project_id = ?");
            params_vec.push(Box::new(project_id.clone()));
        }

        if let Some(tag_id) = &filter.tag_id {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM task_tags tt WHERE tt.task_id = t.id AND tt.tag_id = ?)",
            );
            params_vec.push(Box::new(tag_id.clone()));
        }

        if let Some(priority) = filter.priority {
            sql.push_str(" AND t.priority = ?");
            params_vec.push(Box::new(priority.as_str()));
        }

        if let Some(before) = filter.due_before {
            sql.push_str(" AND t.due_date IS NOT NULL AND t.due_date <= ?");
            params_vec.push(Box::new(before));
        }

        if let Some(after) = filter.due_after {
            sql.push_str(" AND t.due_date IS NOT NULL AND t.due_date >= ?");
            params_vec.push(Box::new(after));
        }

        sql.push_str(" ORDER BY ");
        sql.push_str(&order_clause(filter.sort));

        let limit = filter.limit.unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT);
        sql.push_str(" LIMIT ?");
        params_vec.push(Box::new(limit));

        self.with_conn(|conn| {
            let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Every task with a due date, done or not, for the derived views.
    pub fn list_scheduled_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.* FROM tasks t
                 WHERE t.user_id = ?1 AND t.due_date IS NOT NULL
                 ORDER BY t.due_date ASC, t.created_at ASC",
            )?;
            let tasks = stmt
                .query_map(params![user_id], parse_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks)
        })
    }

    /// Load a task with every relation resolved into typed records.
    pub fn get_task_detail(&self, user_id: &str, task_id: &str) -> Result<Option<TaskDetail>> {
        let Some(task) = self.get_task(user_id, task_id)? else {
            return Ok(None);
        };

        let project = match &task.project_id {
            Some(project_id) => self.get_project(user_id, project_id)?,
            None => None,
        };
        let tags = self.list_task_tags(user_id, task_id)?;
        let subtasks = self.get_subtask_tree(user_id, task_id)?;
        let recurrence = self.get_recurrence(user_id, task_id)?;
        let reminders = self.list_task_reminders(user_id, task_id)?;
        let (depends_on, dependents) = self.list_dependencies(user_id, task_id)?;

        Ok(Some(TaskDetail {
            task,
            project,
            tags,
            subtasks,
            recurrence,
            reminders,
            depends_on,
            dependents,
        }))
    }
}
