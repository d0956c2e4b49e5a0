//! Subtasks and the subtask completion cascade.

use super::tasks::{check_completion_allowed, complete_task_internal};
use super::{Database, new_id, now_ms, task_owned_by};
use crate::config::TasksConfig;
use crate::error::{ActionError, ErrorCode, error_code};
use crate::types::{Subtask, SubtaskToggle, SubtaskTree};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;
use tracing::{debug, info, warn};

fn parse_subtask_row(row: &Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        parent_subtask_id: row.get("parent_subtask_id")?,
        title: row.get("title")?,
        completed: row.get::<_, i64>("completed")? != 0,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Get a subtask whose task belongs to `user_id`.
fn get_subtask_internal(
    conn: &Connection,
    user_id: &str,
    subtask_id: &str,
) -> Result<Option<Subtask>> {
    let subtask = conn
        .query_row(
            "SELECT s.* FROM subtasks s
             INNER JOIN tasks t ON s.task_id = t.id
             WHERE s.id = ?1 AND t.user_id = ?2",
            params![subtask_id, user_id],
            parse_subtask_row,
        )
        .optional()?;
    Ok(subtask)
}

fn require_subtask(conn: &Connection, user_id: &str, subtask_id: &str) -> Result<Subtask> {
    get_subtask_internal(conn, user_id, subtask_id)?
        .ok_or_else(|| ActionError::not_found("Subtask", subtask_id).into())
}

fn validate_subtask_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ActionError::missing_field("title").into());
    }
    Ok(title.to_string())
}

/// Arrange a flat list into trees, keeping `position` order among siblings.
pub fn build_subtask_tree(subtasks: Vec<Subtask>) -> Vec<SubtaskTree> {
    let mut by_parent: HashMap<Option<String>, Vec<Subtask>> = HashMap::new();
    for subtask in subtasks {
        by_parent
            .entry(subtask.parent_subtask_id.clone())
            .or_default()
            .push(subtask);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| a.position.cmp(&b.position).then(a.created_at.cmp(&b.created_at)));
    }

    fn attach(
        parent: Option<String>,
        by_parent: &mut HashMap<Option<String>, Vec<Subtask>>,
    ) -> Vec<SubtaskTree> {
        let children = by_parent.remove(&parent).unwrap_or_default();
        children
            .into_iter()
            .map(|subtask| {
                let nested = attach(Some(subtask.id.clone()), by_parent);
                SubtaskTree {
                    subtask,
                    children: nested,
                }
            })
            .collect()
    }

    attach(None, &mut by_parent)
}

impl Database {
    /// Add a subtask to a task, optionally nested under another subtask of the
    /// same task.
    pub fn create_subtask(
        &self,
        user_id: &str,
        task_id: &str,
        title: &str,
        parent_subtask_id: Option<&str>,
    ) -> Result<Subtask> {
        let title = validate_subtask_title(title)?;
        let now = now_ms();

        let subtask = self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            if let Some(parent_id) = parent_subtask_id {
                let parent = require_subtask(conn, user_id, parent_id)?;
                if parent.task_id != task_id {
                    return Err(ActionError::invalid_value(
                        "parent_subtask_id",
                        "Parent subtask belongs to a different task",
                    )
                    .into());
                }
            }

            let position: i32 = conn.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM subtasks
                 WHERE task_id = ?1 AND parent_subtask_id IS ?2",
                params![task_id, parent_subtask_id],
                |row| row.get(0),
            )?;

            let subtask = Subtask {
                id: new_id(),
                task_id: task_id.to_string(),
                parent_subtask_id: parent_subtask_id.map(String::from),
                title,
                completed: false,
                position,
                created_at: now,
                updated_at: now,
            };
            conn.execute(
                "INSERT INTO subtasks (id, task_id, parent_subtask_id, title, completed, position,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
                params![
                    subtask.id,
                    subtask.task_id,
                    subtask.parent_subtask_id,
                    subtask.title,
                    subtask.position,
                    subtask.created_at,
                    subtask.updated_at,
                ],
            )?;
            Ok(subtask)
        })?;

        debug!(subtask_id = %subtask.id, task_id = %task_id, "Subtask created");
        Ok(subtask)
    }

    pub fn get_subtask(&self, user_id: &str, subtask_id: &str) -> Result<Option<Subtask>> {
        self.with_conn(|conn| get_subtask_internal(conn, user_id, subtask_id))
    }

    pub fn rename_subtask(&self, user_id: &str, subtask_id: &str, title: &str) -> Result<Subtask> {
        let title = validate_subtask_title(title)?;
        self.with_conn(|conn| {
            require_subtask(conn, user_id, subtask_id)?;
            conn.execute(
                "UPDATE subtasks SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now_ms(), subtask_id],
            )?;
            require_subtask(conn, user_id, subtask_id)
        })
    }

    /// Delete a subtask together with its nested children.
    pub fn delete_subtask(&self, user_id: &str, subtask_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            require_subtask(conn, user_id, subtask_id)?;
            conn.execute("DELETE FROM subtasks WHERE id = ?1", params![subtask_id])?;
            Ok(())
        })
    }

    /// Every subtask of a task, flat, in creation order.
    pub fn list_subtasks(&self, user_id: &str, task_id: &str) -> Result<Vec<Subtask>> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            let mut stmt = conn.prepare(
                "SELECT * FROM subtasks WHERE task_id = ?1 ORDER BY created_at, position",
            )?;
            let subtasks = stmt
                .query_map(params![task_id], parse_subtask_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(subtasks)
        })
    }

    pub fn get_subtask_tree(&self, user_id: &str, task_id: &str) -> Result<Vec<SubtaskTree>> {
        Ok(build_subtask_tree(self.list_subtasks(user_id, task_id)?))
    }

    /// Flip a subtask's completion flag.
    ///
    /// When the flip completes the last open subtask of the task (at any
    /// nesting depth), the task moves to done. That follow-up runs after the
    /// toggle is stored: if it fails, the failure is logged and the toggle
    /// stands. Unchecking never reopens the task.
    pub fn toggle_subtask(
        &self,
        user_id: &str,
        subtask_id: &str,
        tasks_config: &TasksConfig,
    ) -> Result<SubtaskToggle> {
        let subtask = self.with_conn(|conn| {
            let current = require_subtask(conn, user_id, subtask_id)?;
            conn.execute(
                "UPDATE subtasks SET completed = ?1, updated_at = ?2 WHERE id = ?3",
                params![!current.completed, now_ms(), subtask_id],
            )?;
            require_subtask(conn, user_id, subtask_id)
        })?;

        let mut task_completed = false;
        if subtask.completed {
            match self.cascade_task_completion(user_id, &subtask.task_id, tasks_config) {
                Ok(changed) => task_completed = changed,
                Err(e) => warn!(
                    task_id = %subtask.task_id,
                    subtask_id = %subtask_id,
                    error = %e,
                    "Failed to auto-complete task after subtask completion"
                ),
            }
        }

        Ok(SubtaskToggle {
            subtask,
            task_completed,
        })
    }

    /// Complete the task if all of its subtasks are complete.
    fn cascade_task_completion(
        &self,
        user_id: &str,
        task_id: &str,
        tasks_config: &TasksConfig,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let open: i64 = tx.query_row(
                "SELECT COUNT(*) FROM subtasks WHERE task_id = ?1 AND completed = 0",
                params![task_id],
                |row| row.get(0),
            )?;
            if open > 0 {
                return Ok(false);
            }

            if let Err(e) = check_completion_allowed(&tx, task_id, tasks_config) {
                if error_code(&e) != Some(ErrorCode::DependencyNotSatisfied) {
                    return Err(e);
                }
                info!(task_id = %task_id, reason = %e, "All subtasks done but task is blocked");
                return Ok(false);
            }

            let changed = complete_task_internal(&tx, user_id, task_id, now_ms())?;
            tx.commit()?;
            if changed {
                info!(task_id = %task_id, "Task auto-completed from subtasks");
            }
            Ok(changed)
        })
    }
}
