//! Dependency edges, cycle detection and the completion gate.

use super::{Database, new_id, now_ms, task_owned_by};
use crate::error::ActionError;
use crate::types::{BlockingTask, CompletionGate, DependencyEdge};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashSet;
use tracing::{debug, info};

fn parse_edge_row(row: &Row) -> rusqlite::Result<DependencyEdge> {
    Ok(DependencyEdge {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        depends_on_task_id: row.get("depends_on_task_id")?,
        created_at: row.get("created_at")?,
    })
}

/// True if `target` is reachable from `start` by following depends-on edges.
///
/// Depth-first with a visited set. Nodes reached twice through different
/// paths are skipped, so diamonds and redundant edges are not cycles.
pub(crate) fn reaches(conn: &Connection, start: &str, target: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?1")?;

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = vec![start.to_string()];

    while let Some(current) = stack.pop() {
        if current == target {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }

        let next: Vec<String> = stmt
            .query_map(params![&current], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for dep in next {
            if !visited.contains(&dep) {
                stack.push(dep);
            }
        }
    }

    Ok(false)
}

/// Dependencies of `task_id` that are not done yet.
pub(crate) fn blocking_tasks_internal(conn: &Connection, task_id: &str) -> Result<Vec<BlockingTask>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, blocker.id, blocker.title, blocker.status
         FROM task_dependencies d
         INNER JOIN tasks blocker ON d.depends_on_task_id = blocker.id
         WHERE d.task_id = ?1 AND blocker.status != 'done'
         ORDER BY blocker.due_date IS NULL, blocker.due_date, blocker.created_at",
    )?;

    let blocking = stmt
        .query_map(params![task_id], |row| {
            let status: String = row.get(3)?;
            Ok(BlockingTask {
                edge_id: row.get(0)?,
                task_id: row.get(1)?,
                title: row.get(2)?,
                status: status.parse().unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(blocking)
}

impl Database {
    /// Make `task_id` depend on `depends_on_task_id`.
    ///
    /// Both tasks must belong to `user_id`. Fails with `DuplicateEdge` if the
    /// edge exists and with `CircularDependency` if `task_id` is already
    /// reachable from `depends_on_task_id`. The check and insert share one
    /// transaction, so a rejected edge leaves the graph untouched.
    pub fn add_dependency(
        &self,
        user_id: &str,
        task_id: &str,
        depends_on_task_id: &str,
    ) -> Result<DependencyEdge> {
        let edge = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !task_owned_by(&tx, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            if !task_owned_by(&tx, user_id, depends_on_task_id)? {
                return Err(ActionError::not_found("Task", depends_on_task_id).into());
            }
            if task_id == depends_on_task_id {
                return Err(ActionError::circular_dependency(task_id, depends_on_task_id).into());
            }

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM task_dependencies WHERE task_id = ?1 AND depends_on_task_id = ?2",
                    params![task_id, depends_on_task_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(ActionError::duplicate_edge(task_id, depends_on_task_id).into());
            }

            if reaches(&tx, depends_on_task_id, task_id)? {
                return Err(ActionError::circular_dependency(task_id, depends_on_task_id).into());
            }

            let edge = DependencyEdge {
                id: new_id(),
                task_id: task_id.to_string(),
                depends_on_task_id: depends_on_task_id.to_string(),
                created_at: now_ms(),
            };
            tx.execute(
                "INSERT INTO task_dependencies (id, task_id, depends_on_task_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![edge.id, edge.task_id, edge.depends_on_task_id, edge.created_at],
            )?;
            tx.commit()?;
            Ok(edge)
        })?;

        info!(
            task_id = %edge.task_id,
            depends_on = %edge.depends_on_task_id,
            "Dependency added"
        );
        Ok(edge)
    }

    /// Remove a dependency edge owned (through its task) by `user_id`.
    pub fn remove_dependency(&self, user_id: &str, edge_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM task_dependencies
                 WHERE id = ?1
                 AND task_id IN (SELECT id FROM tasks WHERE user_id = ?2)",
                params![edge_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ActionError::not_found("Dependency", edge_id).into());
            }
            Ok(())
        })?;

        info!(edge_id = %edge_id, "Dependency removed");
        Ok(())
    }

    pub fn get_dependency(&self, user_id: &str, edge_id: &str) -> Result<Option<DependencyEdge>> {
        self.with_conn(|conn| {
            let edge = conn
                .query_row(
                    "SELECT d.* FROM task_dependencies d
                     INNER JOIN tasks t ON d.task_id = t.id
                     WHERE d.id = ?1 AND t.user_id = ?2",
                    params![edge_id, user_id],
                    parse_edge_row,
                )
                .optional()?;
            Ok(edge)
        })
    }

    /// Edges around a task: (what it depends on, what depends on it).
    pub fn list_dependencies(
        &self,
        user_id: &str,
        task_id: &str,
    ) -> Result<(Vec<DependencyEdge>, Vec<DependencyEdge>)> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }

            let mut stmt = conn.prepare(
                "SELECT * FROM task_dependencies WHERE task_id = ?1 ORDER BY created_at",
            )?;
            let depends_on = stmt
                .query_map(params![task_id], parse_edge_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                "SELECT * FROM task_dependencies WHERE depends_on_task_id = ?1 ORDER BY created_at",
            )?;
            let dependents = stmt
                .query_map(params![task_id], parse_edge_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((depends_on, dependents))
        })
    }

    /// All edges between the user's tasks.
    pub fn get_all_dependencies(&self, user_id: &str) -> Result<Vec<DependencyEdge>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.* FROM task_dependencies d
                 INNER JOIN tasks t ON d.task_id = t.id
                 WHERE t.user_id = ?1
                 ORDER BY d.created_at",
            )?;
            let edges = stmt
                .query_map(params![user_id], parse_edge_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(edges)
        })
    }

    /// Whether every dependency of `task_id` is done, and which are not.
    ///
    /// Read-only; enforcement is a separate, configurable check.
    pub fn can_complete(&self, user_id: &str, task_id: &str) -> Result<CompletionGate> {
        let gate = self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            Ok(CompletionGate::from_blocking(blocking_tasks_internal(conn, task_id)?))
        })?;

        debug!(task_id = %task_id, blocking = gate.blocking.len(), "Completion gate evaluated");
        Ok(gate)
    }
}
