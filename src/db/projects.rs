//! Project CRUD.

use super::{Database, clean_opt, new_id, now_ms};
use crate::error::ActionError;
use crate::types::Project;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

fn parse_project_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ActionError::missing_field("name").into());
    }
    if name.chars().count() > 100 {
        return Err(ActionError::invalid_value("name", "Name must be at most 100 characters").into());
    }
    Ok(name.to_string())
}

/// Accepts `#rgb` or `#rrggbb`.
pub(crate) fn validate_color(color: Option<&str>) -> Result<Option<String>> {
    let Some(color) = clean_opt(color) else {
        return Ok(None);
    };
    let hex = color.strip_prefix('#').unwrap_or("");
    let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(ActionError::invalid_value("color", "Color must look like #rgb or #rrggbb").into());
    }
    Ok(Some(color.to_lowercase()))
}

fn name_taken(
    conn: &Connection,
    user_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT id FROM projects WHERE user_id = ?1 AND name = ?2 COLLATE NOCASE",
            params![user_id, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(found, Some(id) if Some(id.as_str()) != except_id))
}

impl Database {
    pub fn create_project(
        &self,
        user_id: &str,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Project> {
        let now = now_ms();
        let project = Project {
            id: new_id(),
            user_id: user_id.to_string(),
            name: validate_name(name)?,
            description: clean_opt(description),
            color: validate_color(color)?,
            created_at: now,
            updated_at: now,
        };

        self.with_conn(|conn| {
            if name_taken(conn, user_id, &project.name, None)? {
                return Err(ActionError::already_exists("Project", &project.name)
                    .with_field("name")
                    .into());
            }
            conn.execute(
                "INSERT INTO projects (id, user_id, name, description, color, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project.id,
                    project.user_id,
                    project.name,
                    project.description,
                    project.color,
                    project.created_at,
                    project.updated_at,
                ],
            )?;
            Ok(())
        })?;

        info!(project_id = %project.id, "Project created");
        Ok(project)
    }

    pub fn get_project(&self, user_id: &str, project_id: &str) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            let project = conn
                .query_row(
                    "SELECT * FROM projects WHERE id = ?1 AND user_id = ?2",
                    params![project_id, user_id],
                    parse_project_row,
                )
                .optional()?;
            Ok(project)
        })
    }

    pub fn list_projects(&self, user_id: &str) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM projects WHERE user_id = ?1 ORDER BY name COLLATE NOCASE",
            )?;
            let projects = stmt
                .query_map(params![user_id], parse_project_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
    }

    /// Update name, description and color. `None` leaves a field unchanged;
    /// a blank description or color clears it.
    pub fn update_project(
        &self,
        user_id: &str,
        project_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<Project> {
        let current = self
            .get_project(user_id, project_id)?
            .ok_or_else(|| ActionError::not_found("Project", project_id))?;

        let name = match name {
            Some(n) => validate_name(n)?,
            None => current.name,
        };
        let description = match description {
            Some(d) => clean_opt(Some(d)),
            None => current.description,
        };
        let color = match color {
            Some(c) => validate_color(Some(c))?,
            None => current.color,
        };
        let now = now_ms();

        self.with_conn(|conn| {
            if name_taken(conn, user_id, &name, Some(project_id))? {
                return Err(ActionError::already_exists("Project", &name)
                    .with_field("name")
                    .into());
            }
            conn.execute(
                "UPDATE projects SET name = ?1, description = ?2, color = ?3, updated_at = ?4
                 WHERE id = ?5 AND user_id = ?6",
                params![name, description, color, now, project_id, user_id],
            )?;
            Ok(())
        })?;

        Ok(Project {
            name,
            description,
            color,
            updated_at: now,
            ..current
        })
    }

    /// Delete a project. Its tasks stay, detached from any project.
    pub fn delete_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
                params![project_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ActionError::not_found("Project", project_id).into());
            }
            Ok(())
        })?;

        info!(project_id = %project_id, "Project deleted");
        Ok(())
    }
}
