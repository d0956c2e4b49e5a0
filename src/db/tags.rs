//! Tags and the task/tag association.

use super::projects::validate_color;
use super::{Database, new_id, now_ms, task_owned_by};
use crate::error::ActionError;
use crate::types::Tag;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

fn parse_tag_row(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        created_at: row.get("created_at")?,
    })
}

fn tag_owned_by(conn: &Connection, user_id: &str, tag_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM tags WHERE id = ?1 AND user_id = ?2",
            params![tag_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn normalize_tag_name(name: &str) -> Result<String> {
    let name = name.trim().trim_start_matches('#').trim();
    if name.is_empty() {
        return Err(ActionError::missing_field("name").into());
    }
    if name.chars().count() > 50 {
        return Err(ActionError::invalid_value("name", "Tag names are at most 50 characters").into());
    }
    Ok(name.to_string())
}

/// Validate tag names and drop case-insensitive duplicates, keeping the first spelling.
pub(crate) fn normalize_tag_names(names: &[String]) -> Result<Vec<String>> {
    let mut wanted: Vec<String> = Vec::new();
    for name in names {
        let name = normalize_tag_name(name)?;
        if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&name)) {
            wanted.push(name);
        }
    }
    Ok(wanted)
}

/// Swap a task's tag links for `names` (already normalized), creating missing tags.
pub(crate) fn replace_task_tags_internal(
    conn: &Connection,
    user_id: &str,
    task_id: &str,
    names: &[String],
) -> Result<()> {
    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id])?;
    for name in names {
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM tags WHERE user_id = ?1 AND name = ?2 COLLATE NOCASE",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()?;
        let tag_id = match existing {
            Some(id) => id,
            None => {
                let id = new_id();
                conn.execute(
                    "INSERT INTO tags (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, user_id, name, now_ms()],
                )?;
                id
            }
        };
        conn.execute(
            "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
            params![task_id, tag_id],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn create_tag(&self, user_id: &str, name: &str, color: Option<&str>) -> Result<Tag> {
        let tag = Tag {
            id: new_id(),
            user_id: user_id.to_string(),
            name: normalize_tag_name(name)?,
            color: validate_color(color)?,
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM tags WHERE user_id = ?1 AND name = ?2 COLLATE NOCASE",
                    params![user_id, tag.name],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(ActionError::already_exists("Tag", &tag.name)
                    .with_field("name")
                    .into());
            }
            conn.execute(
                "INSERT INTO tags (id, user_id, name, color, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tag.id, tag.user_id, tag.name, tag.color, tag.created_at],
            )?;
            Ok(())
        })?;

        info!(tag_id = %tag.id, name = %tag.name, "Tag created");
        Ok(tag)
    }

    pub fn list_tags(&self, user_id: &str) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM tags WHERE user_id = ?1 ORDER BY name COLLATE NOCASE")?;
            let tags = stmt
                .query_map(params![user_id], parse_tag_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
    }

    pub fn delete_tag(&self, user_id: &str, tag_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM tags WHERE id = ?1 AND user_id = ?2",
                params![tag_id, user_id],
            )?;
            if deleted == 0 {
                return Err(ActionError::not_found("Tag", tag_id).into());
            }
            Ok(())
        })
    }

    /// Attach a tag to a task. Attaching twice is a no-op.
    pub fn add_tag_to_task(&self, user_id: &str, task_id: &str, tag_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            if !tag_owned_by(conn, user_id, tag_id)? {
                return Err(ActionError::not_found("Tag", tag_id).into());
            }
            conn.execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag_id) VALUES (?1, ?2)",
                params![task_id, tag_id],
            )?;
            Ok(())
        })
    }

    pub fn remove_tag_from_task(&self, user_id: &str, task_id: &str, tag_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            if !task_owned_by(conn, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            conn.execute(
                "DELETE FROM task_tags WHERE task_id = ?1 AND tag_id = ?2",
                params![task_id, tag_id],
            )?;
            Ok(())
        })
    }

    /// Replace a task's tags with the named ones, creating missing tags.
    pub fn set_task_tags_by_name(
        &self,
        user_id: &str,
        task_id: &str,
        names: &[String],
    ) -> Result<Vec<Tag>> {
        let wanted = normalize_tag_names(names)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if !task_owned_by(&tx, user_id, task_id)? {
                return Err(ActionError::not_found("Task", task_id).into());
            }
            replace_task_tags_internal(&tx, user_id, task_id, &wanted)?;
            tx.commit()?;
            Ok(())
        })?;

        self.list_task_tags(user_id, task_id)
    }

    pub fn list_task_tags(&self, user_id: &str, task_id: &str) -> Result<Vec<Tag>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tg.* FROM tags tg
                 INNER JOIN task_tags tt ON tt.tag_id = tg.id
                 INNER JOIN tasks t ON tt.task_id = t.id
                 WHERE tt.task_id = ?1 AND t.user_id = ?2
                 ORDER BY tg.name COLLATE NOCASE",
            )?;
            let tags = stmt
                .query_map(params![task_id, user_id], parse_tag_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tags)
        })
    }
}
