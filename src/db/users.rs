//! Users, sessions and password reset tokens.

use super::{Database, new_id, now_ms};
use crate::error::ActionError;
use crate::types::{Session, User};
use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_session_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
        revoked_at: row.get("revoked_at")?,
    })
}

impl Database {
    /// Insert a user with an already-hashed password.
    pub fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<User> {
        let user = User {
            id: new_id(),
            username: username.to_string(),
            email: email.map(String::from),
            created_at: now_ms(),
        };

        self.with_conn(|conn| {
            let taken: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM users WHERE username = ?1 COLLATE NOCASE",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            if taken.is_some() {
                return Err(ActionError::already_exists("User", username)
                    .with_field("username")
                    .into());
            }

            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user.id, user.username, user.email, password_hash, user.created_at],
            )?;
            Ok(())
        })?;

        Ok(user)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT * FROM users WHERE id = ?1",
                    params![user_id],
                    parse_user_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT * FROM users WHERE username = ?1 COLLATE NOCASE",
                    params![username],
                    parse_user_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    /// Fetch a user together with the stored password hash, for login.
    pub fn get_user_credentials(&self, username: &str) -> Result<Option<(User, String)>> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT * FROM users WHERE username = ?1 COLLATE NOCASE",
                    params![username],
                    |row| Ok((parse_user_row(row)?, row.get::<_, String>("password_hash")?)),
                )
                .optional()?;
            Ok(found)
        })
    }

    pub fn update_password_hash(&self, user_id: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                params![password_hash, user_id],
            )?;
            if updated == 0 {
                return Err(ActionError::not_found("User", user_id).into());
            }
            Ok(())
        })
    }

    pub fn create_session(&self, user_id: &str, expires_at: i64) -> Result<Session> {
        let session = Session {
            id: new_id(),
            user_id: user_id.to_string(),
            created_at: now_ms(),
            expires_at,
            revoked_at: None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session.id, session.user_id, session.created_at, session.expires_at],
            )?;
            Ok(())
        })?;

        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            let session = conn
                .query_row(
                    "SELECT * FROM sessions WHERE id = ?1",
                    params![session_id],
                    parse_session_row,
                )
                .optional()?;
            Ok(session)
        })
    }

    /// Revoke a session. Revoking twice is a no-op.
    pub fn revoke_session(&self, session_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET revoked_at = ?1 WHERE id = ?2 AND revoked_at IS NULL",
                params![now_ms(), session_id],
            )?;
            Ok(())
        })
    }

    /// Revoke every open session of a user (after a password reset).
    pub fn revoke_user_sessions(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET revoked_at = ?1 WHERE user_id = ?2 AND revoked_at IS NULL",
                params![now_ms(), user_id],
            )?;
            Ok(n)
        })
    }

    /// Remove expired sessions and spent reset tokens.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let now = now_ms();
        self.with_conn(|conn| {
            let sessions = conn.execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                params![now],
            )?;
            let tokens = conn.execute(
                "DELETE FROM password_reset_tokens WHERE expires_at < ?1 OR used_at IS NOT NULL",
                params![now],
            )?;
            Ok(sessions + tokens)
        })
    }

    pub fn create_password_reset_token(
        &self,
        user_id: &str,
        token: &str,
        expires_at: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_reset_tokens (token, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, now_ms(), expires_at],
            )?;
            Ok(())
        })
    }

    /// Mark a reset token used and return its user.
    ///
    /// Unknown, expired and already used tokens all fail the same way.
    pub fn consume_password_reset_token(&self, token: &str) -> Result<String> {
        let now = now_ms();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user_id: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM password_reset_tokens
                     WHERE token = ?1 AND used_at IS NULL AND expires_at >= ?2",
                    params![token, now],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(user_id) = user_id else {
                return Err(ActionError::invalid_value(
                    "token",
                    "Reset link is invalid or has expired",
                )
                .into());
            };

            tx.execute(
                "UPDATE password_reset_tokens SET used_at = ?1 WHERE token = ?2",
                params![now, token],
            )?;
            tx.commit()?;
            Ok(user_id)
        })
    }
}
