//! Accounts and sessions.
//!
//! Passwords are hashed with bcrypt. A successful login opens a session row and
//! hands out an HS256 JWT whose `jti` is the session id; the token travels in
//! the `planner_session` cookie. Verification checks the signature, the expiry
//! and that the session has not been revoked, so logging out takes effect
//! before the token itself expires.

use crate::config::AuthConfig;
use crate::db::{Database, now_ms};
use crate::error::ActionError;
use crate::notify::{EmailMessage, EmailSender};
use crate::types::{Session, User};
use anyhow::Result;
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "planner_session";

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 72;

/// JWT claims carried by the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    /// Session id.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid session token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("session has been revoked or has expired")]
    SessionRevoked,
    #[error("account no longer exists")]
    UnknownUser,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<AuthError> for ActionError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(e) => ActionError::from(e),
            _ => ActionError::unauthenticated(),
        }
    }
}

/// The caller behind a verified token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub session_id: String,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: Session,
    pub token: String,
}

pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    Ok(hash(password, cost)?)
}

/// Malformed hashes count as a mismatch.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    verify(password, password_hash).unwrap_or(false)
}

/// 3 to 32 characters: letters, digits, `_` and `-`.
pub fn validate_username(username: &str) -> Result<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ActionError::missing_field("username").into());
    }
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(ActionError::invalid_value("username", "Username must be 3 to 32 characters").into());
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ActionError::invalid_value(
            "username",
            "Username may only contain letters, digits, '_' and '-'",
        )
        .into());
    }
    Ok(username.to_string())
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(ActionError::missing_field("password").into());
    }
    // bcrypt ignores everything after 72 bytes.
    if password.len() < MIN_PASSWORD_LEN || password.len() > MAX_PASSWORD_LEN {
        return Err(ActionError::invalid_value(
            "password",
            format!("Password must be {MIN_PASSWORD_LEN} to {MAX_PASSWORD_LEN} characters"),
        )
        .into());
    }
    Ok(())
}

fn validate_email(email: Option<&str>) -> Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
            Ok(Some(email.to_string()))
        }
        _ => Err(ActionError::invalid_value("email", "Not a valid email address").into()),
    }
}

/// Sign a session token for `user`.
pub fn issue_token(config: &AuthConfig, user: &User, session: &Session) -> Result<String> {
    let claims = Claims {
        user_id: user.id.clone(),
        username: user.username.clone(),
        jti: session.id.clone(),
        iat: session.created_at / 1000,
        exp: session.expires_at / 1000,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;
    Ok(token)
}

/// Check signature and expiry. Does not consult the session table.
pub fn decode_token(config: &AuthConfig, token: &str) -> Result<Claims, AuthError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Register a new account.
pub fn signup(
    db: &Database,
    config: &AuthConfig,
    username: &str,
    email: Option<&str>,
    password: &str,
) -> Result<User> {
    let username = validate_username(username)?;
    validate_password(password)?;
    let email = validate_email(email)?;

    let password_hash = hash_password(password, config.bcrypt_cost)?;
    let user = db.create_user(&username, email.as_deref(), &password_hash)?;
    info!(user_id = %user.id, username = %user.username, "User signed up");
    Ok(user)
}

/// Check credentials and open a session.
///
/// Unknown users and wrong passwords fail identically.
pub fn login(
    db: &Database,
    config: &AuthConfig,
    username: &str,
    password: &str,
) -> Result<LoginOutcome> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ActionError::missing_field("username").into());
    }
    if password.is_empty() {
        return Err(ActionError::missing_field("password").into());
    }

    let Some((user, password_hash)) = db.get_user_credentials(username)? else {
        info!(username = %username, "Login failed: unknown user");
        return Err(ActionError::invalid_credentials().into());
    };
    if !verify_password(password, &password_hash) {
        info!(username = %username, "Login failed: wrong password");
        return Err(ActionError::invalid_credentials().into());
    }

    let expires_at = (Utc::now() + Duration::hours(config.token_ttl_hours)).timestamp_millis();
    let session = db.create_session(&user.id, expires_at)?;
    let token = issue_token(config, &user, &session)?;

    info!(user_id = %user.id, session_id = %session.id, "User logged in");
    Ok(LoginOutcome {
        user,
        session,
        token,
    })
}

/// Resolve a session token to its user.
pub fn authenticate(db: &Database, config: &AuthConfig, token: &str) -> Result<AuthUser, AuthError> {
    let claims = decode_token(config, token)?;

    let session = db.get_session(&claims.jti)?.ok_or(AuthError::SessionRevoked)?;
    if session.revoked_at.is_some()
        || session.expires_at <= now_ms()
        || session.user_id != claims.user_id
    {
        return Err(AuthError::SessionRevoked);
    }

    let user = db.get_user(&claims.user_id)?.ok_or(AuthError::UnknownUser)?;
    Ok(AuthUser {
        user,
        session_id: session.id,
    })
}

/// Revoke the session behind `token`. Invalid tokens are ignored.
pub fn logout(db: &Database, config: &AuthConfig, token: &str) -> Result<()> {
    match decode_token(config, token) {
        Ok(claims) => {
            db.revoke_session(&claims.jti)?;
            info!(user_id = %claims.user_id, session_id = %claims.jti, "User logged out");
        }
        Err(e) => warn!(error = %e, "Logout with unusable token"),
    }
    Ok(())
}

/// Email a one-time reset link to the account's address.
///
/// Succeeds silently for unknown users and users without an email, so the
/// answer does not reveal which accounts exist.
pub async fn request_password_reset(
    db: &Database,
    config: &AuthConfig,
    sender: &dyn EmailSender,
    username: &str,
    base_url: &str,
) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ActionError::missing_field("username").into());
    }

    let Some(user) = db.get_user_by_username(username)? else {
        info!(username = %username, "Password reset requested for unknown user");
        return Ok(());
    };
    let Some(email) = user.email.clone() else {
        warn!(user_id = %user.id, "Password reset requested but user has no email");
        return Ok(());
    };

    let token = uuid::Uuid::new_v4().simple().to_string();
    let expires_at =
        (Utc::now() + Duration::minutes(config.reset_token_ttl_minutes)).timestamp_millis();
    db.create_password_reset_token(&user.id, &token, expires_at)?;

    let message = EmailMessage {
        to: email,
        subject: "Reset your password".to_string(),
        body: format!(
            "Hi {},\n\nUse this link to choose a new password:\n{}/reset-password?token={}\n\nThe link expires in {} minutes.\n",
            user.username,
            base_url.trim_end_matches('/'),
            token,
            config.reset_token_ttl_minutes
        ),
    };
    sender.send(&message).await?;
    info!(user_id = %user.id, "Password reset link sent");
    Ok(())
}

/// Set a new password with a reset token and sign out every session.
pub fn reset_password(
    db: &Database,
    config: &AuthConfig,
    token: &str,
    new_password: &str,
) -> Result<()> {
    if token.trim().is_empty() {
        return Err(ActionError::missing_field("token").into());
    }
    validate_password(new_password)?;

    let user_id = db.consume_password_reset_token(token.trim())?;
    let password_hash = hash_password(new_password, config.bcrypt_cost)?;
    db.update_password_hash(&user_id, &password_hash)?;
    let revoked = db.revoke_user_sessions(&user_id)?;
    info!(user_id = %user_id, revoked_sessions = revoked, "Password reset");
    Ok(())
}
