//! Server state, response envelope, router and listener.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::{api, pages};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ActionError, ErrorCode};
use crate::notify::EmailSender;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppServer {
    db: Arc<Database>,
    config: Arc<Config>,
    mailer: Arc<dyn EmailSender>,
}

impl AppServer {
    pub fn new(db: Arc<Database>, config: Arc<Config>, mailer: Arc<dyn EmailSender>) -> Self {
        Self { db, config, mailer }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mailer(&self) -> &dyn EmailSender {
        self.mailer.as_ref()
    }

    /// Origin used in links sent by email.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Successful JSON action result, wrapped as `{ "ok": true, "data": ... }`.
pub struct ApiOk<T>(pub T);

#[derive(Serialize)]
struct OkBody<T> {
    ok: bool,
    data: T,
}

#[derive(Serialize)]
struct ErrBody<'a> {
    ok: bool,
    error: &'a ActionError,
}

impl<T: Serialize> IntoResponse for ApiOk<T> {
    fn into_response(self) -> Response {
        Json(OkBody {
            ok: true,
            data: self.0,
        })
        .into_response()
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if matches!(self.code, ErrorCode::DatabaseError | ErrorCode::InternalError) {
            error!(code = ?self.code, message = %self.message, "Request failed");
        }
        (
            status,
            Json(ErrBody {
                ok: false,
                error: &self,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<ApiOk<T>, ActionError>;

/// Run a synchronous store or bcrypt call on the blocking pool.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ActionError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(ActionError::internal)?
        .map_err(ActionError::from)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Escape text for HTML element and attribute content.
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn build_router(state: AppServer) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Pages and form posts
        .route("/", get(pages::home_page))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route("/signup", get(pages::signup_page).post(pages::signup_submit))
        .route("/logout", post(pages::logout_submit))
        .route("/forgot-password", post(pages::forgot_password_submit))
        .route(
            "/reset-password",
            get(pages::reset_password_page).post(pages::reset_password_submit),
        )
        .route("/tasks", get(pages::tasks_page).post(pages::task_create_submit))
        .route(
            "/tasks/{task_id}",
            get(pages::task_detail_page).post(pages::task_update_submit),
        )
        .route("/tasks/{task_id}/delete", post(pages::task_delete_submit))
        .route("/tasks/{task_id}/subtasks", post(pages::subtask_create_submit))
        .route(
            "/tasks/{task_id}/dependencies",
            post(pages::dependency_add_submit),
        )
        .route(
            "/tasks/{task_id}/dependencies/{edge_id}/delete",
            post(pages::dependency_remove_submit),
        )
        .route("/subtasks/{subtask_id}/toggle", post(pages::subtask_toggle_submit))
        // JSON API
        .route("/api/health", get(health))
        .route("/api/auth/signup", post(api::signup))
        .route("/api/auth/login", post(api::login))
        .route("/api/auth/logout", post(api::logout))
        .route("/api/auth/me", get(api::me))
        .route("/api/password-reset/request", post(api::request_password_reset))
        .route("/api/password-reset/confirm", post(api::confirm_password_reset))
        .route("/api/views", get(api::views))
        .route("/api/tasks", get(api::list_tasks).post(api::create_task))
        .route(
            "/api/tasks/{task_id}",
            get(api::get_task)
                .patch(api::update_task)
                .delete(api::delete_task),
        )
        .route("/api/tasks/{task_id}/status", post(api::set_task_status))
        .route("/api/tasks/{task_id}/can-complete", get(api::can_complete))
        .route(
            "/api/tasks/{task_id}/dependencies",
            get(api::list_dependencies).post(api::add_dependency),
        )
        .route(
            "/api/tasks/{task_id}/subtasks",
            get(api::list_subtasks).post(api::create_subtask),
        )
        .route(
            "/api/tasks/{task_id}/tags",
            get(api::list_task_tags).put(api::set_task_tags),
        )
        .route(
            "/api/tasks/{task_id}/tags/{tag_id}",
            post(api::attach_tag).delete(api::detach_tag),
        )
        .route(
            "/api/tasks/{task_id}/recurrence",
            get(api::get_recurrence)
                .put(api::set_recurrence)
                .delete(api::clear_recurrence),
        )
        .route(
            "/api/tasks/{task_id}/reminders",
            get(api::list_task_reminders).post(api::create_reminder),
        )
        .route("/api/dependencies", get(api::all_dependencies))
        .route(
            "/api/dependencies/{edge_id}",
            get(api::get_dependency).delete(api::remove_dependency),
        )
        .route(
            "/api/subtasks/{subtask_id}",
            get(api::get_subtask)
                .patch(api::rename_subtask)
                .delete(api::delete_subtask),
        )
        .route("/api/subtasks/{subtask_id}/toggle", post(api::toggle_subtask))
        .route("/api/projects", get(api::list_projects).post(api::create_project))
        .route(
            "/api/projects/{project_id}",
            get(api::get_project)
                .patch(api::update_project)
                .delete(api::delete_project),
        )
        .route("/api/tags", get(api::list_tags).post(api::create_tag))
        .route("/api/tags/{tag_id}", delete(api::delete_tag))
        .route("/api/reminders", get(api::pending_reminders))
        .route("/api/reminders/{reminder_id}", delete(api::delete_reminder))
        .route("/api/notifications/due", get(api::due_notifications))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind the listener and serve in a background task.
///
/// Returns a sender that stops the server gracefully, and the bound address.
pub async fn start_server(state: AppServer) -> anyhow::Result<(oneshot::Sender<()>, SocketAddr)> {
    let addr = format!("{}:{}", state.config().server.host, state.config().server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let bound_addr = listener.local_addr()?;
    info!("Planner listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("HTTP server shutting down");
            })
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    Ok((shutdown_tx, bound_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_blocking_keeps_action_error_codes() {
        let value = run_blocking(|| Ok(7)).await.unwrap();
        assert_eq!(value, 7);

        let err = run_blocking(|| -> anyhow::Result<()> {
            Err(ActionError::missing_field("title").into())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredField);
    }

    #[tokio::test]
    async fn run_blocking_reports_panics_as_internal() {
        let err = run_blocking(|| -> anyhow::Result<()> { panic!("worker died") })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn html_escape_covers_quotes() {
        assert_eq!(html_escape(r#"<a href="x">'&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }
}
