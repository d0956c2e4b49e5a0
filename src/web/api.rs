//! JSON action handlers under `/api`.
//!
//! Every handler answers with the `{ ok, data }` / `{ ok, error }` envelope.
//! Request bodies and query strings that fail to parse are reported as
//! `INVALID_FIELD_VALUE` instead of axum's plain-text rejections.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::server::{ApiOk, ApiResult, AppServer, run_blocking};
use super::session::{removal_cookie, session_cookie, session_token};
use crate::auth::{self, AuthUser};
use crate::db::now_ms;
use crate::error::ActionError;
use crate::recurrence::describe;
use crate::types::{
    CompletionGate, DependencyEdge, DueReminder, Frequency, NewTask, Project, Recurrence, Reminder,
    ReminderChannel, Subtask, SubtaskToggle, SubtaskTree, Tag, Task, TaskDetail, TaskFilter,
    TaskStatus, TaskUpdate, User,
};
use crate::views::{TaskGroups, group_tasks};

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ActionError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ActionError::invalid_value("body", rejection.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ActionError> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| ActionError::invalid_value("query", rejection.body_text()))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SignupRequest {
    username: String,
    #[serde(default)]
    email: Option<String>,
    password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

/// Create an account and log it in.
pub async fn signup(
    State(state): State<AppServer>,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(CookieJar, ApiOk<User>), ActionError> {
    let req = body(payload)?;
    let worker = state.clone();
    let outcome = run_blocking(move || {
        let auth_config = &worker.config().auth;
        auth::signup(worker.db(), auth_config, &req.username, req.email.as_deref(), &req.password)?;
        auth::login(worker.db(), auth_config, &req.username, &req.password)
    })
    .await?;
    let jar = jar.add(session_cookie(outcome.token, &state.config().auth));
    Ok((jar, ApiOk(outcome.user)))
}

pub async fn login(
    State(state): State<AppServer>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, ApiOk<User>), ActionError> {
    let req = body(payload)?;
    let worker = state.clone();
    let outcome = run_blocking(move || {
        auth::login(worker.db(), &worker.config().auth, &req.username, &req.password)
    })
    .await?;
    let jar = jar.add(session_cookie(outcome.token, &state.config().auth));
    Ok((jar, ApiOk(outcome.user)))
}

pub async fn logout(
    State(state): State<AppServer>,
    jar: CookieJar,
) -> Result<(CookieJar, ApiOk<bool>), ActionError> {
    if let Some(token) = session_token(&jar) {
        auth::logout(state.db(), &state.config().auth, &token)?;
    }
    Ok((jar.remove(removal_cookie()), ApiOk(true)))
}

pub async fn me(user: AuthUser) -> ApiResult<User> {
    Ok(ApiOk(user.user))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    username: String,
}

#[derive(Deserialize)]
pub struct ResetConfirm {
    token: String,
    password: String,
}

/// Always succeeds for well-formed input, whether or not the account exists.
pub async fn request_password_reset(
    State(state): State<AppServer>,
    payload: Result<Json<ResetRequest>, JsonRejection>,
) -> ApiResult<bool> {
    let req = body(payload)?;
    auth::request_password_reset(
        state.db(),
        &state.config().auth,
        state.mailer(),
        &req.username,
        &state.base_url(),
    )
    .await?;
    Ok(ApiOk(true))
}

pub async fn confirm_password_reset(
    State(state): State<AppServer>,
    payload: Result<Json<ResetConfirm>, JsonRejection>,
) -> ApiResult<bool> {
    let req = body(payload)?;
    run_blocking(move || {
        auth::reset_password(state.db(), &state.config().auth, &req.token, &req.password)
    })
    .await?;
    Ok(ApiOk(true))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    task: NewTask,
    /// Tag names; missing tags are created.
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    status: TaskStatus,
}

#[derive(Deserialize, Default)]
pub struct ViewQuery {
    /// Client UTC offset in minutes east of UTC. Server local time if absent.
    #[serde(default)]
    tz_offset: Option<i32>,
}

fn not_found(kind: &str, id: &str) -> ActionError {
    ActionError::not_found(kind, id)
}

pub async fn list_tasks(
    State(state): State<AppServer>,
    user: AuthUser,
    params: Result<Query<TaskFilter>, QueryRejection>,
) -> ApiResult<Vec<Task>> {
    let filter = query(params)?;
    Ok(ApiOk(state.db().list_tasks(&user.user.id, &filter)?))
}

pub async fn create_task(
    State(state): State<AppServer>,
    user: AuthUser,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<TaskDetail> {
    let req = body(payload)?;
    let db = state.db();
    let task = db.create_task_with_tags(&user.user.id, req.task, &req.tags)?;
    let detail = db
        .get_task_detail(&user.user.id, &task.id)?
        .ok_or_else(|| not_found("Task", &task.id))?;
    Ok(ApiOk(detail))
}

pub async fn get_task(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<TaskDetail> {
    let detail = state
        .db()
        .get_task_detail(&user.user.id, &task_id)?
        .ok_or_else(|| not_found("Task", &task_id))?;
    Ok(ApiOk(detail))
}

pub async fn update_task(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<TaskUpdate>, JsonRejection>,
) -> ApiResult<Task> {
    let update = body(payload)?;
    let task = state
        .db()
        .update_task(&user.user.id, &task_id, update, &state.config().tasks)?;
    Ok(ApiOk(task))
}

pub async fn delete_task(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<bool> {
    state.db().delete_task(&user.user.id, &task_id)?;
    Ok(ApiOk(true))
}

pub async fn set_task_status(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Task> {
    let req = body(payload)?;
    let task = state
        .db()
        .set_task_status(&user.user.id, &task_id, req.status, &state.config().tasks)?;
    Ok(ApiOk(task))
}

/// Today, upcoming and overdue in the caller's time zone.
pub async fn views(
    State(state): State<AppServer>,
    user: AuthUser,
    params: Result<Query<ViewQuery>, QueryRejection>,
) -> ApiResult<TaskGroups> {
    let params = query(params)?;
    let offset = match params.tz_offset {
        Some(minutes) => minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ActionError::invalid_value("tz_offset", "Offset out of range"))?,
        None => *Local::now().offset(),
    };
    let now = Utc::now().with_timezone(&offset);
    let tasks = state.db().list_scheduled_tasks(&user.user.id)?;
    Ok(ApiOk(group_tasks(&tasks, &now, state.config().tasks.upcoming_days)))
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DependencyRequest {
    depends_on_task_id: String,
}

#[derive(Serialize)]
pub struct DependencyLists {
    depends_on: Vec<DependencyEdge>,
    dependents: Vec<DependencyEdge>,
}

pub async fn add_dependency(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<DependencyRequest>, JsonRejection>,
) -> ApiResult<DependencyEdge> {
    let req = body(payload)?;
    let edge = state
        .db()
        .add_dependency(&user.user.id, &task_id, &req.depends_on_task_id)?;
    Ok(ApiOk(edge))
}

pub async fn list_dependencies(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<DependencyLists> {
    let (depends_on, dependents) = state.db().list_dependencies(&user.user.id, &task_id)?;
    Ok(ApiOk(DependencyLists {
        depends_on,
        dependents,
    }))
}

pub async fn all_dependencies(
    State(state): State<AppServer>,
    user: AuthUser,
) -> ApiResult<Vec<DependencyEdge>> {
    Ok(ApiOk(state.db().get_all_dependencies(&user.user.id)?))
}

pub async fn get_dependency(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(edge_id): Path<String>,
) -> ApiResult<DependencyEdge> {
    let edge = state
        .db()
        .get_dependency(&user.user.id, &edge_id)?
        .ok_or_else(|| not_found("Dependency", &edge_id))?;
    Ok(ApiOk(edge))
}

pub async fn remove_dependency(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(edge_id): Path<String>,
) -> ApiResult<bool> {
    state.db().remove_dependency(&user.user.id, &edge_id)?;
    Ok(ApiOk(true))
}

pub async fn can_complete(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<CompletionGate> {
    Ok(ApiOk(state.db().can_complete(&user.user.id, &task_id)?))
}

// ---------------------------------------------------------------------------
// Subtasks
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SubtaskRequest {
    title: String,
    #[serde(default)]
    parent_subtask_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    title: String,
}

pub async fn list_subtasks(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Vec<SubtaskTree>> {
    Ok(ApiOk(state.db().get_subtask_tree(&user.user.id, &task_id)?))
}

pub async fn create_subtask(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<SubtaskRequest>, JsonRejection>,
) -> ApiResult<Subtask> {
    let req = body(payload)?;
    let subtask = state.db().create_subtask(
        &user.user.id,
        &task_id,
        &req.title,
        req.parent_subtask_id.as_deref(),
    )?;
    Ok(ApiOk(subtask))
}

pub async fn get_subtask(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(subtask_id): Path<String>,
) -> ApiResult<Subtask> {
    let subtask = state
        .db()
        .get_subtask(&user.user.id, &subtask_id)?
        .ok_or_else(|| not_found("Subtask", &subtask_id))?;
    Ok(ApiOk(subtask))
}

pub async fn rename_subtask(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(subtask_id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Subtask> {
    let req = body(payload)?;
    Ok(ApiOk(state.db().rename_subtask(&user.user.id, &subtask_id, &req.title)?))
}

pub async fn delete_subtask(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(subtask_id): Path<String>,
) -> ApiResult<bool> {
    state.db().delete_subtask(&user.user.id, &subtask_id)?;
    Ok(ApiOk(true))
}

pub async fn toggle_subtask(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(subtask_id): Path<String>,
) -> ApiResult<SubtaskToggle> {
    let toggle = state
        .db()
        .toggle_subtask(&user.user.id, &subtask_id, &state.config().tasks)?;
    Ok(ApiOk(toggle))
}

// ---------------------------------------------------------------------------
// Projects and tags
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ProjectRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Deserialize)]
pub struct ProjectPatch {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Deserialize)]
pub struct TagRequest {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Deserialize)]
pub struct TagNames {
    names: Vec<String>,
}

pub async fn list_projects(
    State(state): State<AppServer>,
    user: AuthUser,
) -> ApiResult<Vec<Project>> {
    Ok(ApiOk(state.db().list_projects(&user.user.id)?))
}

pub async fn create_project(
    State(state): State<AppServer>,
    user: AuthUser,
    payload: Result<Json<ProjectRequest>, JsonRejection>,
) -> ApiResult<Project> {
    let req = body(payload)?;
    let project = state.db().create_project(
        &user.user.id,
        &req.name,
        req.description.as_deref(),
        req.color.as_deref(),
    )?;
    Ok(ApiOk(project))
}

pub async fn get_project(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Project> {
    let project = state
        .db()
        .get_project(&user.user.id, &project_id)?
        .ok_or_else(|| not_found("Project", &project_id))?;
    Ok(ApiOk(project))
}

pub async fn update_project(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(project_id): Path<String>,
    payload: Result<Json<ProjectPatch>, JsonRejection>,
) -> ApiResult<Project> {
    let req = body(payload)?;
    let project = state.db().update_project(
        &user.user.id,
        &project_id,
        req.name.as_deref(),
        req.description.as_deref(),
        req.color.as_deref(),
    )?;
    Ok(ApiOk(project))
}

pub async fn delete_project(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<bool> {
    state.db().delete_project(&user.user.id, &project_id)?;
    Ok(ApiOk(true))
}

pub async fn list_tags(State(state): State<AppServer>, user: AuthUser) -> ApiResult<Vec<Tag>> {
    Ok(ApiOk(state.db().list_tags(&user.user.id)?))
}

pub async fn create_tag(
    State(state): State<AppServer>,
    user: AuthUser,
    payload: Result<Json<TagRequest>, JsonRejection>,
) -> ApiResult<Tag> {
    let req = body(payload)?;
    Ok(ApiOk(state.db().create_tag(&user.user.id, &req.name, req.color.as_deref())?))
}

pub async fn delete_tag(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(tag_id): Path<String>,
) -> ApiResult<bool> {
    state.db().delete_tag(&user.user.id, &tag_id)?;
    Ok(ApiOk(true))
}

pub async fn list_task_tags(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Vec<Tag>> {
    Ok(ApiOk(state.db().list_task_tags(&user.user.id, &task_id)?))
}

/// Replace the task's tags with the named ones.
pub async fn set_task_tags(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<TagNames>, JsonRejection>,
) -> ApiResult<Vec<Tag>> {
    let req = body(payload)?;
    Ok(ApiOk(state.db().set_task_tags_by_name(&user.user.id, &task_id, &req.names)?))
}

pub async fn attach_tag(
    State(state): State<AppServer>,
    user: AuthUser,
    Path((task_id, tag_id)): Path<(String, String)>,
) -> ApiResult<Vec<Tag>> {
    let db = state.db();
    db.add_tag_to_task(&user.user.id, &task_id, &tag_id)?;
    Ok(ApiOk(db.list_task_tags(&user.user.id, &task_id)?))
}

pub async fn detach_tag(
    State(state): State<AppServer>,
    user: AuthUser,
    Path((task_id, tag_id)): Path<(String, String)>,
) -> ApiResult<Vec<Tag>> {
    let db = state.db();
    db.remove_tag_from_task(&user.user.id, &task_id, &tag_id)?;
    Ok(ApiOk(db.list_task_tags(&user.user.id, &task_id)?))
}

// ---------------------------------------------------------------------------
// Recurrence and reminders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecurrenceRequest {
    frequency: Frequency,
    #[serde(default = "one")]
    interval: u32,
    #[serde(default)]
    days_of_week: Vec<u8>,
    #[serde(default)]
    end_date: Option<i64>,
}

fn one() -> u32 {
    1
}

/// A rule with its human-readable description.
#[derive(Serialize)]
pub struct RecurrenceView {
    #[serde(flatten)]
    rule: Recurrence,
    description: String,
}

impl From<Recurrence> for RecurrenceView {
    fn from(rule: Recurrence) -> Self {
        let description = describe(&rule);
        Self { rule, description }
    }
}

#[derive(Deserialize)]
pub struct ReminderRequest {
    remind_at: i64,
    #[serde(default)]
    channel: ReminderChannel,
}

pub async fn get_recurrence(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Option<RecurrenceView>> {
    let rule = state.db().get_recurrence(&user.user.id, &task_id)?;
    Ok(ApiOk(rule.map(RecurrenceView::from)))
}

pub async fn set_recurrence(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<RecurrenceRequest>, JsonRejection>,
) -> ApiResult<RecurrenceView> {
    let req = body(payload)?;
    let rule = Recurrence {
        task_id,
        frequency: req.frequency,
        interval: req.interval,
        days_of_week: req.days_of_week,
        end_date: req.end_date,
    };
    let rule = state.db().set_recurrence(&user.user.id, rule)?;
    info!(task_id = %rule.task_id, rule = %describe(&rule), "Recurrence set");
    Ok(ApiOk(rule.into()))
}

pub async fn clear_recurrence(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<bool> {
    state.db().clear_recurrence(&user.user.id, &task_id)?;
    Ok(ApiOk(true))
}

pub async fn list_task_reminders(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> ApiResult<Vec<Reminder>> {
    Ok(ApiOk(state.db().list_task_reminders(&user.user.id, &task_id)?))
}

pub async fn create_reminder(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(task_id): Path<String>,
    payload: Result<Json<ReminderRequest>, JsonRejection>,
) -> ApiResult<Reminder> {
    let req = body(payload)?;
    let reminder = state
        .db()
        .create_reminder(&user.user.id, &task_id, req.remind_at, req.channel)?;
    Ok(ApiOk(reminder))
}

pub async fn pending_reminders(
    State(state): State<AppServer>,
    user: AuthUser,
) -> ApiResult<Vec<Reminder>> {
    Ok(ApiOk(state.db().list_pending_reminders(&user.user.id)?))
}

pub async fn delete_reminder(
    State(state): State<AppServer>,
    user: AuthUser,
    Path(reminder_id): Path<String>,
) -> ApiResult<bool> {
    state.db().delete_reminder(&user.user.id, &reminder_id)?;
    Ok(ApiOk(true))
}

/// Browser reminders that are due. Each one is returned by exactly one poll.
pub async fn due_notifications(
    State(state): State<AppServer>,
    user: AuthUser,
) -> ApiResult<Vec<DueReminder>> {
    Ok(ApiOk(state.db().take_due_notifications(&user.user.id, now_ms())?))
}
