//! Server-rendered pages and their form handlers.
//!
//! Form posts always answer with a redirect. The outcome travels in a `msg`
//! query parameter; messages starting with `error:` render as errors.

use axum::{
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use super::server::{AppServer, html_escape, run_blocking};
use super::session::{PageUser, removal_cookie, session_cookie, session_token};
use super::templates;
use crate::auth;
use crate::error::ActionError;
use crate::recurrence::describe;
use crate::types::{
    DependencyEdge, NewTask, Priority, SubtaskTree, Task, TaskFilter, TaskSort, TaskStatus, TaskUpdate, User,
};
use crate::views::group_tasks;

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct FlashQuery {
    #[serde(default)]
    msg: Option<String>,
}

fn flash_html(msg: Option<&str>) -> String {
    match msg.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) => match m.strip_prefix("error:") {
            Some(err) => format!(
                r#"<div class="message message-error">{}</div>"#,
                html_escape(err.trim())
            ),
            None => format!(r#"<div class="message message-success">{}</div>"#, html_escape(m)),
        },
        None => String::new(),
    }
}

fn nav_html(user: Option<&User>) -> String {
    match user {
        Some(user) => format!(
            r#"<nav><a href="/">Today</a><a href="/tasks">Tasks</a></nav>
    <span>{}</span>
    <form method="post" action="/logout" class="inline"><button type="submit" class="link">Log out</button></form>"#,
            html_escape(&user.username)
        ),
        None => r#"<nav><a href="/login">Log in</a><a href="/signup">Sign up</a></nav>"#.to_string(),
    }
}

fn render(title: &str, user: Option<&User>, msg: Option<&str>, content: &str) -> Html<String> {
    let scripts = if user.is_some() {
        templates::NOTIFY_SCRIPT
    } else {
        ""
    };
    Html(templates::fill(
        templates::BASE_TEMPLATE,
        &[
            ("title", html_escape(title).as_str()),
            ("nav", nav_html(user).as_str()),
            ("flash", flash_html(msg).as_str()),
            ("scripts", scripts),
            ("content", content),
        ],
    ))
}

fn redirect_with(path: &str, msg: &str) -> Redirect {
    let sep = if path.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{}{}msg={}", path, sep, urlencoding::encode(msg)))
}

fn redirect_error(path: &str, err: impl Into<ActionError>) -> Redirect {
    let err = err.into();
    redirect_with(path, &format!("error:{}", err.message))
}

fn format_due(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|d| d.format("%a %b %-d, %H:%M").to_string())
        .unwrap_or_default()
}

fn datetime_input(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .single()
        .map(|d| d.format("%Y-%m-%dT%H:%M").to_string())
        .unwrap_or_default()
}

/// Parse a `datetime-local` (or plain date) form value as local time.
/// A date without a time means the end of that day.
fn parse_datetime_input(value: Option<&str>) -> Result<Option<i64>, ActionError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let invalid = || ActionError::invalid_value("due_date", format!("Unrecognised date '{}'", value));

    let naive = match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        Ok(dt) => dt,
        Err(_) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|_| invalid())?
            .and_hms_opt(23, 59, 0)
            .ok_or_else(invalid)?,
    };
    let local = Local.from_local_datetime(&naive).earliest().ok_or_else(invalid)?;
    Ok(Some(local.timestamp_millis()))
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "To do",
        TaskStatus::InProgress => "In progress",
        TaskStatus::Done => "Done",
    }
}

fn select_options(choices: &[(&str, &str)], selected: &str) -> String {
    choices
        .iter()
        .map(|(value, label)| {
            format!(
                r#"<option value="{}"{}>{}</option>"#,
                html_escape(value),
                if *value == selected { " selected" } else { "" },
                html_escape(label)
            )
        })
        .collect()
}

const STATUS_CHOICES: [(&str, &str); 3] = [
    ("todo", "To do"),
    ("in_progress", "In progress"),
    ("done", "Done"),
];

const PRIORITY_CHOICES: [(&str, &str); 3] = [("high", "High"), ("medium", "Medium"), ("low", "Low")];

fn task_items(tasks: &[Task], empty: &str) -> String {
    if tasks.is_empty() {
        return format!(r#"<p class="empty-state">{}</p>"#, html_escape(empty));
    }
    let mut html = String::from(r#"<ul class="task-list">"#);
    for task in tasks {
        html.push_str(&format!(
            r#"<li class="{}"><a href="/tasks/{}">{}</a> <span class="badge badge-{}">{}</span><span class="due">{}</span></li>"#,
            if task.status.is_done() { "done" } else { "" },
            html_escape(&task.id),
            html_escape(&task.title),
            task.priority,
            task.priority,
            task.due_date.map(format_due).unwrap_or_default()
        ));
    }
    html.push_str("</ul>");
    html
}

/// Split a comma separated tag field.
fn tag_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Account pages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotForm {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetQuery {
    #[serde(default)]
    token: String,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetForm {
    #[serde(default)]
    token: String,
    #[serde(default)]
    password: String,
}

pub async fn login_page(Query(q): Query<FlashQuery>) -> Html<String> {
    render("Log in", None, q.msg.as_deref(), templates::LOGIN_TEMPLATE)
}

pub async fn signup_page(Query(q): Query<FlashQuery>) -> Html<String> {
    render("Sign up", None, q.msg.as_deref(), templates::SIGNUP_TEMPLATE)
}

pub async fn login_submit(
    State(state): State<AppServer>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let worker = state.clone();
    let result = run_blocking(move || {
        auth::login(worker.db(), &worker.config().auth, &form.username, &form.password)
    })
    .await;
    match result {
        Ok(outcome) => (
            jar.add(session_cookie(outcome.token, &state.config().auth)),
            Redirect::to("/"),
        )
            .into_response(),
        Err(e) => redirect_error("/login", e).into_response(),
    }
}

pub async fn signup_submit(
    State(state): State<AppServer>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Response {
    let worker = state.clone();
    let result = run_blocking(move || {
        let auth_config = &worker.config().auth;
        auth::signup(
            worker.db(),
            auth_config,
            &form.username,
            form.email.as_deref(),
            &form.password,
        )?;
        auth::login(worker.db(), auth_config, &form.username, &form.password)
    })
    .await;

    match result {
        Ok(outcome) => (
            jar.add(session_cookie(outcome.token, &state.config().auth)),
            redirect_with("/", "Welcome! Add your first task below."),
        )
            .into_response(),
        Err(e) => redirect_error("/signup", e).into_response(),
    }
}

pub async fn logout_submit(State(state): State<AppServer>, jar: CookieJar) -> Response {
    if let Some(token) = session_token(&jar) {
        if let Err(e) = auth::logout(state.db(), &state.config().auth, &token) {
            warn!(error = %e, "Failed to revoke session on logout");
        }
    }
    (jar.remove(removal_cookie()), redirect_with("/login", "Logged out")).into_response()
}

pub async fn forgot_password_submit(
    State(state): State<AppServer>,
    Form(form): Form<ForgotForm>,
) -> Redirect {
    match auth::request_password_reset(
        state.db(),
        &state.config().auth,
        state.mailer(),
        &form.username,
        &state.base_url(),
    )
    .await
    {
        Ok(()) => redirect_with(
            "/login",
            "If that account has an email address, a reset link is on its way.",
        ),
        Err(e) => redirect_error("/login", e),
    }
}

pub async fn reset_password_page(Query(q): Query<ResetQuery>) -> Html<String> {
    let content = templates::fill(
        templates::RESET_PASSWORD_TEMPLATE,
        &[("token", html_escape(&q.token).as_str())],
    );
    render("Reset password", None, q.msg.as_deref(), &content)
}

pub async fn reset_password_submit(
    State(state): State<AppServer>,
    Form(form): Form<ResetForm>,
) -> Redirect {
    let back = format!("/reset-password?token={}", urlencoding::encode(&form.token));
    let result = run_blocking(move || {
        auth::reset_password(state.db(), &state.config().auth, &form.token, &form.password)
    })
    .await;
    match result {
        Ok(()) => redirect_with("/login", "Password updated. Log in with your new password."),
        Err(e) => redirect_error(&back, e),
    }
}

// ---------------------------------------------------------------------------
// Home
// ---------------------------------------------------------------------------

pub async fn home_page(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Query(q): Query<FlashQuery>,
) -> Html<String> {
    let mut msg = q.msg;
    let tasks = match state.db().list_scheduled_tasks(&user.user.id) {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(error = %e, "Failed to load scheduled tasks");
            msg = Some("error:Could not load your tasks".to_string());
            Vec::new()
        }
    };
    let groups = group_tasks(&tasks, &Local::now(), state.config().tasks.upcoming_days);

    let content = templates::fill(
        templates::HOME_TEMPLATE,
        &[
            ("overdue_count", groups.overdue.len().to_string().as_str()),
            ("today_count", groups.today.len().to_string().as_str()),
            ("upcoming_count", groups.upcoming.len().to_string().as_str()),
            ("overdue", task_items(&groups.overdue, "Nothing overdue.").as_str()),
            ("today", task_items(&groups.today, "Nothing due today.").as_str()),
            ("upcoming", task_items(&groups.upcoming, "Nothing coming up.").as_str()),
        ],
    );

    render("Today", Some(&user.user), msg.as_deref(), &content)
}

// ---------------------------------------------------------------------------
// Task list and search
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: Option<String>,
    /// Empty means open tasks, `all` includes done ones.
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    tag_id: Option<String>,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl SearchQuery {
    /// Unknown values are ignored rather than rejected.
    fn to_filter(&self) -> TaskFilter {
        let status = non_empty(self.status.as_deref());
        TaskFilter {
            query: non_empty(self.q.as_deref()).map(String::from),
            status: status.and_then(|s| s.parse().ok()),
            include_done: status == Some("all"),
            priority: non_empty(self.priority.as_deref()).and_then(|p| p.parse().ok()),
            project_id: non_empty(self.project_id.as_deref()).map(String::from),
            tag_id: non_empty(self.tag_id.as_deref()).map(String::from),
            sort: non_empty(self.sort.as_deref())
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            ..Default::default()
        }
    }
}

fn sort_value(sort: TaskSort) -> &'static str {
    match sort {
        TaskSort::DueDate => "due_date",
        TaskSort::Priority => "priority",
        TaskSort::Created => "created",
        TaskSort::Updated => "updated",
    }
}

pub async fn tasks_page(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Query(q): Query<SearchQuery>,
) -> Html<String> {
    let db = state.db();
    let user_id = &user.user.id;
    let filter = q.to_filter();
    let mut msg = q.msg.clone();

    let tasks = db.list_tasks(user_id, &filter).unwrap_or_else(|e| {
        warn!(error = %e, "Task search failed");
        msg = Some(format!("error:{}", ActionError::from(e).message));
        Vec::new()
    });
    let projects = db.list_projects(user_id).unwrap_or_default();
    let tags = db.list_tags(user_id).unwrap_or_default();
    let project_names: HashMap<&str, &str> = projects
        .iter()
        .map(|p| (p.id.as_str(), p.name.as_str()))
        .collect();

    let results = if tasks.is_empty() {
        r#"<p class="empty-state">No matching tasks.</p>"#.to_string()
    } else {
        let mut html = String::from(
            "<table><thead><tr><th>Task</th><th>Status</th><th>Priority</th><th>Due</th><th>Project</th></tr></thead><tbody>",
        );
        for task in &tasks {
            html.push_str(&format!(
                r#"<tr><td><a href="/tasks/{}">{}</a></td><td><span class="badge badge-{}">{}</span></td><td>{}</td><td>{}</td><td>{}</td></tr>"#,
                html_escape(&task.id),
                html_escape(&task.title),
                task.status,
                status_label(task.status),
                task.priority,
                task.due_date.map(format_due).unwrap_or_else(|| "-".to_string()),
                task.project_id
                    .as_deref()
                    .and_then(|id| project_names.get(id))
                    .map(|name| html_escape(name))
                    .unwrap_or_else(|| "-".to_string()),
            ));
        }
        html.push_str("</tbody></table>");
        html
    };

    let status_selected = non_empty(q.status.as_deref()).unwrap_or("");
    let mut status_choices = vec![("", "Open"), ("all", "All")];
    status_choices.extend(STATUS_CHOICES);
    let mut priority_choices = vec![("", "Any")];
    priority_choices.extend(PRIORITY_CHOICES);

    let mut project_choices: Vec<(&str, &str)> = vec![("", "Any")];
    project_choices.extend(projects.iter().map(|p| (p.id.as_str(), p.name.as_str())));
    let mut new_project_choices: Vec<(&str, &str)> = vec![("", "None")];
    new_project_choices.extend(projects.iter().map(|p| (p.id.as_str(), p.name.as_str())));
    let mut tag_choices: Vec<(&str, &str)> = vec![("", "Any")];
    tag_choices.extend(tags.iter().map(|t| (t.id.as_str(), t.name.as_str())));

    let sort_choices = [
        ("due_date", "Due date"),
        ("priority", "Priority"),
        ("created", "Newest"),
        ("updated", "Recently updated"),
    ];

    let query_value = html_escape(q.q.as_deref().unwrap_or(""));
    let status_options = select_options(&status_choices, status_selected);
    let priority_options =
        select_options(&priority_choices, non_empty(q.priority.as_deref()).unwrap_or(""));
    let project_options =
        select_options(&project_choices, filter.project_id.as_deref().unwrap_or(""));
    let tag_options = select_options(&tag_choices, filter.tag_id.as_deref().unwrap_or(""));
    let sort_options = select_options(&sort_choices, sort_value(filter.sort));
    let new_project_options = select_options(&new_project_choices, "");
    let count = tasks.len().to_string();

    let content = templates::fill(
        templates::TASKS_TEMPLATE,
        &[
            ("query", query_value.as_str()),
            ("status_options", status_options.as_str()),
            ("priority_options", priority_options.as_str()),
            ("project_options", project_options.as_str()),
            ("tag_options", tag_options.as_str()),
            ("sort_options", sort_options.as_str()),
            ("new_project_options", new_project_options.as_str()),
            ("count", count.as_str()),
            ("results", results.as_str()),
        ],
    );

    render("Tasks", Some(&user.user), msg.as_deref(), &content)
}

// ---------------------------------------------------------------------------
// Task create / update / delete
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TaskForm {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    due_date: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    /// Comma separated names. Absent leaves tags alone.
    #[serde(default)]
    tags: Option<String>,
}

fn parse_choice<T: std::str::FromStr<Err = String>>(
    field: &str,
    value: Option<&str>,
) -> Result<Option<T>, ActionError> {
    non_empty(value)
        .map(|v| v.parse::<T>().map_err(|e| ActionError::invalid_value(field, e)))
        .transpose()
}

impl TaskForm {
    fn to_new_task(&self) -> Result<NewTask, ActionError> {
        Ok(NewTask {
            title: self.title.clone(),
            description: non_empty(self.description.as_deref()).map(String::from),
            project_id: non_empty(self.project_id.as_deref()).map(String::from),
            status: parse_choice::<TaskStatus>("status", self.status.as_deref())?,
            priority: parse_choice::<Priority>("priority", self.priority.as_deref())?,
            due_date: parse_datetime_input(self.due_date.as_deref())?,
        })
    }

    /// The edit form submits every field, so empty values clear them.
    fn to_update(&self) -> Result<TaskUpdate, ActionError> {
        Ok(TaskUpdate {
            title: Some(self.title.clone()),
            description: Some(non_empty(self.description.as_deref()).map(String::from)),
            project_id: Some(non_empty(self.project_id.as_deref()).map(String::from)),
            status: parse_choice::<TaskStatus>("status", self.status.as_deref())?,
            priority: parse_choice::<Priority>("priority", self.priority.as_deref())?,
            due_date: Some(parse_datetime_input(self.due_date.as_deref())?),
        })
    }
}

pub async fn task_create_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Form(form): Form<TaskForm>,
) -> Redirect {
    let db = state.db();
    let user_id = &user.user.id;

    let new_task = match form.to_new_task() {
        Ok(t) => t,
        Err(e) => return redirect_error("/tasks", e),
    };
    let names = form.tags.as_deref().map(tag_names).unwrap_or_default();
    match db.create_task_with_tags(user_id, new_task, &names) {
        Ok(task) => redirect_with(&format!("/tasks/{}", task.id), "Task created"),
        Err(e) => redirect_error("/tasks", e),
    }
}

pub async fn task_update_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(task_id): Path<String>,
    Form(form): Form<TaskForm>,
) -> Redirect {
    let db = state.db();
    let user_id = &user.user.id;
    let path = format!("/tasks/{}", task_id);

    let update = match form.to_update() {
        Ok(u) => u,
        Err(e) => return redirect_error(&path, e),
    };
    if let Err(e) = db.update_task(user_id, &task_id, update, &state.config().tasks) {
        return redirect_error(&path, e);
    }
    if let Some(raw) = form.tags.as_deref() {
        if let Err(e) = db.set_task_tags_by_name(user_id, &task_id, &tag_names(raw)) {
            return redirect_error(&path, e);
        }
    }
    redirect_with(&path, "Task saved")
}

pub async fn task_delete_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(task_id): Path<String>,
) -> Redirect {
    match state.db().delete_task(&user.user.id, &task_id) {
        Ok(()) => redirect_with("/tasks", "Task deleted"),
        Err(e) => redirect_error(&format!("/tasks/{}", task_id), e),
    }
}

// ---------------------------------------------------------------------------
// Task detail
// ---------------------------------------------------------------------------

fn subtask_tree_html(nodes: &[SubtaskTree]) -> String {
    if nodes.is_empty() {
        return String::new();
    }
    let mut html = String::from("<ul>");
    for node in nodes {
        let s = &node.subtask;
        html.push_str(&format!(
            r#"<li class="{}"><form method="post" action="/subtasks/{}/toggle" class="inline"><button type="submit" class="link" title="Toggle">{}</button></form> {}{}</li>"#,
            if s.completed { "done" } else { "" },
            html_escape(&s.id),
            if s.completed { "&#9745;" } else { "&#9744;" },
            html_escape(&s.title),
            subtask_tree_html(&node.children)
        ));
    }
    html.push_str("</ul>");
    html
}

fn parent_choices(nodes: &[SubtaskTree], depth: usize, out: &mut Vec<(String, String)>) {
    for node in nodes {
        out.push((
            node.subtask.id.clone(),
            format!("{}{}", "- ".repeat(depth), node.subtask.title),
        ));
        parent_choices(&node.children, depth + 1, out);
    }
}

/// Edges shown from `task_id`'s side: the other end of each edge, linked.
fn edge_list_html(
    task_id: &str,
    edges: &[DependencyEdge],
    titles: &HashMap<&str, &str>,
    outgoing: bool,
) -> String {
    if edges.is_empty() {
        return r#"<p class="empty-state">None</p>"#.to_string();
    }
    let mut html = String::from(r#"<ul class="task-list">"#);
    for edge in edges {
        let other = if outgoing {
            edge.depends_on_task_id.as_str()
        } else {
            edge.task_id.as_str()
        };
        html.push_str(&format!(
            r#"<li><a href="/tasks/{}">{}</a> <form method="post" action="/tasks/{}/dependencies/{}/delete" class="inline"><button type="submit" class="link">remove</button></form></li>"#,
            html_escape(other),
            html_escape(titles.get(other).copied().unwrap_or(other)),
            html_escape(task_id),
            html_escape(&edge.id),
        ));
    }
    html.push_str("</ul>");
    html
}

fn not_found_page(user: &User, task_id: &str) -> Response {
    let content = format!(
        r#"<div class="card"><h1>Task not found</h1><p>No task with id '{}'.</p><a href="/tasks">Back to tasks</a></div>"#,
        html_escape(task_id)
    );
    (StatusCode::NOT_FOUND, render("Not found", Some(user), None, &content)).into_response()
}

pub async fn task_detail_page(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(task_id): Path<String>,
    Query(q): Query<FlashQuery>,
) -> Response {
    let db = state.db();
    let user_id = &user.user.id;

    let detail = match db.get_task_detail(user_id, &task_id) {
        Ok(Some(d)) => d,
        Ok(None) => return not_found_page(&user.user, &task_id),
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Failed to load task");
            let content = r#"<div class="card"><h1>Error</h1><p>Failed to load task.</p><a href="/tasks">Back to tasks</a></div>"#;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                render("Error", Some(&user.user), None, content),
            )
                .into_response();
        }
    };
    let task = &detail.task;

    // Titles for dependency edges and the "add dependency" picker.
    let all_tasks = db
        .list_tasks(
            user_id,
            &TaskFilter {
                include_done: true,
                limit: Some(500),
                ..Default::default()
            },
        )
        .unwrap_or_default();
    let titles: HashMap<&str, &str> = all_tasks
        .iter()
        .map(|t| (t.id.as_str(), t.title.as_str()))
        .collect();
    let gate_html = match db.can_complete(user_id, &task.id) {
        Ok(gate) if gate.can_complete => "Yes".to_string(),
        Ok(gate) => {
            let names: Vec<String> = gate.blocking.iter().map(|b| html_escape(&b.title)).collect();
            format!("No, waiting on {}", names.join(", "))
        }
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "Failed to evaluate completion gate");
            "-".to_string()
        }
    };
    let depends_on_html = edge_list_html(&task.id, &detail.depends_on, &titles, true);
    let dependents_html = edge_list_html(&task.id, &detail.dependents, &titles, false);

    let linked: Vec<&str> = detail
        .depends_on
        .iter()
        .map(|e| e.depends_on_task_id.as_str())
        .collect();
    let mut dependency_choices: Vec<(&str, &str)> = vec![("", "Choose a task")];
    dependency_choices.extend(
        all_tasks
            .iter()
            .filter(|t| t.id != task.id && !linked.contains(&t.id.as_str()))
            .map(|t| (t.id.as_str(), t.title.as_str())),
    );

    let mut parents = Vec::new();
    parent_choices(&detail.subtasks, 0, &mut parents);
    let mut parent_opts: Vec<(&str, &str)> = vec![("", "(top level)")];
    parent_opts.extend(parents.iter().map(|(id, label)| (id.as_str(), label.as_str())));

    let projects = db.list_projects(user_id).unwrap_or_default();
    let mut project_choices: Vec<(&str, &str)> = vec![("", "None")];
    project_choices.extend(projects.iter().map(|p| (p.id.as_str(), p.name.as_str())));

    let tags_display = if detail.tags.is_empty() {
        "-".to_string()
    } else {
        detail
            .tags
            .iter()
            .map(|t| format!(r##"<span class="badge">#{}</span>"##, html_escape(&t.name)))
            .collect::<Vec<_>>()
            .join(" ")
    };
    let tags_input = detail
        .tags
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let subtasks_html = if detail.subtasks.is_empty() {
        r#"<p class="empty-state">No subtasks</p>"#.to_string()
    } else {
        subtask_tree_html(&detail.subtasks)
    };

    let description = html_escape(task.description.as_deref().unwrap_or(""));
    let due_display = task.due_date.map(format_due).unwrap_or_else(|| "-".to_string());
    let completed_display = task
        .completed_at
        .map(format_due)
        .unwrap_or_else(|| "-".to_string());
    let project_display = detail
        .project
        .as_ref()
        .map(|p| html_escape(&p.name))
        .unwrap_or_else(|| "-".to_string());
    let recurrence_display = detail
        .recurrence
        .as_ref()
        .map(|r| html_escape(&describe(r)))
        .unwrap_or_else(|| "-".to_string());
    let status_options = select_options(&STATUS_CHOICES, task.status.as_str());
    let priority_options = select_options(&PRIORITY_CHOICES, task.priority.as_str());
    let due_input = task.due_date.map(datetime_input).unwrap_or_default();
    let project_options =
        select_options(&project_choices, task.project_id.as_deref().unwrap_or(""));
    let parent_options = select_options(&parent_opts, "");
    let dependency_options = select_options(&dependency_choices, "");
    let task_id = html_escape(&task.id);
    let task_title = html_escape(&task.title);
    let tags_input = html_escape(&tags_input);

    let content = templates::fill(
        templates::TASK_DETAIL_TEMPLATE,
        &[
            ("task_id", task_id.as_str()),
            ("task_title", task_title.as_str()),
            ("task_status", task.status.as_str()),
            ("status_label", status_label(task.status)),
            ("task_priority", task.priority.as_str()),
            ("task_description", description.as_str()),
            ("due_display", due_display.as_str()),
            ("completed_display", completed_display.as_str()),
            ("project", project_display.as_str()),
            ("tags", tags_display.as_str()),
            ("recurrence", recurrence_display.as_str()),
            ("gate", gate_html.as_str()),
            ("status_options", status_options.as_str()),
            ("priority_options", priority_options.as_str()),
            ("due_input", due_input.as_str()),
            ("project_options", project_options.as_str()),
            ("tags_input", tags_input.as_str()),
            ("description_input", description.as_str()),
            ("subtasks", subtasks_html.as_str()),
            ("parent_options", parent_options.as_str()),
            ("depends_on", depends_on_html.as_str()),
            ("dependents", dependents_html.as_str()),
            ("dependency_options", dependency_options.as_str()),
        ],
    );

    render(&task.title, Some(&user.user), q.msg.as_deref(), &content).into_response()
}

// ---------------------------------------------------------------------------
// Subtasks and dependencies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubtaskForm {
    #[serde(default)]
    title: String,
    #[serde(default)]
    parent_subtask_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DependencyForm {
    #[serde(default)]
    depends_on_task_id: String,
}

pub async fn subtask_create_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(task_id): Path<String>,
    Form(form): Form<SubtaskForm>,
) -> Redirect {
    let path = format!("/tasks/{}", task_id);
    match state.db().create_subtask(
        &user.user.id,
        &task_id,
        &form.title,
        non_empty(form.parent_subtask_id.as_deref()),
    ) {
        Ok(_) => Redirect::to(&path),
        Err(e) => redirect_error(&path, e),
    }
}

/// Toggle a subtask and return to its task.
pub async fn subtask_toggle_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(subtask_id): Path<String>,
) -> Redirect {
    match state
        .db()
        .toggle_subtask(&user.user.id, &subtask_id, &state.config().tasks)
    {
        Ok(toggle) => {
            let path = format!("/tasks/{}", toggle.subtask.task_id);
            if toggle.task_completed {
                redirect_with(&path, "All subtasks done. Task completed.")
            } else {
                Redirect::to(&path)
            }
        }
        Err(e) => redirect_error("/tasks", e),
    }
}

pub async fn dependency_add_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path(task_id): Path<String>,
    Form(form): Form<DependencyForm>,
) -> Redirect {
    let path = format!("/tasks/{}", task_id);
    let Some(depends_on) = non_empty(Some(&form.depends_on_task_id)) else {
        return redirect_error(&path, ActionError::missing_field("depends_on_task_id"));
    };
    match state.db().add_dependency(&user.user.id, &task_id, depends_on) {
        Ok(_) => redirect_with(&path, "Dependency added"),
        Err(e) => redirect_error(&path, e),
    }
}

pub async fn dependency_remove_submit(
    State(state): State<AppServer>,
    PageUser(user): PageUser,
    Path((task_id, edge_id)): Path<(String, String)>,
) -> Redirect {
    let path = format!("/tasks/{}", task_id);
    match state.db().remove_dependency(&user.user.id, &edge_id) {
        Ok(()) => redirect_with(&path, "Dependency removed"),
        Err(e) => redirect_error(&path, e),
    }
}
