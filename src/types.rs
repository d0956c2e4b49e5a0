//! Core types for the task planner.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" | "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Task priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A registered user. The password hash never leaves the store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub created_at: i64,
}

/// A login session, referenced by the `jti` claim of the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A task owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    /// Due date as epoch milliseconds.
    pub due_date: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: i64,
}

/// A checklist item under a task, optionally nested under another subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub parent_subtask_id: Option<String>,
    pub title: String,
    pub completed: bool,
    pub position: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A subtask with its nested children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskTree {
    #[serde(flatten)]
    pub subtask: Subtask,
    pub children: Vec<SubtaskTree>,
}

/// Outcome of toggling a subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskToggle {
    pub subtask: Subtask,
    /// True when this toggle completed the parent task.
    pub task_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            other => Err(format!("unknown frequency '{}'", other)),
        }
    }
}

/// Recurrence rule attached to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub task_id: String,
    pub frequency: Frequency,
    pub interval: u32,
    /// Weekdays as 0 = Monday .. 6 = Sunday. Only meaningful for weekly rules.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub end_date: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    #[default]
    Browser,
}

impl ReminderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderChannel::Email => "email",
            ReminderChannel::Browser => "browser",
        }
    }
}

impl FromStr for ReminderChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(ReminderChannel::Email),
            "browser" => Ok(ReminderChannel::Browser),
            other => Err(format!("unknown reminder channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub remind_at: i64,
    pub channel: ReminderChannel,
    pub sent_at: Option<i64>,
    pub notified_at: Option<i64>,
    pub created_at: i64,
}

/// A due reminder joined with the fields needed to announce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueReminder {
    pub reminder: Reminder,
    pub task_title: String,
    pub username: String,
    pub email: Option<String>,
}

/// A directed "task_id depends on depends_on_task_id" edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: String,
    pub task_id: String,
    pub depends_on_task_id: String,
    pub created_at: i64,
}

/// A dependency that is not done yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingTask {
    pub edge_id: String,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// Result of the completion gate query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionGate {
    pub can_complete: bool,
    pub blocking: Vec<BlockingTask>,
}

impl CompletionGate {
    pub fn from_blocking(blocking: Vec<BlockingTask>) -> Self {
        Self {
            can_complete: blocking.is_empty(),
            blocking,
        }
    }
}

/// A task with all of its relations loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub project: Option<Project>,
    pub tags: Vec<Tag>,
    pub subtasks: Vec<SubtaskTree>,
    pub recurrence: Option<Recurrence>,
    pub reminders: Vec<Reminder>,
    /// Edges where this task is the dependent side.
    pub depends_on: Vec<DependencyEdge>,
    /// Edges where other tasks depend on this one.
    pub dependents: Vec<DependencyEdge>,
}

/// Fields for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<i64>,
}

/// Partial task update. `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub project_id: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, with = "double_option")]
    pub due_date: Option<Option<i64>>,
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    #[default]
    DueDate,
    Priority,
    Created,
    Updated,
}

impl FromStr for TaskSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "due_date" | "due" => Ok(TaskSort::DueDate),
            "priority" => Ok(TaskSort::Priority),
            "created" | "created_at" => Ok(TaskSort::Created),
            "updated" | "updated_at" => Ok(TaskSort::Updated),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

/// Search and filter criteria for listing tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Case-insensitive substring matched against title and description.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tag_id: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Inclusive upper bound on due date (epoch ms).
    #[serde(default)]
    pub due_before: Option<i64>,
    /// Inclusive lower bound on due date (epoch ms).
    #[serde(default)]
    pub due_after: Option<i64>,
    /// Done tasks are hidden unless this is set or `status` asks for them.
    #[serde(default)]
    pub include_done: bool,
    #[serde(default)]
    pub sort: TaskSort,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_both_spellings() {
        assert_eq!("in_progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("In-Progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert!("finished".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn priority_orders_low_to_high() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn task_update_distinguishes_null_from_missing() {
        let update: TaskUpdate =
            serde_json::from_str(r#"{"due_date": null, "title": "x"}"#).unwrap();
        assert_eq!(update.due_date, Some(None));
        assert_eq!(update.description, None);
        assert_eq!(update.title.as_deref(), Some("x"));
    }

    #[test]
    fn completion_gate_open_iff_nothing_blocks() {
        assert!(CompletionGate::from_blocking(vec![]).can_complete);
        let gate = CompletionGate::from_blocking(vec![BlockingTask {
            edge_id: "e".into(),
            task_id: "t".into(),
            title: "T".into(),
            status: TaskStatus::Todo,
        }]);
        assert!(!gate.can_complete);
    }
}
