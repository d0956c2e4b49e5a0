//! Integration tests for the database layer.

use task_planner::config::TasksConfig;
use task_planner::db::{Database, now_ms};
use task_planner::error::{ErrorCode, error_code};
use task_planner::types::{
    Frequency, NewTask, Priority, Recurrence, ReminderChannel, TaskFilter, TaskSort, TaskStatus,
    TaskUpdate,
};

const DAY_MS: i64 = 86_400_000;

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn create_user(db: &Database, name: &str) -> String {
    db.create_user(name, Some(&format!("{}@example.com", name)), "not-a-real-hash")
        .unwrap()
        .id
}

fn create_task(db: &Database, user_id: &str, title: &str) -> String {
    db.create_task(
        user_id,
        NewTask {
            title: title.to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .id
}

fn enforcing() -> TasksConfig {
    TasksConfig {
        enforce_dependencies: true,
        ..TasksConfig::default()
    }
}

mod user_tests {
    use super::*;

    #[test]
    fn usernames_are_unique_case_insensitively() {
        let db = setup_db();
        create_user(&db, "alice");

        let err = db.create_user("ALICE", None, "hash").unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::AlreadyExists));
    }

    #[test]
    fn credentials_lookup_returns_hash() {
        let db = setup_db();
        create_user(&db, "alice");

        let (user, hash) = db.get_user_credentials("alice").unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(hash, "not-a-real-hash");
        assert!(db.get_user_credentials("bob").unwrap().is_none());
    }

    #[test]
    fn revoked_sessions_stay_revoked() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let session = db.create_session(&user_id, now_ms() + DAY_MS).unwrap();

        assert!(db.get_session(&session.id).unwrap().unwrap().revoked_at.is_none());
        db.revoke_session(&session.id).unwrap();
        assert!(db.get_session(&session.id).unwrap().unwrap().revoked_at.is_some());
    }

    #[test]
    fn revoke_user_sessions_counts_open_sessions() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        db.create_session(&user_id, now_ms() + DAY_MS).unwrap();
        db.create_session(&user_id, now_ms() + DAY_MS).unwrap();

        assert_eq!(db.revoke_user_sessions(&user_id).unwrap(), 2);
    }

    #[test]
    fn purge_removes_expired_sessions() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let expired = db.create_session(&user_id, now_ms() - 1000).unwrap();
        let live = db.create_session(&user_id, now_ms() + DAY_MS).unwrap();

        assert!(db.purge_expired_sessions().unwrap() >= 1);
        assert!(db.get_session(&expired.id).unwrap().is_none());
        assert!(db.get_session(&live.id).unwrap().is_some());
    }

    #[test]
    fn reset_token_is_single_use() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        db.create_password_reset_token(&user_id, "tok123", now_ms() + DAY_MS)
            .unwrap();

        assert_eq!(db.consume_password_reset_token("tok123").unwrap(), user_id);
        let err = db.consume_password_reset_token("tok123").unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::InvalidFieldValue));
    }

    #[test]
    fn expired_reset_token_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        db.create_password_reset_token(&user_id, "old", now_ms() - 1000)
            .unwrap();

        assert!(db.consume_password_reset_token("old").is_err());
    }
}

mod task_tests {
    use super::*;

    #[test]
    fn create_applies_defaults() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "  Write report  ");

        let task = db.get_task(&user_id, &task_id).unwrap().unwrap();
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn blank_title_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");

        let err = db
            .create_task(
                &user_id,
                NewTask {
                    title: "   ".to_string(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::MissingRequiredField));
    }

    #[test]
    fn completed_at_follows_status() {
        let db = setup_db();
        let config = TasksConfig::default();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");

        let done = db
            .set_task_status(&user_id, &task_id, TaskStatus::Done, &config)
            .unwrap();
        assert!(done.completed_at.is_some());

        let reopened = db
            .set_task_status(&user_id, &task_id, TaskStatus::InProgress, &config)
            .unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn update_can_clear_nullable_fields() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task = db
            .create_task(
                &user_id,
                NewTask {
                    title: "Task".to_string(),
                    description: Some("notes".to_string()),
                    due_date: Some(now_ms()),
                    ..Default::default()
                },
            )
            .unwrap();

        let update = TaskUpdate {
            description: Some(None),
            due_date: Some(None),
            priority: Some(Priority::High),
            ..Default::default()
        };
        let updated = db
            .update_task(&user_id, &task.id, update, &TasksConfig::default())
            .unwrap();
        assert!(updated.description.is_none());
        assert!(updated.due_date.is_none());
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.title, "Task");
    }

    #[test]
    fn other_users_tasks_are_not_found() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let task_id = create_task(&db, &alice, "Private");

        assert!(db.get_task(&bob, &task_id).unwrap().is_none());
        let err = db.delete_task(&bob, &task_id).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));
        let err = db
            .set_task_status(&bob, &task_id, TaskStatus::Done, &TasksConfig::default())
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));
    }

    #[test]
    fn search_matches_title_and_description() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        create_task(&db, &user_id, "Buy milk");
        db.create_task(
            &user_id,
            NewTask {
                title: "Errands".to_string(),
                description: Some("milk and bread".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        create_task(&db, &user_id, "Call mom");

        let filter = TaskFilter {
            query: Some("MILK".to_string()),
            ..Default::default()
        };
        assert_eq!(db.list_tasks(&user_id, &filter).unwrap().len(), 2);
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        create_task(&db, &user_id, "100% done");
        create_task(&db, &user_id, "100 items");

        let filter = TaskFilter {
            query: Some("100%".to_string()),
            ..Default::default()
        };
        let found = db.list_tasks(&user_id, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "100% done");
    }

    #[test]
    fn done_tasks_hidden_unless_requested() {
        let db = setup_db();
        let config = TasksConfig::default();
        let user_id = create_user(&db, "alice");
        let done_id = create_task(&db, &user_id, "Finished");
        create_task(&db, &user_id, "Open");
        db.set_task_status(&user_id, &done_id, TaskStatus::Done, &config)
            .unwrap();

        let default = db.list_tasks(&user_id, &TaskFilter::default()).unwrap();
        assert_eq!(default.len(), 1);

        let all = TaskFilter {
            include_done: true,
            ..Default::default()
        };
        assert_eq!(db.list_tasks(&user_id, &all).unwrap().len(), 2);

        let only_done = TaskFilter {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        let found = db.list_tasks(&user_id, &only_done).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, done_id);
    }

    #[test]
    fn due_date_sort_puts_undated_last_and_breaks_ties_by_priority() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let due = now_ms();
        let new = |title: &str, priority: Priority, due_date: Option<i64>| NewTask {
            title: title.to_string(),
            priority: Some(priority),
            due_date,
            ..Default::default()
        };
        db.create_task(&user_id, new("undated", Priority::High, None))
            .unwrap();
        db.create_task(&user_id, new("later", Priority::High, Some(due + DAY_MS)))
            .unwrap();
        db.create_task(&user_id, new("low", Priority::Low, Some(due)))
            .unwrap();
        db.create_task(&user_id, new("high", Priority::High, Some(due)))
            .unwrap();

        let filter = TaskFilter {
            sort: TaskSort::DueDate,
            ..Default::default()
        };
        let titles: Vec<String> = db
            .list_tasks(&user_id, &filter)
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["high", "low", "later", "undated"]);
    }

    #[test]
    fn due_range_filter_is_inclusive() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let base = now_ms();
        for offset in 0..3 {
            db.create_task(
                &user_id,
                NewTask {
                    title: format!("day {}", offset),
                    due_date: Some(base + offset * DAY_MS),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let filter = TaskFilter {
            due_after: Some(base),
            due_before: Some(base + DAY_MS),
            ..Default::default()
        };
        assert_eq!(db.list_tasks(&user_id, &filter).unwrap().len(), 2);
    }

    #[test]
    fn detail_loads_relations() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let project = db.create_project(&user_id, "Home", None, None).unwrap();
        let task = db
            .create_task(
                &user_id,
                NewTask {
                    title: "Paint fence".to_string(),
                    project_id: Some(project.id.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        let other = create_task(&db, &user_id, "Buy paint");
        db.add_dependency(&user_id, &task.id, &other).unwrap();
        db.create_subtask(&user_id, &task.id, "Sand", None).unwrap();
        db.set_task_tags_by_name(&user_id, &task.id, &["outdoor".to_string()])
            .unwrap();

        let detail = db.get_task_detail(&user_id, &task.id).unwrap().unwrap();
        assert_eq!(detail.project.unwrap().name, "Home");
        assert_eq!(detail.tags.len(), 1);
        assert_eq!(detail.subtasks.len(), 1);
        assert_eq!(detail.depends_on.len(), 1);
        assert!(detail.dependents.is_empty());
    }

    #[test]
    fn deleting_a_task_removes_its_edges() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        db.add_dependency(&user_id, &a, &b).unwrap();

        db.delete_task(&user_id, &b).unwrap();
        assert!(db.get_all_dependencies(&user_id).unwrap().is_empty());
        assert!(db.can_complete(&user_id, &a).unwrap().can_complete);
    }
}

mod project_tests {
    use super::*;

    #[test]
    fn project_names_unique_per_user() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        db.create_project(&alice, "Work", None, None).unwrap();

        let err = db.create_project(&alice, "work", None, None).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::AlreadyExists));
        assert!(db.create_project(&bob, "Work", None, None).is_ok());
    }

    #[test]
    fn invalid_color_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");

        let err = db
            .create_project(&user_id, "Work", None, Some("blue-ish"))
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::InvalidFieldValue));
        assert!(db
            .create_project(&user_id, "Home", None, Some("#336699"))
            .is_ok());
    }

    #[test]
    fn task_cannot_use_foreign_project() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let project = db.create_project(&bob, "Bob's", None, None).unwrap();

        let err = db
            .create_task(
                &alice,
                NewTask {
                    title: "Sneaky".to_string(),
                    project_id: Some(project.id),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));
    }

    #[test]
    fn deleting_project_keeps_its_tasks() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let project = db.create_project(&user_id, "Work", None, None).unwrap();
        let task = db
            .create_task(
                &user_id,
                NewTask {
                    title: "Report".to_string(),
                    project_id: Some(project.id.clone()),
                    ..Default::default()
                },
            )
            .unwrap();

        db.delete_project(&user_id, &project.id).unwrap();
        let task = db.get_task(&user_id, &task.id).unwrap().unwrap();
        assert!(task.project_id.is_none());
    }

    #[test]
    fn filter_by_project() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let project = db.create_project(&user_id, "Work", None, None).unwrap();
        db.create_task(
            &user_id,
            NewTask {
                title: "In project".to_string(),
                project_id: Some(project.id.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        create_task(&db, &user_id, "Loose");

        let filter = TaskFilter {
            project_id: Some(project.id),
            ..Default::default()
        };
        let found = db.list_tasks(&user_id, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "In project");
    }
}

mod tag_tests {
    use super::*;

    #[test]
    fn set_tags_by_name_creates_and_reuses() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let existing = db.create_tag(&user_id, "urgent", None).unwrap();
        let task_id = create_task(&db, &user_id, "Task");

        let tags = db
            .set_task_tags_by_name(
                &user_id,
                &task_id,
                &["Urgent".to_string(), "home".to_string(), "HOME".to_string()],
            )
            .unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().any(|t| t.id == existing.id));
        assert_eq!(db.list_tags(&user_id).unwrap().len(), 2);
    }

    #[test]
    fn set_tags_replaces_previous_set() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        db.set_task_tags_by_name(&user_id, &task_id, &["a".to_string(), "b".to_string()])
            .unwrap();

        let tags = db
            .set_task_tags_by_name(&user_id, &task_id, &["c".to_string()])
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "c");
    }

    #[test]
    fn create_with_tags_attaches_them() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task = db
            .create_task_with_tags(
                &user_id,
                NewTask {
                    title: "Groceries".to_string(),
                    ..Default::default()
                },
                &["errand".to_string(), "#Home".to_string()],
            )
            .unwrap();

        let tags = db.list_task_tags(&user_id, &task.id).unwrap();
        let mut names: Vec<_> = tags.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Home", "errand"]);
    }

    #[test]
    fn create_with_bad_tag_leaves_no_task() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");

        let err = db
            .create_task_with_tags(
                &user_id,
                NewTask {
                    title: "Ghost".to_string(),
                    ..Default::default()
                },
                &["ok".to_string(), "  ".to_string()],
            )
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::MissingRequiredField));

        assert!(db.list_tasks(&user_id, &TaskFilter::default()).unwrap().is_empty());
        assert!(db.list_tags(&user_id).unwrap().is_empty());
    }

    #[test]
    fn create_with_foreign_project_leaves_no_tags() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let project = db.create_project(&bob, "Theirs", None, None).unwrap();

        let err = db
            .create_task_with_tags(
                &alice,
                NewTask {
                    title: "Ghost".to_string(),
                    project_id: Some(project.id),
                    ..Default::default()
                },
                &["fresh".to_string()],
            )
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));

        assert!(db.list_tasks(&alice, &TaskFilter::default()).unwrap().is_empty());
        assert!(db.list_tags(&alice).unwrap().is_empty());
    }

    #[test]
    fn filter_by_tag() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let tag = db.create_tag(&user_id, "errand", None).unwrap();
        let tagged = create_task(&db, &user_id, "Tagged");
        create_task(&db, &user_id, "Plain");
        db.add_tag_to_task(&user_id, &tagged, &tag.id).unwrap();

        let filter = TaskFilter {
            tag_id: Some(tag.id.clone()),
            ..Default::default()
        };
        let found = db.list_tasks(&user_id, &filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, tagged);

        db.remove_tag_from_task(&user_id, &tagged, &tag.id).unwrap();
        assert!(db.list_tasks(&user_id, &filter).unwrap().is_empty());
    }

    #[test]
    fn deleting_tag_detaches_it() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        let tags = db
            .set_task_tags_by_name(&user_id, &task_id, &["temp".to_string()])
            .unwrap();

        db.delete_tag(&user_id, &tags[0].id).unwrap();
        assert!(db.list_task_tags(&user_id, &task_id).unwrap().is_empty());
    }
}

mod subtask_tests {
    use super::*;

    #[test]
    fn completing_last_subtask_completes_task_once() {
        let db = setup_db();
        let config = TasksConfig::default();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Pack");
        let a = db.create_subtask(&user_id, &task_id, "Clothes", None).unwrap();
        let b = db.create_subtask(&user_id, &task_id, "Books", None).unwrap();

        let first = db.toggle_subtask(&user_id, &a.id, &config).unwrap();
        assert!(first.subtask.completed);
        assert!(!first.task_completed);
        assert_eq!(
            db.get_task(&user_id, &task_id).unwrap().unwrap().status,
            TaskStatus::Todo
        );

        let second = db.toggle_subtask(&user_id, &b.id, &config).unwrap();
        assert!(second.task_completed);
        let task = db.get_task(&user_id, &task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        let completed_at = task.completed_at;
        assert!(completed_at.is_some());

        // Uncheck and re-check: the task stays done and is not re-stamped.
        let unchecked = db.toggle_subtask(&user_id, &b.id, &config).unwrap();
        assert!(!unchecked.subtask.completed);
        assert_eq!(
            db.get_task(&user_id, &task_id).unwrap().unwrap().status,
            TaskStatus::Done
        );
        let again = db.toggle_subtask(&user_id, &b.id, &config).unwrap();
        assert!(!again.task_completed);
        assert_eq!(
            db.get_task(&user_id, &task_id).unwrap().unwrap().completed_at,
            completed_at
        );
    }

    #[test]
    fn nested_subtasks_count_toward_cascade() {
        let db = setup_db();
        let config = TasksConfig::default();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Move");
        let parent = db.create_subtask(&user_id, &task_id, "Kitchen", None).unwrap();
        let child = db
            .create_subtask(&user_id, &task_id, "Plates", Some(&parent.id))
            .unwrap();

        let toggled = db.toggle_subtask(&user_id, &parent.id, &config).unwrap();
        assert!(!toggled.task_completed);

        let toggled = db.toggle_subtask(&user_id, &child.id, &config).unwrap();
        assert!(toggled.task_completed);
    }

    #[test]
    fn tree_nests_children() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Trip");
        let parent = db.create_subtask(&user_id, &task_id, "Pack", None).unwrap();
        db.create_subtask(&user_id, &task_id, "Socks", Some(&parent.id))
            .unwrap();
        db.create_subtask(&user_id, &task_id, "Book hotel", None)
            .unwrap();

        let tree = db.get_subtask_tree(&user_id, &task_id).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].subtask.title, "Pack");
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].subtask.title, "Socks");
    }

    #[test]
    fn parent_must_belong_to_same_task() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let t1 = create_task(&db, &user_id, "One");
        let t2 = create_task(&db, &user_id, "Two");
        let parent = db.create_subtask(&user_id, &t1, "Step", None).unwrap();

        let err = db
            .create_subtask(&user_id, &t2, "Child", Some(&parent.id))
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::InvalidFieldValue));
    }

    #[test]
    fn deleting_parent_removes_children() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        let parent = db.create_subtask(&user_id, &task_id, "Parent", None).unwrap();
        db.create_subtask(&user_id, &task_id, "Child", Some(&parent.id))
            .unwrap();

        db.delete_subtask(&user_id, &parent.id).unwrap();
        assert!(db.list_subtasks(&user_id, &task_id).unwrap().is_empty());
    }

    #[test]
    fn blocked_task_is_not_auto_completed_when_enforcing() {
        let db = setup_db();
        let config = enforcing();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Deploy");
        let blocker = create_task(&db, &user_id, "Review");
        db.add_dependency(&user_id, &task_id, &blocker).unwrap();
        let sub = db.create_subtask(&user_id, &task_id, "Build", None).unwrap();

        let toggled = db.toggle_subtask(&user_id, &sub.id, &config).unwrap();
        assert!(toggled.subtask.completed);
        assert!(!toggled.task_completed);
        assert_eq!(
            db.get_task(&user_id, &task_id).unwrap().unwrap().status,
            TaskStatus::Todo
        );
    }

    #[test]
    fn rename_updates_title() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        let sub = db.create_subtask(&user_id, &task_id, "Old", None).unwrap();

        let renamed = db.rename_subtask(&user_id, &sub.id, " New ").unwrap();
        assert_eq!(renamed.title, "New");
    }
}

mod dependency_tests {
    use super::*;

    #[test]
    fn cycle_is_rejected_but_redundant_edge_is_accepted() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        let c = create_task(&db, &user_id, "C");

        db.add_dependency(&user_id, &a, &b).unwrap();
        db.add_dependency(&user_id, &b, &c).unwrap();

        let err = db.add_dependency(&user_id, &c, &a).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::CircularDependency));
        assert_eq!(db.get_all_dependencies(&user_id).unwrap().len(), 2);

        db.add_dependency(&user_id, &a, &c).unwrap();
        assert_eq!(db.get_all_dependencies(&user_id).unwrap().len(), 3);
    }

    #[test]
    fn duplicate_edge_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        db.add_dependency(&user_id, &a, &b).unwrap();

        let err = db.add_dependency(&user_id, &a, &b).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::DuplicateEdge));
    }

    #[test]
    fn self_edge_is_circular() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");

        let err = db.add_dependency(&user_id, &a, &a).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::CircularDependency));
    }

    #[test]
    fn cycle_through_diamond_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let top = create_task(&db, &user_id, "Top");
        let left = create_task(&db, &user_id, "Left");
        let right = create_task(&db, &user_id, "Right");
        let bottom = create_task(&db, &user_id, "Bottom");

        db.add_dependency(&user_id, &top, &left).unwrap();
        db.add_dependency(&user_id, &top, &right).unwrap();
        db.add_dependency(&user_id, &left, &bottom).unwrap();
        db.add_dependency(&user_id, &right, &bottom).unwrap();

        let err = db.add_dependency(&user_id, &bottom, &top).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::CircularDependency));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let top = create_task(&db, &user_id, "Top");
        let left = create_task(&db, &user_id, "Left");
        let right = create_task(&db, &user_id, "Right");
        let bottom = create_task(&db, &user_id, "Bottom");
        let extra = create_task(&db, &user_id, "Extra");

        db.add_dependency(&user_id, &top, &left).unwrap();
        db.add_dependency(&user_id, &top, &right).unwrap();
        db.add_dependency(&user_id, &left, &bottom).unwrap();
        db.add_dependency(&user_id, &right, &bottom).unwrap();

        // The walk from `top` reaches `bottom` twice; that must not count as a cycle.
        db.add_dependency(&user_id, &extra, &top).unwrap();
        db.add_dependency(&user_id, &bottom, &extra)
            .expect_err("bottom -> extra closes a loop through top");
        assert_eq!(db.get_all_dependencies(&user_id).unwrap().len(), 5);
    }

    #[test]
    fn edges_cannot_cross_users() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let mine = create_task(&db, &alice, "Mine");
        let theirs = create_task(&db, &bob, "Theirs");

        let err = db.add_dependency(&alice, &mine, &theirs).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));
    }

    #[test]
    fn can_complete_iff_no_blocking_dependencies() {
        let db = setup_db();
        let config = TasksConfig::default();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        let c = create_task(&db, &user_id, "C");
        db.add_dependency(&user_id, &a, &b).unwrap();
        db.add_dependency(&user_id, &a, &c).unwrap();

        let gate = db.can_complete(&user_id, &a).unwrap();
        assert!(!gate.can_complete);
        assert_eq!(gate.blocking.len(), 2);

        db.set_task_status(&user_id, &b, TaskStatus::Done, &config)
            .unwrap();
        let gate = db.can_complete(&user_id, &a).unwrap();
        assert!(!gate.can_complete);
        assert_eq!(gate.blocking.len(), 1);
        assert_eq!(gate.blocking[0].task_id, c);

        db.set_task_status(&user_id, &c, TaskStatus::Done, &config)
            .unwrap();
        let gate = db.can_complete(&user_id, &a).unwrap();
        assert!(gate.can_complete);
        assert!(gate.blocking.is_empty());
    }

    #[test]
    fn enforcement_blocks_completion() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        db.add_dependency(&user_id, &a, &b).unwrap();

        let err = db
            .set_task_status(&user_id, &a, TaskStatus::Done, &enforcing())
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::DependencyNotSatisfied));

        // Without enforcement the gate is advisory.
        assert!(db
            .set_task_status(&user_id, &a, TaskStatus::Done, &TasksConfig::default())
            .is_ok());
    }

    #[test]
    fn list_dependencies_splits_directions() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        let c = create_task(&db, &user_id, "C");
        db.add_dependency(&user_id, &a, &b).unwrap();
        db.add_dependency(&user_id, &b, &c).unwrap();

        let (depends_on, dependents) = db.list_dependencies(&user_id, &b).unwrap();
        assert_eq!(depends_on.len(), 1);
        assert_eq!(depends_on[0].depends_on_task_id, c);
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].task_id, a);
    }

    #[test]
    fn removed_edge_allows_reverse_edge() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let a = create_task(&db, &user_id, "A");
        let b = create_task(&db, &user_id, "B");
        let edge = db.add_dependency(&user_id, &a, &b).unwrap();

        assert!(db.add_dependency(&user_id, &b, &a).is_err());
        db.remove_dependency(&user_id, &edge.id).unwrap();
        assert!(db.get_dependency(&user_id, &edge.id).unwrap().is_none());
        assert!(db.add_dependency(&user_id, &b, &a).is_ok());
    }
}

mod recurrence_tests {
    use super::*;

    fn daily(task_id: &str) -> Recurrence {
        Recurrence {
            task_id: task_id.to_string(),
            frequency: Frequency::Daily,
            interval: 1,
            days_of_week: vec![],
            end_date: None,
        }
    }

    #[test]
    fn completing_recurring_task_spawns_next() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let due = now_ms();
        let task = db
            .create_task(
                &user_id,
                NewTask {
                    title: "Water plants".to_string(),
                    due_date: Some(due),
                    ..Default::default()
                },
            )
            .unwrap();
        db.set_task_tags_by_name(&user_id, &task.id, &["home".to_string()])
            .unwrap();
        db.set_recurrence(&user_id, daily(&task.id)).unwrap();

        db.set_task_status(&user_id, &task.id, TaskStatus::Done, &TasksConfig::default())
            .unwrap();

        let open = db.list_tasks(&user_id, &TaskFilter::default()).unwrap();
        assert_eq!(open.len(), 1);
        let next = &open[0];
        assert_ne!(next.id, task.id);
        assert_eq!(next.title, "Water plants");
        assert_eq!(next.due_date, Some(due + DAY_MS));
        assert_eq!(db.list_task_tags(&user_id, &next.id).unwrap().len(), 1);

        // The rule moved to the new occurrence.
        assert!(db.get_recurrence(&user_id, &task.id).unwrap().is_none());
        assert!(db.get_recurrence(&user_id, &next.id).unwrap().is_some());
    }

    #[test]
    fn ended_rule_spawns_nothing() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let due = now_ms();
        let task = db
            .create_task(
                &user_id,
                NewTask {
                    title: "Last time".to_string(),
                    due_date: Some(due),
                    ..Default::default()
                },
            )
            .unwrap();
        let mut rule = daily(&task.id);
        rule.end_date = Some(due + 1000);
        db.set_recurrence(&user_id, rule).unwrap();

        db.set_task_status(&user_id, &task.id, TaskStatus::Done, &TasksConfig::default())
            .unwrap();
        assert!(db.list_tasks(&user_id, &TaskFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        let mut rule = daily(&task_id);
        rule.interval = 0;

        let err = db.set_recurrence(&user_id, rule).unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::InvalidFieldValue));
    }

    #[test]
    fn set_replaces_and_clear_removes() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        db.set_recurrence(&user_id, daily(&task_id)).unwrap();

        let mut weekly = daily(&task_id);
        weekly.frequency = Frequency::Weekly;
        weekly.days_of_week = vec![4, 0, 4];
        db.set_recurrence(&user_id, weekly).unwrap();

        let stored = db.get_recurrence(&user_id, &task_id).unwrap().unwrap();
        assert_eq!(stored.frequency, Frequency::Weekly);
        assert_eq!(stored.days_of_week, vec![0, 4]);

        db.clear_recurrence(&user_id, &task_id).unwrap();
        assert!(db.get_recurrence(&user_id, &task_id).unwrap().is_none());
    }
}

mod reminder_tests {
    use super::*;

    #[test]
    fn due_email_reminders_until_marked_sent() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Dentist");
        let now = now_ms();
        let due = db
            .create_reminder(&user_id, &task_id, now - 1000, ReminderChannel::Email)
            .unwrap();
        db.create_reminder(&user_id, &task_id, now + DAY_MS, ReminderChannel::Email)
            .unwrap();

        let found = db.due_email_reminders(now, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reminder.id, due.id);
        assert_eq!(found[0].task_title, "Dentist");
        assert_eq!(found[0].email.as_deref(), Some("alice@example.com"));

        assert!(db.mark_reminder_sent(&due.id, now).unwrap());
        assert!(!db.mark_reminder_sent(&due.id, now).unwrap());
        assert!(db.due_email_reminders(now, 10).unwrap().is_empty());
    }

    #[test]
    fn reminders_on_done_tasks_are_skipped() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Done already");
        let now = now_ms();
        db.create_reminder(&user_id, &task_id, now - 1000, ReminderChannel::Email)
            .unwrap();
        db.set_task_status(&user_id, &task_id, TaskStatus::Done, &TasksConfig::default())
            .unwrap();

        assert!(db.due_email_reminders(now, 10).unwrap().is_empty());
    }

    #[test]
    fn browser_notifications_returned_once() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Stand up");
        let now = now_ms();
        db.create_reminder(&user_id, &task_id, now - 1000, ReminderChannel::Browser)
            .unwrap();
        db.create_reminder(&user_id, &task_id, now - 500, ReminderChannel::Email)
            .unwrap();

        let first = db.take_due_notifications(&user_id, now).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].reminder.channel, ReminderChannel::Browser);
        assert_eq!(first[0].reminder.notified_at, Some(now));

        assert!(db.take_due_notifications(&user_id, now).unwrap().is_empty());
    }

    #[test]
    fn notifications_scoped_to_user() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let task_id = create_task(&db, &alice, "Mine");
        let now = now_ms();
        db.create_reminder(&alice, &task_id, now - 1000, ReminderChannel::Browser)
            .unwrap();

        assert!(db.take_due_notifications(&bob, now).unwrap().is_empty());
        assert_eq!(db.take_due_notifications(&alice, now).unwrap().len(), 1);
    }

    #[test]
    fn pending_excludes_fired_reminders() {
        let db = setup_db();
        let user_id = create_user(&db, "alice");
        let task_id = create_task(&db, &user_id, "Task");
        let now = now_ms();
        let fired = db
            .create_reminder(&user_id, &task_id, now - 1000, ReminderChannel::Email)
            .unwrap();
        db.create_reminder(&user_id, &task_id, now + DAY_MS, ReminderChannel::Browser)
            .unwrap();
        db.mark_reminder_sent(&fired.id, now).unwrap();

        assert_eq!(db.list_pending_reminders(&user_id).unwrap().len(), 1);
        assert_eq!(db.list_task_reminders(&user_id, &task_id).unwrap().len(), 2);
    }

    #[test]
    fn reminder_for_foreign_task_is_not_found() {
        let db = setup_db();
        let alice = create_user(&db, "alice");
        let bob = create_user(&db, "bob");
        let task_id = create_task(&db, &alice, "Mine");

        let err = db
            .create_reminder(&bob, &task_id, now_ms(), ReminderChannel::Browser)
            .unwrap_err();
        assert_eq!(error_code(&err), Some(ErrorCode::NotFound));
    }
}
