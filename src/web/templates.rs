//! HTML templates, embedded at compile time.
//!
//! Placeholders are written `{{name}}` and filled by [`fill`].

/// Fill `{{name}}` placeholders in a single pass.
///
/// Inserted values are never rescanned, so user text containing `{{...}}`
/// comes out as written. Unknown placeholders are left in place.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after.find("}}").and_then(|end| {
            let key = &after[..end];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, &after[end + 2..]))
        });
        match value {
            Some((value, tail)) => {
                out.push_str(value);
                rest = tail;
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Page shell with header, navigation, flash message and content slot.
pub const BASE_TEMPLATE: &str = include_str!("templates/base.html");

/// Home page: quick-add form and the overdue/today/upcoming columns.
pub const HOME_TEMPLATE: &str = include_str!("templates/home.html");

pub const LOGIN_TEMPLATE: &str = include_str!("templates/login.html");

pub const SIGNUP_TEMPLATE: &str = include_str!("templates/signup.html");

pub const RESET_PASSWORD_TEMPLATE: &str = include_str!("templates/reset_password.html");

/// Search form, results table and the full create form.
pub const TASKS_TEMPLATE: &str = include_str!("templates/tasks.html");

pub const TASK_DETAIL_TEMPLATE: &str = include_str!("templates/task_detail.html");

/// Polls for due browser reminders once a minute and shows them as desktop
/// notifications, falling back to an alert when permission is denied.
pub const NOTIFY_SCRIPT: &str = r#"<script>
(function () {
  if ("Notification" in window && Notification.permission === "default") {
    Notification.requestPermission();
  }
  function show(item) {
    var text = "Reminder: " + item.task_title;
    if ("Notification" in window && Notification.permission === "granted") {
      var n = new Notification(text);
      n.onclick = function () { window.location = "/tasks/" + item.reminder.task_id; };
    } else {
      alert(text);
    }
  }
  function poll() {
    fetch("/api/notifications/due", { credentials: "same-origin" })
      .then(function (r) { return r.ok ? r.json() : null; })
      .then(function (body) { if (body && body.ok) { body.data.forEach(show); } })
      .catch(function () {});
  }
  poll();
  setInterval(poll, 60000);
})();
</script>"#;
