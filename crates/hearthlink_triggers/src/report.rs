//! Result envelope returned by every trigger entry point.

use serde::Serialize;
use std::fmt::Display;

/// One guarded step that failed while handling a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerFailure {
    /// Relation accessor, or the hook name for entity-level steps.
    pub target: String,
    /// `update_cache`, `take_action_on`, `on_create`, `on_delete`, `resolve`.
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    /// `collection/id` of the notification.
    pub path: String,
    /// No step failed. Skipped notifications are ok.
    pub ok: bool,
    pub skipped: bool,
    /// Cache writes issued.
    pub writes: usize,
    /// Commands executed.
    pub actions: usize,
    pub failures: Vec<TriggerFailure>,
    pub message: String,
}

impl TriggerReport {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ok: true,
            skipped: false,
            writes: 0,
            actions: 0,
            failures: Vec::new(),
            message: String::new(),
        }
    }

    pub(crate) fn skipped(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            skipped: true,
            message: reason.into(),
            ..Self::new(path)
        }
    }

    pub(crate) fn fail(&mut self, target: &str, stage: &'static str, err: &dyn Display) {
        self.ok = false;
        self.failures.push(TriggerFailure {
            target: target.to_string(),
            stage,
            message: err.to_string(),
        });
    }

    /// Fills `message` from the counters unless a reason is already set.
    pub(crate) fn finish(mut self) -> Self {
        if self.message.is_empty() {
            self.message = if self.ok {
                format!("{} write(s), {} action(s).", self.writes, self.actions)
            } else {
                format!("{} step(s) failed.", self.failures.len())
            };
        }
        self
    }

    /// Serializes the report; never fails.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            serde_json::json!({
                "path": self.path,
                "ok": false,
                "message": format!("report serialization failed: {err}"),
            })
            .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::TriggerReport;

    #[test]
    fn failure_flips_ok_and_shapes_message() {
        let mut report = TriggerReport::new("households/H1");
        report.fail("sensors", "update_cache", &"store offline");
        let report = report.finish();

        assert!(!report.ok);
        assert_eq!(report.message, "1 step(s) failed.");
        assert!(report.to_json().contains("\"stage\":\"update_cache\""));
    }

    #[test]
    fn skipped_report_keeps_reason() {
        let report = TriggerReport::skipped("users_secure/U1", "secure mirror").finish();
        assert!(report.ok);
        assert!(report.skipped);
        assert_eq!(report.message, "secure mirror");
    }
}
