//! Trigger-facing entry points.
//!
//! # Responsibility
//! - Expose one handler per document event kind to the hosting runtime.
//! - Resolve a process-wide dispatcher lazily from `CoreConfig`.
//!
//! # Invariants
//! - Entry points never panic; every outcome is a `TriggerReport`.
//! - The dispatcher is built once per process; a failed build is retried on
//!   the next call.

pub mod dispatcher;
pub mod report;

pub use dispatcher::TriggerDispatcher;
pub use report::{TriggerFailure, TriggerReport};

use hearthlink_core::{Change, CoreConfig};
use log::error;
use once_cell::sync::OnceCell;

static DISPATCHER: OnceCell<TriggerDispatcher> = OnceCell::new();

/// Process-wide dispatcher over the store named by the environment.
pub fn dispatcher() -> Result<&'static TriggerDispatcher, String> {
    DISPATCHER.get_or_try_init(|| {
        let config = CoreConfig::from_env();
        config.init_logging().map_err(|err| err.to_string())?;
        let db = config.open_datastore().map_err(|err| {
            error!("event=trigger_init module=triggers status=error error={err}");
            err.to_string()
        })?;
        Ok(TriggerDispatcher::new(db))
    })
}

/// Handles one change delivered as JSON
/// (`{"before": {"data": {...} | null}, "after": {...}}`). Returns the report
/// as JSON.
pub fn handle_change(collection: &str, id: &str, payload: &str) -> String {
    match dispatcher() {
        Ok(dispatcher) => dispatcher.handle_json(collection, id, payload),
        Err(err) => unavailable(collection, id, &err).to_json(),
    }
}

/// Routes a change by collection. See [`TriggerDispatcher::dispatch`].
pub fn on_change(collection: &str, id: &str, change: &Change) -> TriggerReport {
    match dispatcher() {
        Ok(dispatcher) => dispatcher.dispatch(collection, id, change),
        Err(err) => unavailable(collection, id, &err),
    }
}

fn unavailable(collection: &str, id: &str, err: &str) -> TriggerReport {
    let mut report = TriggerReport::new(format!("{collection}/{id}"));
    report.fail("dispatcher", "resolve", &err);
    report.message = format!("trigger dispatcher unavailable: {err}");
    report
}
