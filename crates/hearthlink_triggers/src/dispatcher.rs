//! Document-change notifications to entity and relation calls.
//!
//! # Responsibility
//! - Route `(collection, id, Change)` to the created/written/deleted model
//!   handlers or to the pivot handler.
//! - Run every relation's `update_cache` and `take_action_on` under its own
//!   guard and collect failures into the report.
//!
//! # Invariants
//! - Handlers never panic and never return `Err`; failures live in the report.
//! - Secure mirror collections are never routed: their writes come from the
//!   relation layer itself.

use crate::report::TriggerReport;
use hearthlink_core::model::SECURE_SUFFIX;
use hearthlink_core::relation::pivot::PIVOT_SEPARATOR;
use hearthlink_core::{Change, Datastore, Entity, Pivot, Relation, Snapshot};
use log::{error, info};

const PIVOT_TARGET: &str = "pivot";

#[derive(Debug, Clone)]
pub struct TriggerDispatcher {
    db: Datastore,
}

impl TriggerDispatcher {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.db
    }

    /// Routes one notification by collection name and snapshot presence.
    pub fn dispatch(&self, collection: &str, id: &str, change: &Change) -> TriggerReport {
        let path = format!("{collection}/{id}");
        if collection.ends_with(SECURE_SUFFIX) {
            return TriggerReport::skipped(path, "secure mirror collection").finish();
        }
        if self.db.registry().by_collection(collection).is_none()
            && collection.contains(PIVOT_SEPARATOR)
        {
            return self.on_pivot_written(&path, change);
        }
        match (change.before.exists(), change.after.exists()) {
            (false, true) => self.on_document_created(collection, id, &change.after),
            (true, true) => self.on_document_written(collection, id, change),
            (true, false) => self.on_document_deleted(collection, id, &change.before),
            (false, false) => TriggerReport::skipped(path, "no snapshot on either side").finish(),
        }
    }

    /// Opens the secure mirror, then seeds relation caches from the new
    /// document.
    pub fn on_document_created(
        &self,
        collection: &str,
        id: &str,
        snapshot: &Snapshot,
    ) -> TriggerReport {
        let mut report = TriggerReport::new(format!("{collection}/{id}"));
        let Some(entity) = self.resolve(collection, id, snapshot, &mut report) else {
            return report.finish();
        };
        if let Err(err) = entity.on_create(None) {
            log_failure(&report.path, "on_create", &err);
            report.fail("on_create", "on_create", &err);
        }
        self.sync_relations(&entity, &Change::created(snapshot.clone()), &mut report);
        report.finish()
    }

    pub fn on_document_written(&self, collection: &str, id: &str, change: &Change) -> TriggerReport {
        let mut report = TriggerReport::new(format!("{collection}/{id}"));
        let Some(entity) = self.resolve(collection, id, &change.after, &mut report) else {
            return report.finish();
        };
        self.sync_relations(&entity, change, &mut report);
        report.finish()
    }

    /// Removes the secure mirror and runs relations against the deletion.
    pub fn on_document_deleted(
        &self,
        collection: &str,
        id: &str,
        snapshot: &Snapshot,
    ) -> TriggerReport {
        let mut report = TriggerReport::new(format!("{collection}/{id}"));
        let Some(entity) = self.resolve(collection, id, &Snapshot::missing(), &mut report) else {
            return report.finish();
        };
        if let Err(err) = entity.on_delete(None) {
            log_failure(&report.path, "on_delete", &err);
            report.fail("on_delete", "on_delete", &err);
        }
        self.sync_relations(&entity, &Change::deleted(snapshot.clone()), &mut report);
        report.finish()
    }

    /// Mirrors a pivot document change onto both sides through every
    /// many-to-many relation joining the two models.
    pub fn on_pivot_written(&self, path: &str, change: &Change) -> TriggerReport {
        let mut report = TriggerReport::new(path);
        let data = change.after.data().or_else(|| change.before.data());
        let pivot = match Pivot::from_document(&self.db, path, data) {
            Ok(pivot) => pivot,
            Err(err) => {
                log_failure(path, "resolve", &err);
                report.fail(PIVOT_TARGET, "resolve", &err);
                return report.finish();
            }
        };

        let entities = pivot.entities();
        for (side, entity) in entities.iter().enumerate() {
            let other = entities[1 - side].model();
            let relations = match entity.relations() {
                Ok(relations) => relations,
                Err(err) => {
                    log_failure(path, "resolve", &err);
                    report.fail(PIVOT_TARGET, "resolve", &err);
                    continue;
                }
            };
            for relation in relations {
                let Relation::ManyToMany(members) = relation else {
                    continue;
                };
                if members.core().property_model().name != other.name {
                    continue;
                }
                match members.update_cache_from_pivot(change, None) {
                    Ok(writes) => report.writes += writes,
                    Err(err) => {
                        let accessor = members.core().descriptor().accessor;
                        log_failure(path, "update_cache", &err);
                        report.fail(accessor, "update_cache", &err);
                    }
                }
            }
        }
        info!(
            "event=trigger_pivot module=triggers status={} path={path} writes={}",
            if report.ok { "ok" } else { "error" },
            report.writes
        );
        report.finish()
    }

    /// Parses a JSON `Change` payload and dispatches it. Returns the report
    /// as JSON.
    pub fn handle_json(&self, collection: &str, id: &str, payload: &str) -> String {
        match serde_json::from_str::<Change>(payload) {
            Ok(change) => self.dispatch(collection, id, &change).to_json(),
            Err(err) => {
                let mut report = TriggerReport::new(format!("{collection}/{id}"));
                report.fail("payload", "resolve", &err);
                report.finish().to_json()
            }
        }
    }

    fn resolve(
        &self,
        collection: &str,
        id: &str,
        snapshot: &Snapshot,
        report: &mut TriggerReport,
    ) -> Option<Entity> {
        match self.db.registry().by_collection(collection) {
            Some(model) => Some(Entity::with_snapshot(
                self.db.clone(),
                model,
                id,
                snapshot.data().cloned(),
            )),
            None => {
                report.skipped = true;
                report.message = format!("no model registered for `{collection}`");
                None
            }
        }
    }

    fn sync_relations(&self, entity: &Entity, change: &Change, report: &mut TriggerReport) {
        let relations = match entity.relations() {
            Ok(relations) => relations,
            Err(err) => {
                log_failure(&report.path, "resolve", &err);
                report.fail("relations", "resolve", &err);
                return;
            }
        };
        for relation in relations {
            let accessor = relation.accessor();
            match relation.update_cache(change, None) {
                Ok(writes) => report.writes += writes,
                Err(err) => {
                    log_failure(&report.path, "update_cache", &err);
                    report.fail(accessor, "update_cache", &err);
                }
            }
            match relation.take_action_on(change) {
                Ok(actions) => report.actions += actions,
                Err(err) => {
                    log_failure(&report.path, "take_action_on", &err);
                    report.fail(accessor, "take_action_on", &err);
                }
            }
        }
    }
}

fn log_failure(path: &str, stage: &str, err: &dyn std::fmt::Display) {
    error!("event=trigger_failure module=triggers status=error path={path} stage={stage} error={err}");
}

#[cfg(test)]
mod tests {
    use super::TriggerDispatcher;
    use hearthlink_core::model::household::household_registry;
    use hearthlink_core::{Change, Datastore, MemoryDocumentStore};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> TriggerDispatcher {
        TriggerDispatcher::new(Datastore::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(household_registry().unwrap()),
        ))
    }

    #[test]
    fn secure_collections_are_skipped() {
        let change = Change::from_values(json!({}), json!({"phone_secure": "1"}));
        let report = dispatcher().dispatch("users_secure", "U1", &change);
        assert!(report.skipped);
        assert!(report.ok);
    }

    #[test]
    fn unknown_collections_are_skipped() {
        let change = Change::from_values(json!({}), json!({"a": 1}));
        let report = dispatcher().dispatch("boats", "B1", &change);
        assert!(report.skipped);
        assert_eq!(report.writes, 0);
    }

    #[test]
    fn malformed_pivot_id_is_reported() {
        let change = Change::from_values(json!({}), json!({}));
        let report = dispatcher().dispatch("households_users", "H1U1", &change);
        assert!(!report.ok);
        assert_eq!(report.failures[0].stage, "resolve");
    }
}
