use hearthlink_core::model::household::{household_registry, SENSOR};
use hearthlink_core::{
    Change, Command, CommandError, CommandResult, Datastore, Entity, FnCommand,
    MemoryDocumentStore, ModelRegistry, RelationError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn datastore(registry: ModelRegistry) -> Datastore {
    Datastore::new(Arc::new(MemoryDocumentStore::new()), Arc::new(registry))
}

fn recorder(name: &str) -> (Arc<dyn Command>, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let command: Arc<dyn Command> = Arc::new(FnCommand::new(
        name,
        move |_owner: &Entity, value: &Value| -> CommandResult<()> {
            sink.lock().unwrap().push(value.clone());
            Ok(())
        },
    ));
    (command, seen)
}

fn pivot_change(before: Value, after: Value) -> Change {
    Change::from_values(
        json!({"household": {"id": "H1", "pivot": before}}),
        json!({"household": {"id": "H1", "pivot": after}}),
    )
}

#[test]
fn command_runs_only_when_its_field_changes() {
    let db = datastore(household_registry().unwrap());
    let sensor = db.entity_for(&SENSOR, Some("S1"));
    let (command, seen) = recorder("flat");
    let relation = sensor.many_to_one("household").unwrap();
    relation.core().register_action("flat", command);

    let unrelated = pivot_change(json!({"flat": "2A", "floor": 1}), json!({"flat": "2A", "floor": 2}));
    assert_eq!(relation.take_action_on(&unrelated).unwrap(), 0);

    let moved = pivot_change(json!({"flat": "2A", "floor": 1}), json!({"flat": "2B", "floor": 1}));
    assert_eq!(relation.take_action_on(&moved).unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![json!("2B")]);
}

#[test]
fn object_field_command_receives_whole_new_value() {
    let db = datastore(household_registry().unwrap());
    let sensor = db.entity_for(&SENSOR, Some("S1"));
    let (command, seen) = recorder("schedule");
    let relation = sensor.many_to_one("household").unwrap();
    relation.core().register_action("schedule", command);

    let change = pivot_change(
        json!({"schedule": {"mon": "08:00", "tue": "08:00"}}),
        json!({"schedule": {"mon": "08:00", "tue": "09:30"}}),
    );
    assert_eq!(relation.take_action_on(&change).unwrap(), 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!({"mon": "08:00", "tue": "09:30"})]
    );
}

#[test]
fn missing_pivot_dispatches_nothing() {
    let db = datastore(household_registry().unwrap());
    let sensor = db.entity_for(&SENSOR, Some("S1"));
    let (command, seen) = recorder("flat");
    let relation = sensor.many_to_one("household").unwrap();
    relation.core().register_action("flat", command);

    let change = Change::from_values(
        json!({"household": {"id": "H1"}}),
        json!({"household": {"id": "H2"}}),
    );
    assert_eq!(relation.take_action_on(&change).unwrap(), 0);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn configuration_sticks_to_the_relation_instance() {
    let db = datastore(household_registry().unwrap());
    let sensor = db.entity_for(&SENSOR, Some("S1"));
    let (command, seen) = recorder("flat");
    sensor
        .relation("household")
        .unwrap()
        .register_action("flat", command);

    let again = sensor.many_to_one("household").unwrap();
    let change = pivot_change(json!({"flat": "1A"}), json!({"flat": "3C"}));
    assert_eq!(again.take_action_on(&change).unwrap(), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);

    let other = db.entity_for(&SENSOR, Some("S2"));
    assert_eq!(
        other
            .many_to_one("household")
            .unwrap()
            .take_action_on(&change)
            .unwrap(),
        0
    );
}

#[test]
fn registry_bindings_reach_every_instance() {
    let mut registry = household_registry().unwrap();
    let (command, seen) = recorder("flat");
    registry
        .register_command("sensor", "household", "flat", command)
        .unwrap();
    let db = datastore(registry);
    let change = pivot_change(json!({"flat": "1A"}), json!({"flat": "1B"}));

    for id in ["S1", "S2"] {
        let sensor = db.entity_for(&SENSOR, Some(id));
        assert_eq!(
            sensor
                .many_to_one("household")
                .unwrap()
                .take_action_on(&change)
                .unwrap(),
            1
        );
    }
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn failing_command_surfaces_to_caller() {
    let db = datastore(household_registry().unwrap());
    let sensor = db.entity_for(&SENSOR, Some("S1"));
    let failing: Arc<dyn Command> = Arc::new(FnCommand::new(
        "flat",
        |_owner: &Entity, _value: &Value| -> CommandResult<()> {
            Err(CommandError::Failed {
                command: "flat".to_string(),
                message: "door sensor offline".to_string(),
            })
        },
    ));
    let relation = sensor.many_to_one("household").unwrap();
    relation.core().register_action("flat", failing);

    let change = pivot_change(json!({"flat": "1A"}), json!({"flat": "1B"}));
    let err = relation.take_action_on(&change).unwrap_err();
    assert!(matches!(err, RelationError::Command(CommandError::Failed { .. })));
}

#[test]
fn undo_is_unimplemented_by_default() {
    let (command, _) = recorder("flat");
    assert!(matches!(command.undo(), Err(CommandError::Unimplemented(name)) if name == "flat"));
}

#[test]
fn many_to_many_dispatches_per_member_pivot() {
    let db = datastore(household_registry().unwrap());
    let household = db.entity("household", Some("H1")).unwrap();
    let (role_command, roles) = recorder("role");
    let (update_command, updates) = recorder("members_changed");
    let users = household.many_to_many("users").unwrap();
    users.core().register_action("role", role_command);
    users.core().on_update(update_command);

    let change = Change::from_values(
        json!({"user": {"U1": {"pivot": {"role": "member"}}, "U2": true}}),
        json!({"user": {"U1": {"pivot": {"role": "admin"}}, "U2": true}}),
    );

    assert_eq!(users.take_action_on(&change).unwrap(), 2);
    assert_eq!(*roles.lock().unwrap(), vec![json!("admin")]);
    assert_eq!(
        *updates.lock().unwrap(),
        vec![json!({"U1": {"pivot": {"role": "admin"}}})]
    );
}
