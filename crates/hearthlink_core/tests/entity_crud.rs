use hearthlink_core::model::household::{household_registry, HOUSEHOLD};
use hearthlink_core::{
    Datastore, DocumentStore, Entity, EntityError, MemoryDocumentStore, RegistryError,
    StoreError,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn setup() -> (Datastore, Arc<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let registry = household_registry().unwrap();
    (Datastore::new(store.clone(), Arc::new(registry)), store)
}

fn doc(store: &MemoryDocumentStore, collection: &str, id: &str) -> Option<Value> {
    store
        .get_document(collection, id)
        .unwrap()
        .map(Value::Object)
}

#[test]
fn create_then_find_reads_back_fields() {
    let (db, _) = setup();
    let sensor = db.entity("sensors", Some("S1")).unwrap();
    sensor
        .create(json!({"name": "Hall", "battery": 90}), None)
        .unwrap();

    let found = db.find("sensor", "S1").unwrap();
    assert!(found.exists().unwrap());
    assert_eq!(found.get_field("battery").unwrap(), Some(json!(90)));
    assert_eq!(found.path().unwrap(), "sensors/S1");
}

#[test]
fn create_without_id_generates_one() {
    let (db, store) = setup();
    let sensor = db.entity("Sensor", None).unwrap();
    assert_eq!(sensor.id(), None);

    let id = sensor.create(json!({"name": "Porch"}), None).unwrap().to_string();

    assert!(!id.is_empty());
    assert_eq!(store.ids("sensors"), vec![id]);
}

#[test]
fn update_patches_leaves_and_keeps_siblings() {
    let (db, store) = setup();
    let household = db.entity("household", Some("H1")).unwrap();
    household
        .create(json!({"name": "Home", "address": {"city": "Oslo", "zip": "0150"}}), None)
        .unwrap();

    household
        .update(&json!({"address": {"zip": "0151"}}), None)
        .unwrap();

    assert_eq!(
        doc(&store, "households", "H1").unwrap()["address"],
        json!({"city": "Oslo", "zip": "0151"})
    );
    assert_eq!(household.get_field("address.zip").unwrap(), Some(json!("0151")));
}

#[test]
fn update_of_missing_document_fails_and_merge_creates_it() {
    let (db, store) = setup();
    let sensor = db.entity("sensor", Some("S9")).unwrap();

    let err = sensor.update(&json!({"battery": 10}), None).unwrap_err();
    assert!(matches!(err, EntityError::Store(StoreError::NotFound { .. })));

    sensor
        .update_or_create(&json!({"battery": 10}), None)
        .unwrap();
    assert_eq!(doc(&store, "sensors", "S9").unwrap(), json!({"battery": 10}));
}

#[test]
fn delete_removes_document() {
    let (db, store) = setup();
    let sensor = db.entity("sensor", Some("S1")).unwrap();
    sensor.create(json!({"name": "Hall"}), None).unwrap();

    sensor.delete(None).unwrap();

    assert_eq!(doc(&store, "sensors", "S1"), None);
    assert!(!sensor.exists().unwrap());
}

#[test]
fn find_of_missing_document_is_not_an_error() {
    let (db, _) = setup();
    let missing = db.find("sensor", "nope").unwrap();
    assert!(!missing.exists().unwrap());
    assert_eq!(missing.data().unwrap(), None);
    assert_eq!(missing.get_field("name").unwrap(), None);
}

#[test]
fn unknown_model_is_rejected() {
    let (db, _) = setup();
    let err = db.entity("boats", None).unwrap_err();
    assert!(matches!(
        err,
        EntityError::Registry(RegistryError::UnknownModel(_))
    ));
}

#[test]
fn bound_id_cannot_change() {
    let (db, _) = setup();
    let sensor = db.entity("sensor", Some("S1")).unwrap();
    assert_eq!(sensor.bind_id("S1").unwrap(), "S1");
    assert!(matches!(
        sensor.bind_id("S2"),
        Err(EntityError::IdAlreadyBound { .. })
    ));

    let unbound = db.entity("sensor", None).unwrap();
    assert!(matches!(
        unbound.require_id(),
        Err(EntityError::UnboundId { model: "sensor" })
    ));
}

#[test]
fn find_where_filters_by_field() {
    let (db, _) = setup();
    for (id, battery) in [("S1", 90), ("S2", 15), ("S3", 5)] {
        db.entity("sensor", Some(id))
            .unwrap()
            .create(json!({"battery": battery}), None)
            .unwrap();
    }

    let low = Entity::find_where(&db, "sensor", "battery", "<", json!(20)).unwrap();
    let ids: Vec<&str> = low.iter().filter_map(Entity::id).collect();
    assert_eq!(ids, vec!["S2", "S3"]);
    assert_eq!(low[0].get_field("battery").unwrap(), Some(json!(15)));

    assert!(Entity::find_where(&db, "sensor", "battery", "~", json!(1)).is_err());
}

#[test]
fn from_reference_reads_id_object() {
    let (db, _) = setup();
    let household = Entity::from_reference(db.clone(), &HOUSEHOLD, &json!({"id": "H1"})).unwrap();
    assert_eq!(household.id(), Some("H1"));
    assert!(Entity::from_reference(db, &HOUSEHOLD, &json!({"name": "x"})).is_none());
}

#[test]
fn secure_mirror_follows_create_and_delete_hooks() {
    let (db, store) = setup();
    let household = db.entity("household", Some("H1")).unwrap();
    household.create(json!({"name": "Home"}), None).unwrap();
    household.on_create(None).unwrap();
    assert_eq!(doc(&store, "households_secure", "H1"), Some(json!({})));

    household.on_delete(None).unwrap();
    assert_eq!(household.secure_data().unwrap(), None);

    let sensor = db.entity("sensor", Some("S1")).unwrap();
    sensor.create(json!({}), None).unwrap();
    sensor.on_create(None).unwrap();
    assert!(store.ids("sensors_secure").is_empty());
}

#[test]
fn batched_writes_stay_invisible_until_commit() {
    let (db, store) = setup();
    let mut batch = db.batch();
    let a = db.entity("sensor", Some("S1")).unwrap();
    let b = db.entity("sensor", Some("S2")).unwrap();

    a.create(json!({"battery": 1}), Some(&mut batch)).unwrap();
    b.create(json!({"battery": 2}), Some(&mut batch)).unwrap();
    assert!(store.ids("sensors").is_empty());

    db.commit(batch).unwrap();
    assert_eq!(store.ids("sensors"), vec!["S1", "S2"]);
}

#[test]
fn failing_batch_applies_nothing() {
    let (db, store) = setup();
    let mut batch = db.batch();
    db.entity("sensor", Some("S1"))
        .unwrap()
        .create(json!({"battery": 1}), Some(&mut batch))
        .unwrap();
    db.entity("sensor", Some("ghost"))
        .unwrap()
        .update(&json!({"battery": 2}), Some(&mut batch))
        .unwrap();

    assert!(db.commit(batch).is_err());
    assert!(store.ids("sensors").is_empty());
}
