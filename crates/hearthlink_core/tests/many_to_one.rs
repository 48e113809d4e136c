use hearthlink_core::model::household::household_registry;
use hearthlink_core::{Change, Datastore, DocumentStore, Entity, MemoryDocumentStore};
use serde_json::{json, Value};
use std::sync::Arc;

fn setup() -> (Datastore, Arc<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let registry = household_registry().unwrap();
    (Datastore::new(store.clone(), Arc::new(registry)), store)
}

fn create(db: &Datastore, model: &str, id: &str, data: Value) -> Entity {
    let entity = db.entity(model, Some(id)).unwrap();
    entity.create(data, None).unwrap();
    entity
}

fn doc(store: &MemoryDocumentStore, collection: &str, id: &str) -> Value {
    Value::Object(store.get_document(collection, id).unwrap().unwrap())
}

#[test]
fn set_links_both_sides() {
    let (db, store) = setup();
    let household = create(&db, "household", "H1", json!({"name": "Home"}));
    let sensor = create(&db, "sensor", "S1", json!({"battery": 90}));

    let relation = sensor.many_to_one("household").unwrap();
    relation.set(&household, None).unwrap();

    assert_eq!(doc(&store, "sensors", "S1")["household"], json!({"id": "H1"}));
    assert_eq!(doc(&store, "households", "H1")["sensor"], json!({"S1": true}));
    assert_eq!(relation.id().unwrap(), Some("H1".to_string()));
    assert_eq!(relation.get().unwrap().unwrap().id(), Some("H1"));
}

#[test]
fn moving_to_another_target_strips_old_back_reference() {
    let (db, store) = setup();
    let h1 = create(&db, "household", "H1", json!({}));
    let h2 = create(&db, "household", "H2", json!({}));
    let sensor = create(&db, "sensor", "S1", json!({}));
    let relation = sensor.many_to_one("household").unwrap();

    relation.set(&h1, None).unwrap();
    relation.set(&h2, None).unwrap();

    assert_eq!(doc(&store, "households", "H1")["sensor"], json!({}));
    assert_eq!(doc(&store, "households", "H2")["sensor"], json!({"S1": true}));
    assert_eq!(doc(&store, "sensors", "S1")["household"], json!({"id": "H2"}));
}

#[test]
fn relinking_same_target_keeps_pivot_data() {
    let (db, store) = setup();
    let household = create(&db, "household", "H1", json!({}));
    let sensor = create(&db, "sensor", "S1", json!({}));
    let relation = sensor.many_to_one("household").unwrap();
    relation.set(&household, None).unwrap();
    relation.update_pivot(&json!({"flat": "2A"}), None).unwrap();

    relation.set(&household, None).unwrap();

    assert_eq!(
        doc(&store, "sensors", "S1")["household"],
        json!({"id": "H1", "pivot": {"flat": "2A"}})
    );
    assert_eq!(
        relation.get_pivot_field("flat").unwrap(),
        Some(json!("2A"))
    );
}

#[test]
fn unset_clears_both_sides() {
    let (db, store) = setup();
    let household = create(&db, "household", "H1", json!({}));
    let sensor = create(&db, "sensor", "S1", json!({}));
    let relation = sensor.many_to_one("household").unwrap();
    relation.set(&household, None).unwrap();

    relation.unset(None).unwrap();

    assert!(doc(&store, "sensors", "S1").get("household").is_none());
    assert_eq!(doc(&store, "households", "H1")["sensor"], json!({}));
    assert_eq!(relation.id().unwrap(), None);
    relation.unset(None).unwrap();
}

#[test]
fn update_cache_writes_owner_fields_into_target_entry() {
    let (db, store) = setup();
    let household = create(&db, "household", "H1", json!({}));
    let sensor = create(&db, "sensor", "S1", json!({"battery": 80}));
    sensor
        .many_to_one("household")
        .unwrap()
        .set(&household, None)
        .unwrap();

    let change = Change::from_values(
        json!({"battery": 80, "household": {"id": "H1"}}),
        json!({"battery": 75, "status": "ok", "household": {"id": "H1"}}),
    );
    let writes = sensor
        .many_to_one("household")
        .unwrap()
        .update_cache(&change, None)
        .unwrap();

    assert_eq!(writes, 1);
    assert_eq!(
        doc(&store, "households", "H1")["sensor"]["S1"],
        json!({"battery": 75, "status": "ok"})
    );
}

#[test]
fn batched_set_applies_nothing_until_commit() {
    let (db, store) = setup();
    let household = create(&db, "household", "H1", json!({}));
    let sensor = create(&db, "sensor", "S1", json!({}));
    let mut batch = db.batch();

    sensor
        .many_to_one("household")
        .unwrap()
        .set(&household, Some(&mut batch))
        .unwrap();
    assert!(doc(&store, "sensors", "S1").get("household").is_none());
    assert_eq!(batch.len(), 2);

    db.commit(batch).unwrap();
    assert_eq!(doc(&store, "sensors", "S1")["household"], json!({"id": "H1"}));
    assert_eq!(doc(&store, "households", "H1")["sensor"], json!({"S1": true}));
}
