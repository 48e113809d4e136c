use hearthlink_core::model::household::household_registry;
use hearthlink_core::{
    Change, Datastore, DocumentStore, Entity, MemoryDocumentStore, ModelDescriptor, ModelRegistry,
    RelationDescriptor,
};
use serde_json::{json, Value};
use std::sync::Arc;

static CAR_RELATIONS: [RelationDescriptor; 1] = [RelationDescriptor::one_to_many(
    "wheels", "wheel",
)
.inverse("car")
.cache(&["name", "features"])];
static CAR: ModelDescriptor =
    ModelDescriptor::new("car", "Car", "cars").with_relations(&CAR_RELATIONS);
static WHEEL_RELATIONS: [RelationDescriptor; 1] =
    [RelationDescriptor::many_to_one("car", "car").inverse("wheels")];
static WHEEL: ModelDescriptor =
    ModelDescriptor::new("wheel", "Wheel", "wheels").with_relations(&WHEEL_RELATIONS);

fn setup_garage() -> (Datastore, Arc<MemoryDocumentStore>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let registry = ModelRegistry::with_models(&[&CAR, &WHEEL]).unwrap();
    (Datastore::new(store.clone(), Arc::new(registry)), store)
}

fn setup_households() -> (Datastore, Arc<MemoryDocumentStore>) {
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

/// Car C1 linked to wheel W1.
fn linked_car(db: &Datastore) -> Entity {
    let car = create(db, "car", "C1", json!({"name": "Herbie"}));
    let wheel = create(db, "wheel", "W1", json!({"size": 17}));
    car.one_to_many("wheels")
        .unwrap()
        .attach(&wheel, None, None)
        .unwrap();
    car
}

#[test]
fn owner_field_change_lands_in_property_back_reference() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    let change = Change::from_values(
        json!({"name": "Herbie", "wheel": {"W1": true}}),
        json!({"name": "Herbie II", "wheel": {"W1": true}}),
    );

    let writes = car.relation("wheels").unwrap().update_cache(&change, None).unwrap();

    assert_eq!(writes, 1);
    assert_eq!(
        doc(&store, "wheels", "W1")["car"],
        json!({"id": "C1", "name": "Herbie II"})
    );
}

#[test]
fn replaying_a_change_converges_to_same_state() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    let change = Change::from_values(
        json!({"name": "Herbie", "wheel": {"W1": true}}),
        json!({"name": "Herbie II", "wheel": {"W1": true}}),
    );
    let relation = car.relation("wheels").unwrap();

    relation.update_cache(&change, None).unwrap();
    let first = doc(&store, "wheels", "W1");
    relation.update_cache(&change, None).unwrap();

    assert_eq!(doc(&store, "wheels", "W1"), first);
}

#[test]
fn unrelated_field_change_writes_nothing() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    let before = store.write_count();
    let change = Change::from_values(
        json!({"name": "Herbie", "mileage": 10, "wheel": {"W1": true}}),
        json!({"name": "Herbie", "mileage": 11, "wheel": {"W1": true}}),
    );

    let writes = car.relation("wheels").unwrap().update_cache(&change, None).unwrap();

    assert_eq!(writes, 0);
    assert_eq!(store.write_count(), before);
}

#[test]
fn removed_nested_key_is_deleted_downstream() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    let relation = car.relation("wheels").unwrap();
    let created = Change::from_values(
        Value::Null,
        json!({"name": "Herbie", "features": {"x": true, "y": true}, "wheel": {"W1": true}}),
    );
    relation.update_cache(&created, None).unwrap();
    assert_eq!(
        doc(&store, "wheels", "W1")["car"]["features"],
        json!({"x": true, "y": true})
    );

    let shrunk = Change::from_values(
        json!({"name": "Herbie", "features": {"x": true, "y": true}, "wheel": {"W1": true}}),
        json!({"name": "Herbie", "features": {"x": true}, "wheel": {"W1": true}}),
    );
    relation.update_cache(&shrunk, None).unwrap();

    assert_eq!(doc(&store, "wheels", "W1")["car"]["features"], json!({"x": true}));
}

#[test]
fn new_entry_receives_every_cached_field() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    let spare = create(&db, "wheel", "W2", json!({}));
    car.one_to_many("wheels")
        .unwrap()
        .attach(&spare, None, None)
        .unwrap();
    let change = Change::from_values(
        json!({"name": "Herbie", "features": {"x": true}, "wheel": {"W1": true}}),
        json!({"name": "Herbie", "features": {"x": true}, "wheel": {"W1": true, "W2": true}}),
    );

    let writes = car.relation("wheels").unwrap().update_cache(&change, None).unwrap();

    assert_eq!(writes, 1);
    assert_eq!(
        doc(&store, "wheels", "W2")["car"],
        json!({"id": "C1", "name": "Herbie", "features": {"x": true}})
    );
}

#[test]
fn detached_property_is_not_written() {
    let (db, store) = setup_garage();
    let car = linked_car(&db);
    car.one_to_many("wheels").unwrap().detach(None).unwrap();
    let before = store.write_count();
    let change = Change::from_values(
        json!({"name": "Herbie", "wheel": {"W1": true}}),
        json!({"name": "Herbie II", "wheel": {"W1": true}}),
    );

    let writes = car.relation("wheels").unwrap().update_cache(&change, None).unwrap();

    assert_eq!(writes, 0);
    assert_eq!(store.write_count(), before);
    assert!(doc(&store, "wheels", "W1").get("car").is_none());
}

#[test]
fn secure_fields_route_to_secure_mirror() {
    let (db, store) = setup_households();
    let household = create(&db, "household", "H1", json!({"name": "Home"}));
    let user = create(&db, "user", "U1", json!({"displayName": "Ada"}));
    user.many_to_many("households")
        .unwrap()
        .attach(&household, None, None)
        .unwrap();
    let change = Change::from_values(
        json!({"displayName": "Ada", "household": {"H1": true}}),
        json!({"displayName": "Ada L", "phone_secure": "555", "household": {"H1": true}}),
    );

    let writes = user
        .relation("households")
        .unwrap()
        .update_cache(&change, None)
        .unwrap();

    assert_eq!(writes, 2);
    assert_eq!(doc(&store, "households", "H1")["user"]["U1"], json!({"displayName": "Ada L"}));
    assert_eq!(
        doc(&store, "households_secure", "H1"),
        json!({"user": {"U1": {"phone_secure": "555"}}})
    );
}

#[test]
fn owner_pivot_change_reaches_member_and_pivot_record() {
    let (db, store) = setup_households();
    let household = create(&db, "household", "H1", json!({"name": "Home"}));
    let user = create(&db, "user", "U1", json!({}));
    household
        .many_to_many("users")
        .unwrap()
        .attach(&user, Some(json!({"pivot": {"role": "member"}})), None)
        .unwrap();
    let change = Change::from_values(
        json!({"name": "Home", "user": {"U1": {"pivot": {"role": "member"}}}}),
        json!({"name": "Home", "user": {"U1": {"pivot": {"role": "admin"}}}}),
    );

    let writes = household
        .relation("users")
        .unwrap()
        .update_cache(&change, None)
        .unwrap();

    assert_eq!(writes, 2);
    assert_eq!(
        doc(&store, "users", "U1")["household"]["H1"],
        json!({"pivot": {"role": "admin"}})
    );
    assert_eq!(
        doc(&store, "households_users", "H1_U1"),
        json!({"household": {"id": "H1"}, "user": {"id": "U1"}, "pivot": {"role": "admin"}})
    );
}

#[test]
fn pivot_record_change_reaches_both_sides() {
    let (db, store) = setup_households();
    let household = create(&db, "household", "H1", json!({}));
    let user = create(&db, "user", "U1", json!({}));
    household
        .many_to_many("users")
        .unwrap()
        .attach(&user, None, None)
        .unwrap();
    let change = Change::from_values(
        json!({"household": {"id": "H1"}, "user": {"id": "U1"}, "pivot": {"role": "member"}}),
        json!({"household": {"id": "H1"}, "user": {"id": "U1"}, "pivot": {"role": "admin"}}),
    );

    let writes = household
        .many_to_many("users")
        .unwrap()
        .update_cache_from_pivot(&change, None)
        .unwrap();

    assert_eq!(writes, 2);
    assert_eq!(
        doc(&store, "households", "H1")["user"]["U1"],
        json!({"pivot": {"role": "admin"}})
    );
    assert_eq!(
        doc(&store, "users", "U1")["household"]["H1"],
        json!({"pivot": {"role": "admin"}})
    );
}
