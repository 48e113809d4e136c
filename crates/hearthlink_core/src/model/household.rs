//! Household schema: users, households and their sensors.
//!
//! - `household.sensors` / `sensor.household`: one household owns many
//!   sensors; the sensor's `battery` and `status` are cached on the
//!   household, the household `name` on each sensor.
//! - `household.users` / `user.households`: members, with a shared pivot
//!   record carrying the member `role`.

use crate::model::descriptor::{ModelDescriptor, RelationDescriptor};
use crate::model::registry::{ModelRegistry, RegistryResult};

static USER_RELATIONS: [RelationDescriptor; 1] = [RelationDescriptor::many_to_many(
    "households",
    "household",
)
.inverse("users")
.cache(&["displayName", "phone_secure"])];

static HOUSEHOLD_RELATIONS: [RelationDescriptor; 2] = [
    RelationDescriptor::one_to_many("sensors", "sensor")
        .inverse("household")
        .cache(&["name"]),
    RelationDescriptor::many_to_many("users", "user")
        .inverse("households")
        .cache(&["name"])
        .cache_pivot(&["role"]),
];

static SENSOR_RELATIONS: [RelationDescriptor; 1] = [RelationDescriptor::many_to_one(
    "household",
    "household",
)
.inverse("sensors")
.cache(&["battery", "status"])];

pub static USER: ModelDescriptor = ModelDescriptor::new("user", "User", "users")
    .with_secure_data()
    .with_relations(&USER_RELATIONS);

pub static HOUSEHOLD: ModelDescriptor = ModelDescriptor::new("household", "Household", "households")
    .with_secure_data()
    .with_relations(&HOUSEHOLD_RELATIONS);

pub static SENSOR: ModelDescriptor =
    ModelDescriptor::new("sensor", "Sensor", "sensors").with_relations(&SENSOR_RELATIONS);

/// Every model of the household schema.
pub static HOUSEHOLD_MODELS: [&ModelDescriptor; 3] = [&USER, &HOUSEHOLD, &SENSOR];

/// Registry holding the household schema.
pub fn household_registry() -> RegistryResult<ModelRegistry> {
    ModelRegistry::with_models(&HOUSEHOLD_MODELS)
}

#[cfg(test)]
pub(crate) fn household_datastore() -> (
    crate::model::Datastore,
    std::sync::Arc<crate::store::MemoryDocumentStore>,
) {
    use std::sync::Arc;

    let store = Arc::new(crate::store::MemoryDocumentStore::new());
    let registry = household_registry().expect("household schema must register");
    (
        crate::model::Datastore::new(store.clone(), Arc::new(registry)),
        store,
    )
}
