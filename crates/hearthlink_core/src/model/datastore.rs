//! Store + registry handle shared by every entity.

use crate::model::descriptor::ModelDescriptor;
use crate::model::entity::{Entity, EntityResult};
use crate::model::registry::ModelRegistry;
use crate::store::{DocumentStore, StoreResult, WriteBatch};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Cheap-to-clone pair of the injected store and the model registry.
#[derive(Clone)]
pub struct Datastore {
    store: Arc<dyn DocumentStore>,
    registry: Arc<ModelRegistry>,
}

impl Debug for Datastore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("models", &self.registry.len())
            .finish()
    }
}

impl Datastore {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<ModelRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Resolves `model_name` through the registry and returns a handle.
    pub fn entity(&self, model_name: &str, id: Option<&str>) -> EntityResult<Entity> {
        let model = self.registry.resolve(model_name)?;
        Ok(self.entity_for(model, id))
    }

    pub fn entity_for(&self, model: &'static ModelDescriptor, id: Option<&str>) -> Entity {
        Entity::new(self.clone(), model, id)
    }

    /// Loads `model_name/id`. A missing document still yields an entity,
    /// with `exists() == false`.
    pub fn find(&self, model_name: &str, id: &str) -> EntityResult<Entity> {
        let entity = self.entity(model_name, Some(id))?;
        entity.data()?;
        Ok(entity)
    }

    pub fn batch(&self) -> WriteBatch {
        self.store.new_batch()
    }

    pub fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        self.store.commit(batch)
    }
}
