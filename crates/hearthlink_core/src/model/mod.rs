//! Entity model: descriptors, registry and entity handles.

pub mod datastore;
pub mod descriptor;
pub mod entity;
pub mod household;
pub mod registry;

pub use datastore::Datastore;
pub use descriptor::{
    is_secure_field, secure_collection_name, ModelDescriptor, RelationDescriptor, RelationKind,
    SECURE_SUFFIX,
};
pub use entity::{Entity, EntityError, EntityResult};
pub use registry::{infer_type_name, ModelRegistry, RegistryError, RegistryResult};
