//! Relational layer over a schemaless document store, plus the household
//! schema and services built on it.

pub mod action;
pub mod config;
pub mod db;
pub mod document;
pub mod logging;
pub mod model;
pub mod relation;
pub mod service;
pub mod store;

pub use action::{ActionableFields, Command, CommandError, CommandResult, FnCommand};
pub use config::{ConfigError, CoreConfig};
pub use document::{Change, Document, FieldPath, FieldValue, Patch, Snapshot};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    Datastore, Entity, EntityError, EntityResult, ModelDescriptor, ModelRegistry,
    RegistryError, RelationDescriptor, RelationKind,
};
pub use relation::{
    ManyToMany, ManyToOne, OneToMany, Pivot, PivotPath, PivotPathError, Relation,
    RelationError, RelationResult,
};
pub use service::{HouseholdService, PolicyError, ServiceError, ServiceResult};
pub use store::{
    DocumentStore, Filter, FilterOp, MemoryDocumentStore, SqliteDocumentStore, StoreError,
    StoreResult, WriteBatch, WriteOp,
};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
