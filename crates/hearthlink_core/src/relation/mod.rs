//! Relations between entities.
//!
//! # Responsibility
//! - Resolve the denormalized reference field an owner keeps for one
//!   declared relation and read it (`cache`).
//! - Memoize relation state per (owner, accessor) so cacheable-field and
//!   actionable-field configuration sticks to the instance.
//! - Share owner-to-property cache propagation and field-command dispatch
//!   across the three multiplicity variants.
//!
//! # Invariants
//! - The reference field on a document is named after the related model
//!   (`car.wheel`, `wheel.car`).
//! - Cache propagation never writes to a document that no longer links
//!   back to the owner.
//! - Errors from cache writes and commands propagate to the caller.

use crate::action::{ActionableFields, Command, CommandError};
use crate::document::diff::updated_entries;
use crate::document::{Change, DocumentError, FieldPath, Patch};
use crate::model::{
    Datastore, Entity, EntityError, ModelDescriptor, RegistryError, RelationDescriptor,
    RelationKind,
};
use crate::store::{StoreError, StoreResult, WriteBatch, WriteOp};
use log::debug;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;

pub mod cache;
pub mod many_to_many;
pub mod many_to_one;
pub mod one_to_many;
pub mod pivot;

use cache::{cache_patches, CachePatches};
pub use many_to_many::ManyToMany;
pub use many_to_one::ManyToOne;
pub use one_to_many::OneToMany;
pub use pivot::{pivot_identity, Pivot, PivotPath, PivotPathError};

pub type RelationResult<T> = Result<T, RelationError>;

#[derive(Debug)]
pub enum RelationError {
    Entity(EntityError),
    Document(DocumentError),
    Registry(RegistryError),
    Pivot(PivotPathError),
    Command(CommandError),
    UnknownRelation {
        model: &'static str,
        accessor: String,
    },
    KindMismatch {
        accessor: &'static str,
        expected: RelationKind,
        actual: RelationKind,
    },
    /// Pivot path is not the sorted identity of the pair it names.
    NonCanonicalPivot(String),
}

impl Display for RelationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Pivot(err) => write!(f, "{err}"),
            Self::Command(err) => write!(f, "{err}"),
            Self::UnknownRelation { model, accessor } => {
                write!(f, "model `{model}` declares no relation `{accessor}`")
            }
            Self::KindMismatch {
                accessor,
                expected,
                actual,
            } => write!(
                f,
                "relation `{accessor}` is {}, not {}",
                actual.label(),
                expected.label()
            ),
            Self::NonCanonicalPivot(path) => {
                write!(f, "pivot path `{path}` does not match the sorted identity of its pair")
            }
        }
    }
}

impl Error for RelationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Entity(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Pivot(err) => Some(err),
            Self::Command(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EntityError> for RelationError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

impl From<StoreError> for RelationError {
    fn from(value: StoreError) -> Self {
        Self::Entity(EntityError::Store(value))
    }
}

impl From<DocumentError> for RelationError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<RegistryError> for RelationError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<PivotPathError> for RelationError {
    fn from(value: PivotPathError) -> Self {
        Self::Pivot(value)
    }
}

impl From<CommandError> for RelationError {
    fn from(value: CommandError) -> Self {
        Self::Command(value)
    }
}

/// Per-(owner, accessor) configuration, shared by every handle to it.
#[derive(Debug)]
pub struct RelationState {
    descriptor: &'static RelationDescriptor,
    owner_model: &'static ModelDescriptor,
    property_model: &'static ModelDescriptor,
    cache_fields: RefCell<Vec<FieldPath>>,
    pivot_cache_fields: RefCell<Vec<FieldPath>>,
    actions: RefCell<ActionableFields>,
}

impl RelationState {
    fn new(
        descriptor: &'static RelationDescriptor,
        owner_model: &'static ModelDescriptor,
        property_model: &'static ModelDescriptor,
        actions: ActionableFields,
    ) -> Self {
        Self {
            descriptor,
            owner_model,
            property_model,
            cache_fields: RefCell::new(
                descriptor
                    .cache_fields
                    .iter()
                    .map(|field| FieldPath::parse(field))
                    .collect(),
            ),
            pivot_cache_fields: RefCell::new(
                descriptor
                    .pivot_cache_fields
                    .iter()
                    .map(|field| FieldPath::parse(field))
                    .collect(),
            ),
            actions: RefCell::new(actions),
        }
    }
}

/// Owner handle plus the memoized relation state.
#[derive(Debug, Clone)]
pub struct RelationCore<'a> {
    owner: &'a Entity,
    state: Rc<RelationState>,
}

impl<'a> RelationCore<'a> {
    pub fn owner(&self) -> &'a Entity {
        self.owner
    }

    pub fn descriptor(&self) -> &'static RelationDescriptor {
        self.state.descriptor
    }

    pub fn kind(&self) -> RelationKind {
        self.state.descriptor.kind
    }

    pub fn owner_model(&self) -> &'static ModelDescriptor {
        self.state.owner_model
    }

    pub fn property_model(&self) -> &'static ModelDescriptor {
        self.state.property_model
    }

    /// Reference field on the owner document.
    pub fn field(&self) -> FieldPath {
        FieldPath::from_segments([self.state.property_model.name])
    }

    /// Owner-side entry for one property id.
    pub fn entry_path(&self, property_id: &str) -> FieldPath {
        self.field().child(property_id)
    }

    /// Writes `data` into one owner entry. Object payloads are merged leaf
    /// by leaf so cached siblings already on the entry survive.
    pub(crate) fn entry_patch(&self, property_id: &str, data: Value) -> RelationResult<Patch> {
        let entry = self.entry_path(property_id);
        Ok(match &data {
            Value::Object(map) if !map.is_empty() => Patch::flatten_under(&entry, &data)?,
            _ => Patch::new().with_set(entry, data),
        })
    }

    /// Location on the related document that refers back to the owner.
    pub fn back_ref_path(&self, owner_id: &str) -> FieldPath {
        let owner_field = FieldPath::from_segments([self.state.owner_model.name]);
        match self.kind() {
            RelationKind::OneToMany => owner_field,
            RelationKind::ManyToOne | RelationKind::ManyToMany => owner_field.child(owner_id),
        }
    }

    /// Reads the owner's reference field, narrowed to one entry when `id`
    /// is given.
    pub fn cache(&self, id: Option<&str>) -> RelationResult<Option<Value>> {
        let path = match id {
            Some(id) => self.entry_path(id),
            None => self.field(),
        };
        Ok(self.owner.get_field(path)?)
    }

    /// Ids currently referenced by the owner document.
    pub fn referenced_ids(&self) -> RelationResult<Vec<String>> {
        let reference = self.owner.get_field(self.field())?;
        Ok(reference_ids(self.kind(), reference.as_ref()))
    }

    pub fn property(&self, property_id: &str) -> Entity {
        self.owner
            .datastore()
            .entity_for(self.state.property_model, Some(property_id))
    }

    pub fn datastore(&self) -> &'a Datastore {
        self.owner.datastore()
    }

    pub fn cache_fields(&self) -> Vec<FieldPath> {
        self.state.cache_fields.borrow().clone()
    }

    /// Declares one more owner field to denormalize onto related documents.
    pub fn add_cache_field(&self, path: impl Into<FieldPath>) {
        let path = path.into();
        let mut fields = self.state.cache_fields.borrow_mut();
        if !fields.contains(&path) {
            fields.push(path);
        }
    }

    pub fn pivot_cache_fields(&self) -> Vec<FieldPath> {
        self.state.pivot_cache_fields.borrow().clone()
    }

    pub fn add_pivot_cache_field(&self, path: impl Into<FieldPath>) {
        let path = path.into();
        let mut fields = self.state.pivot_cache_fields.borrow_mut();
        if !fields.contains(&path) {
            fields.push(path);
        }
    }

    pub fn register_action(&self, field: impl Into<String>, command: Arc<dyn Command>) {
        self.state.actions.borrow_mut().register(field, command);
    }

    pub fn on_update(&self, command: Arc<dyn Command>) {
        self.state.actions.borrow_mut().set_on_update(command);
    }

    /// Snapshot of the bindings, detached from the memo so commands may
    /// reconfigure the relation while running.
    pub fn actions(&self) -> ActionableFields {
        self.state.actions.borrow().clone()
    }

    pub fn is_same_instance(&self, other: &RelationCore<'_>) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Whether `related` still refers back to this owner.
    pub(crate) fn links_back(&self, related: &Entity, owner_id: &str) -> RelationResult<bool> {
        let back_ref = self.back_ref_path(owner_id);
        Ok(match self.kind() {
            RelationKind::OneToMany => {
                related.get_field(back_ref.child("id"))?.as_ref().and_then(Value::as_str)
                    == Some(owner_id)
            }
            RelationKind::ManyToOne | RelationKind::ManyToMany => {
                related.get_field(back_ref)?.is_some()
            }
        })
    }

    /// Owner-to-related cache propagation for one owner change.
    pub(crate) fn propagate_owner_cache(
        &self,
        change: &Change,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        let fields = self.cache_fields();
        if fields.is_empty() {
            return Ok(0);
        }
        let owner_id = self.owner.require_id()?;

        let mut writes = 0;
        for (property_id, wholesale) in self.change_targets(change) {
            let patches = cache_patches(
                &fields,
                change.before.data(),
                change.after.data(),
                wholesale,
            );
            if patches.is_empty() {
                continue;
            }
            let property = self.property(&property_id);
            if !self.links_back(&property, owner_id)? {
                debug!(
                    "event=cache_skip module=relation status=ok accessor={} collection={} id={property_id}",
                    self.descriptor().accessor,
                    self.property_model().collection
                );
                continue;
            }
            let location = self.back_ref_path(owner_id);
            writes += write_patches(&property, patches.prefixed(&location), ctx.as_deref_mut())?;
        }
        Ok(writes)
    }

    /// `(property id, wholesale)` pairs referenced by the after snapshot.
    ///
    /// An entry is wholesale when the owner document or the entry itself is
    /// new in this change.
    fn change_targets(&self, change: &Change) -> Vec<(String, bool)> {
        let field = self.field();
        let (before, after) = change.field(&field);
        let before_ids = reference_ids(self.kind(), before);
        let created = !change.before.exists();
        reference_ids(self.kind(), after)
            .into_iter()
            .map(|id| {
                let wholesale = created || !before_ids.contains(&id);
                (id, wholesale)
            })
            .collect()
    }

    /// Runs field commands for keys of `after` that changed relative to
    /// `before`, passing each command the field's new value.
    pub(crate) fn dispatch_changed_fields(
        &self,
        actions: &ActionableFields,
        before: Option<&Value>,
        after: Option<&Value>,
    ) -> RelationResult<usize> {
        let (Some(diff), Some(after_map)) =
            (updated_entries(before, after), after.and_then(Value::as_object))
        else {
            return Ok(0);
        };
        let changed: Map<String, Value> = diff
            .keys()
            .filter_map(|key| after_map.get(key).map(|value| (key.clone(), value.clone())))
            .collect();
        Ok(actions.dispatch_fields(self.owner, &changed)?)
    }
}

fn reference_ids(kind: RelationKind, reference: Option<&Value>) -> Vec<String> {
    match kind {
        RelationKind::ManyToOne => reference
            .and_then(|value| value.get("id"))
            .and_then(Value::as_str)
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
        RelationKind::OneToMany | RelationKind::ManyToMany => reference
            .and_then(Value::as_object)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default(),
    }
}

/// Applies public and secure cache patches to `target`. Returns the number
/// of writes issued.
pub(crate) fn write_patches(
    target: &Entity,
    patches: CachePatches,
    mut ctx: Option<&mut WriteBatch>,
) -> RelationResult<usize> {
    let mut writes = 0;
    if !patches.public.is_empty() {
        target.merge_fields(patches.public, ctx.as_deref_mut())?;
        writes += 1;
    }
    if !patches.secure.is_empty() {
        target.merge_secure_fields(patches.secure, ctx)?;
        writes += 1;
    }
    Ok(writes)
}

/// Pushes `op` into the caller batch or applies it immediately.
pub(crate) fn stage_write(
    db: &Datastore,
    op: WriteOp,
    ctx: Option<&mut WriteBatch>,
) -> StoreResult<()> {
    match ctx {
        Some(batch) => {
            batch.push(op);
            Ok(())
        }
        None => db.store().apply(&op),
    }
}

/// One declared relation of an entity.
#[derive(Debug, Clone)]
pub enum Relation<'a> {
    OneToMany(OneToMany<'a>),
    ManyToOne(ManyToOne<'a>),
    ManyToMany(ManyToMany<'a>),
}

impl<'a> Relation<'a> {
    pub fn core(&self) -> &RelationCore<'a> {
        match self {
            Self::OneToMany(relation) => relation.core(),
            Self::ManyToOne(relation) => relation.core(),
            Self::ManyToMany(relation) => relation.core(),
        }
    }

    pub fn kind(&self) -> RelationKind {
        self.core().kind()
    }

    pub fn accessor(&self) -> &'static str {
        self.core().descriptor().accessor
    }

    pub fn cache(&self, id: Option<&str>) -> RelationResult<Option<Value>> {
        self.core().cache(id)
    }

    /// Propagates cached fields for one change of the owner document.
    /// Returns the number of writes issued.
    pub fn update_cache(
        &self,
        change: &Change,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        match self {
            Self::OneToMany(relation) => relation.update_cache(change, ctx),
            Self::ManyToOne(relation) => relation.update_cache(change, ctx),
            Self::ManyToMany(relation) => relation.update_cache(change, ctx),
        }
    }

    /// Runs the commands bound to fields changed by `change`. Returns the
    /// number of commands executed.
    pub fn take_action_on(&self, change: &Change) -> RelationResult<usize> {
        match self {
            Self::OneToMany(relation) => relation.take_action_on(change),
            Self::ManyToOne(relation) => relation.take_action_on(change),
            Self::ManyToMany(relation) => relation.take_action_on(change),
        }
    }

    pub fn register_action(&self, field: impl Into<String>, command: Arc<dyn Command>) {
        self.core().register_action(field, command);
    }

    pub fn on_update(&self, command: Arc<dyn Command>) {
        self.core().on_update(command);
    }

    pub fn is_same_instance(&self, other: &Relation<'_>) -> bool {
        self.core().is_same_instance(other.core())
    }

    pub fn into_one_to_many(self) -> RelationResult<OneToMany<'a>> {
        match self {
            Self::OneToMany(relation) => Ok(relation),
            other => Err(other.mismatch(RelationKind::OneToMany)),
        }
    }

    pub fn into_many_to_one(self) -> RelationResult<ManyToOne<'a>> {
        match self {
            Self::ManyToOne(relation) => Ok(relation),
            other => Err(other.mismatch(RelationKind::ManyToOne)),
        }
    }

    pub fn into_many_to_many(self) -> RelationResult<ManyToMany<'a>> {
        match self {
            Self::ManyToMany(relation) => Ok(relation),
            other => Err(other.mismatch(RelationKind::ManyToMany)),
        }
    }

    fn mismatch(&self, expected: RelationKind) -> RelationError {
        RelationError::KindMismatch {
            accessor: self.accessor(),
            expected,
            actual: self.kind(),
        }
    }
}

impl Entity {
    /// Returns the relation declared under `accessor`, memoized on this
    /// entity.
    pub fn relation(&self, accessor: &str) -> RelationResult<Relation<'_>> {
        let core = RelationCore {
            owner: self,
            state: self.relation_state(accessor)?,
        };
        Ok(match core.kind() {
            RelationKind::OneToMany => Relation::OneToMany(OneToMany::new(core)),
            RelationKind::ManyToOne => Relation::ManyToOne(ManyToOne::new(core)),
            RelationKind::ManyToMany => Relation::ManyToMany(ManyToMany::new(core)),
        })
    }

    pub fn one_to_many(&self, accessor: &str) -> RelationResult<OneToMany<'_>> {
        self.relation(accessor)?.into_one_to_many()
    }

    pub fn many_to_one(&self, accessor: &str) -> RelationResult<ManyToOne<'_>> {
        self.relation(accessor)?.into_many_to_one()
    }

    pub fn many_to_many(&self, accessor: &str) -> RelationResult<ManyToMany<'_>> {
        self.relation(accessor)?.into_many_to_many()
    }

    /// Every relation the model declares, in declaration order.
    pub fn relations(&self) -> RelationResult<Vec<Relation<'_>>> {
        self.model()
            .relations
            .iter()
            .map(|descriptor| self.relation(descriptor.accessor))
            .collect()
    }

    fn relation_state(&self, accessor: &str) -> RelationResult<Rc<RelationState>> {
        let model = self.model();
        let descriptor = model
            .relation(accessor)
            .ok_or_else(|| RelationError::UnknownRelation {
                model: model.name,
                accessor: accessor.to_string(),
            })?;
        if let Some(state) = self.relations.borrow().get(descriptor.accessor) {
            return Ok(Rc::clone(state));
        }

        let registry = self.datastore().registry();
        let property_model = registry.resolve(descriptor.property)?;
        let state = Rc::new(RelationState::new(
            descriptor,
            model,
            property_model,
            registry.actions_for(model.name, descriptor.accessor),
        ));
        self.relations
            .borrow_mut()
            .insert(descriptor.accessor, Rc::clone(&state));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::RelationError;
    use crate::model::household::{household_datastore, HOUSEHOLD};
    use crate::model::{Entity, RelationKind};

    #[test]
    fn relation_is_memoized_per_owner_and_accessor() {
        let (db, _) = household_datastore();
        let household = Entity::new(db, &HOUSEHOLD, Some("H1"));
        let first = household.relation("sensors").unwrap();
        let second = household.relation("sensors").unwrap();
        assert!(first.is_same_instance(&second));
        assert!(!first.is_same_instance(&household.relation("users").unwrap()));

        first.core().add_cache_field("address");
        assert!(second
            .core()
            .cache_fields()
            .iter()
            .any(|field| field.to_string() == "address"));
    }

    #[test]
    fn typed_accessor_rejects_other_kinds() {
        let (db, _) = household_datastore();
        let household = Entity::new(db, &HOUSEHOLD, Some("H1"));
        assert!(matches!(
            household.many_to_many("sensors"),
            Err(RelationError::KindMismatch {
                actual: RelationKind::OneToMany,
                ..
            })
        ));
        assert!(matches!(
            household.relation("owners"),
            Err(RelationError::UnknownRelation { .. })
        ));
    }
}
