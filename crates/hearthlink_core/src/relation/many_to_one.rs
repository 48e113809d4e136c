//! Many owners pointing at one property (`sensor.household`, `wheel.car`).
//!
//! The owner keeps a single `<property>: {id, pivot: {...}, ...}` object;
//! the referenced entity keeps `<owner>: {<owner id>: ...}` in its map.

use super::{Relation, RelationCore, RelationError, RelationResult};
use crate::document::diff::updated_entries;
use crate::document::{Change, FieldPath, Patch};
use crate::model::{Entity, RelationKind};
use crate::relation::pivot::PIVOT_FIELD;
use crate::store::WriteBatch;
use log::debug;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ManyToOne<'a> {
    core: RelationCore<'a>,
}

impl<'a> ManyToOne<'a> {
    pub(crate) fn new(core: RelationCore<'a>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &RelationCore<'a> {
        &self.core
    }

    pub fn cache(&self) -> RelationResult<Option<Value>> {
        self.core.cache(None)
    }

    /// Id of the referenced entity, if any.
    pub fn id(&self) -> RelationResult<Option<String>> {
        Ok(self
            .core
            .owner()
            .get_field(self.core.field().child("id"))?
            .and_then(|value| value.as_str().map(str::to_string)))
    }

    pub fn get(&self) -> RelationResult<Option<Entity>> {
        Ok(self.id()?.map(|id| self.core.property(&id)))
    }

    /// Points the owner at `target` and links the owner into the target's
    /// inverse relation.
    pub fn set(&self, target: &Entity, mut ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        self.link(target, ctx.as_deref_mut())?;
        let owner_id = self.core.owner().require_id()?;
        match self.core.descriptor().inverse {
            Some(inverse) => match target.relation(inverse)? {
                Relation::OneToMany(relation) => relation.link(owner_id, None, ctx),
                Relation::ManyToMany(relation) => relation.link(owner_id, None, ctx),
                Relation::ManyToOne(_) => Err(RelationError::KindMismatch {
                    accessor: self.core.descriptor().accessor,
                    expected: RelationKind::OneToMany,
                    actual: RelationKind::ManyToOne,
                }),
            },
            None => {
                target.merge_fields(
                    Patch::new().with_set(self.core.back_ref_path(owner_id), Value::Bool(true)),
                    ctx,
                )?;
                Ok(())
            }
        }
    }

    /// Owner-side half of `set`, used when the inverse relation initiated
    /// the link. A previously referenced entity loses its back-reference.
    pub fn link(&self, target: &Entity, mut ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let target_id = target.require_id()?;
        let previous = self.id()?;
        let field = self.core.field();
        let patch = match previous.as_deref() {
            Some(current) if current == target_id => {
                Patch::new().with_set(field.child("id"), json!(target_id))
            }
            Some(current) => {
                self.strip_back_reference(current, ctx.as_deref_mut())?;
                Patch::new().with_set(field, json!({ "id": target_id }))
            }
            None => Patch::new().with_set(field, json!({ "id": target_id })),
        };
        self.core.owner().merge_fields(patch, ctx)?;
        debug!(
            "event=relation_set module=relation status=ok accessor={} id={target_id}",
            self.core.descriptor().accessor
        );
        Ok(())
    }

    /// Clears the reference on both sides.
    pub fn unset(&self, mut ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let Some(current) = self.id()? else {
            return Ok(());
        };
        self.strip_back_reference(&current, ctx.as_deref_mut())?;
        self.core
            .owner()
            .merge_fields(Patch::new().with_delete(self.core.field()), ctx)?;
        Ok(())
    }

    /// Reads `pivot.<name>` under the reference field.
    pub fn get_pivot_field(&self, name: &str) -> RelationResult<Option<Value>> {
        let path = self
            .core
            .field()
            .child(PIVOT_FIELD)
            .join(&FieldPath::parse(name));
        Ok(self.core.owner().get_field(path)?)
    }

    pub fn update_pivot(&self, data: &Value, ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let prefix = self.core.field().child(PIVOT_FIELD);
        self.core
            .owner()
            .merge_fields(Patch::flatten_under(&prefix, data)?, ctx)?;
        Ok(())
    }

    /// Denormalizes the declared owner fields onto the referenced entity's
    /// entry for this owner.
    pub fn update_cache(
        &self,
        change: &Change,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        self.core.propagate_owner_cache(change, ctx)
    }

    /// Dispatches commands for changes under the reference's `pivot` object.
    pub fn take_action_on(&self, change: &Change) -> RelationResult<usize> {
        let path = self.core.field().child(PIVOT_FIELD);
        let (before, after) = change.field(&path);
        let Some(diff) = updated_entries(before, after) else {
            return Ok(0);
        };
        let actions = self.core.actions();
        let mut executed = self.core.dispatch_changed_fields(&actions, before, after)?;
        executed += actions.dispatch_on_update(self.core.owner(), &diff)?;
        Ok(executed)
    }

    fn strip_back_reference(
        &self,
        target_id: &str,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let owner_id = self.core.owner().require_id()?;
        let previous = self.core.property(target_id);
        if !self.core.links_back(&previous, owner_id)? {
            return Ok(());
        }
        previous.merge_fields(
            Patch::new().with_delete(self.core.back_ref_path(owner_id)),
            ctx,
        )?;
        Ok(())
    }
}
