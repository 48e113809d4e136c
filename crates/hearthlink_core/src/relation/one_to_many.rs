//! One owner, many properties (`household.sensors`, `car.wheels`).
//!
//! The owner keeps `<property>: {<id>: true | {...}}`; each property keeps a
//! single `<owner>: {id, ...}` object pointing back.

use super::{RelationCore, RelationResult};
use crate::document::diff::updated_entries;
use crate::document::{Change, Patch};
use crate::model::Entity;
use crate::relation::pivot::PIVOT_FIELD;
use crate::store::WriteBatch;
use log::{debug, info};
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct OneToMany<'a> {
    core: RelationCore<'a>,
}

impl<'a> OneToMany<'a> {
    pub(crate) fn new(core: RelationCore<'a>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &RelationCore<'a> {
        &self.core
    }

    /// Detaching a weak relation deletes the properties.
    pub fn is_weak(&self) -> bool {
        self.core.descriptor().weak
    }

    pub fn cache(&self, id: Option<&str>) -> RelationResult<Option<Value>> {
        self.core.cache(id)
    }

    pub fn ids(&self) -> RelationResult<Vec<String>> {
        self.core.referenced_ids()
    }

    pub fn get(&self) -> RelationResult<Vec<Entity>> {
        Ok(self
            .ids()?
            .iter()
            .map(|id| self.core.property(id))
            .collect())
    }

    /// Links `property` to the owner on both sides. `data` becomes the
    /// owner-side entry; without it the entry is `true`.
    pub fn attach(
        &self,
        property: &Entity,
        data: Option<Value>,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let property_id = property.require_id()?;
        self.link(property_id, data, ctx.as_deref_mut())?;
        self.link_back(property, ctx)
    }

    /// Owner-side half of `attach`, used when the inverse relation
    /// initiated the link.
    pub fn link(
        &self,
        property_id: &str,
        data: Option<Value>,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let value = match data {
            Some(value) => value,
            None if self.core.cache(Some(property_id))?.is_some() => return Ok(()),
            None => Value::Bool(true),
        };
        let patch = self.core.entry_patch(property_id, value)?;
        self.core.owner().merge_fields(patch, ctx)?;
        debug!(
            "event=relation_attach module=relation status=ok accessor={} id={property_id}",
            self.core.descriptor().accessor
        );
        Ok(())
    }

    /// Attaches every property with one combined owner write.
    pub fn attach_bulk(
        &self,
        properties: &[&Entity],
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let mut patch = Patch::new();
        for property in properties {
            let entry = self.core.entry_path(property.require_id()?);
            if self.core.owner().get_field(entry.clone())?.is_none() {
                patch.set(entry, Value::Bool(true));
            }
        }
        if !patch.is_empty() {
            self.core
                .owner()
                .merge_fields(patch, ctx.as_deref_mut())?;
        }
        for property in properties {
            self.link_back(property, ctx.as_deref_mut())?;
        }
        Ok(())
    }

    pub fn attach_by_id_bulk(
        &self,
        property_ids: &[&str],
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let properties: Vec<Entity> = property_ids
            .iter()
            .map(|id| self.core.property(id))
            .collect();
        let refs: Vec<&Entity> = properties.iter().collect();
        self.attach_bulk(&refs, ctx)
    }

    /// Releases every property, then clears the owner's reference map.
    ///
    /// Weak relations destroy each property together with its secure
    /// mirror; otherwise only the property's back-reference to this owner
    /// is removed.
    pub fn detach(&self, mut ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        for property in self.get()? {
            if self.is_weak() {
                if property.exists()? {
                    property.destroy(ctx.as_deref_mut())?;
                    info!(
                        "event=cascade_delete module=relation status=ok accessor={} collection={} id={}",
                        self.core.descriptor().accessor,
                        property.collection(),
                        property.require_id()?
                    );
                }
            } else if self.core.links_back(&property, owner_id)? {
                property.merge_fields(
                    Patch::new().with_delete(self.core.back_ref_path(owner_id)),
                    ctx.as_deref_mut(),
                )?;
            }
        }
        owner.merge_fields(Patch::new().with_set(self.core.field(), json!({})), ctx)?;
        Ok(())
    }

    /// Merges `data` into the owner entry's nested `pivot` object.
    pub fn update_pivot(
        &self,
        property_id: &str,
        data: &Value,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let prefix = self.core.entry_path(property_id).child(PIVOT_FIELD);
        self.core
            .owner()
            .merge_fields(Patch::flatten_under(&prefix, data)?, ctx)?;
        Ok(())
    }

    pub fn update_cache(
        &self,
        change: &Change,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        self.core.propagate_owner_cache(change, ctx)
    }

    /// Fires the on-update command with the added/changed entries of the
    /// owner's reference map, then field commands per changed entry.
    pub fn take_action_on(&self, change: &Change) -> RelationResult<usize> {
        let (before, after) = change.field(&self.core.field());
        let Some(diff) = updated_entries(before, after) else {
            return Ok(0);
        };
        let actions = self.core.actions();
        let mut executed = actions.dispatch_on_update(self.core.owner(), &diff)?;
        for property_id in diff.keys() {
            executed += self.core.dispatch_changed_fields(
                &actions,
                before.and_then(|entries| entries.get(property_id)),
                after.and_then(|entries| entries.get(property_id)),
            )?;
        }
        Ok(executed)
    }

    fn link_back(&self, property: &Entity, ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let owner = self.core.owner();
        match self.core.descriptor().inverse {
            Some(inverse) => property.many_to_one(inverse)?.link(owner, ctx),
            None => {
                let owner_id = owner.require_id()?;
                property.merge_fields(
                    Patch::new().with_set(
                        self.core.back_ref_path(owner_id),
                        json!({ "id": owner_id }),
                    ),
                    ctx,
                )?;
                Ok(())
            }
        }
    }
}
