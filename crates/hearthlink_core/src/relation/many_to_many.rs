//! Many-to-many relations backed by a pivot collection.
//!
//! # Responsibility
//! - Keep `<property>: {<id>: ...}` on the owner, `<owner>: {<id>: ...}` on
//!   each property, and one pivot document per linked pair.
//! - Mirror declared pivot fields between both sides and the pivot record.
//!
//! # Invariants
//! - Attach and detach touch both reference maps and the pivot together.
//! - Properties are never deleted by `detach`, only unlinked.

use super::cache::cache_patches;
use super::pivot::{Pivot, PIVOT_FIELD, PIVOT_SEPARATOR};
use super::{stage_write, write_patches, RelationCore, RelationResult};
use crate::document::diff::updated_entries;
use crate::document::{Change, FieldPath, Patch};
use crate::model::Entity;
use crate::store::{WriteBatch, WriteOp};
use log::debug;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct ManyToMany<'a> {
    core: RelationCore<'a>,
}

impl<'a> ManyToMany<'a> {
    pub(crate) fn new(core: RelationCore<'a>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &RelationCore<'a> {
        &self.core
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

    /// Links both reference maps and creates (or merges) the pivot record.
    pub fn attach(
        &self,
        property: &Entity,
        data: Option<Value>,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let property_id = property.require_id()?;
        self.link(property_id, data, ctx.as_deref_mut())?;
        self.link_property(property, ctx)
    }

    /// Owner-side map entry only.
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
        Ok(())
    }

    /// Attaches every property, writing the owner map once.
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
            self.link_property(property, ctx.as_deref_mut())?;
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

    /// Unlinks every property, deletes every pivot naming the owner and
    /// clears the owner's map.
    pub fn detach(&self, mut ctx: Option<&mut WriteBatch>) -> RelationResult<()> {
        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        for property in self.get()? {
            self.unlink_property(&property, owner_id, ctx.as_deref_mut())?;
        }

        let pivot_collection = self.pivot_collection();
        let pivots = owner.datastore().store().query_equals(
            &pivot_collection,
            &FieldPath::from_segments([self.core.owner_model().name, "id"]),
            &json!(owner_id),
        )?;
        for pivot in pivots {
            stage_write(
                owner.datastore(),
                WriteOp::Delete {
                    collection: pivot_collection.clone(),
                    id: pivot.id,
                },
                ctx.as_deref_mut(),
            )?;
        }

        owner.merge_fields(Patch::new().with_set(self.core.field(), json!({})), ctx)?;
        debug!(
            "event=relation_detach module=relation status=ok accessor={} owner={owner_id}",
            self.core.descriptor().accessor
        );
        Ok(())
    }

    /// Removes a single pair: both map entries and the pivot record.
    pub fn detach_property(
        &self,
        property: &Entity,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        let property_id = property.require_id()?;
        owner.merge_fields(
            Patch::new().with_delete(self.core.entry_path(property_id)),
            ctx.as_deref_mut(),
        )?;
        self.unlink_property(property, owner_id, ctx.as_deref_mut())?;
        Pivot::between(owner, property)?.delete(ctx)?;
        Ok(())
    }

    /// Pivot record shared with `property_id`, if it exists.
    pub fn pivot(&self, property_id: &str) -> RelationResult<Option<Pivot>> {
        let owner = self.core.owner();
        let pivot = Pivot::from_parts(
            owner.datastore().clone(),
            (owner.model(), owner.require_id()?),
            (self.core.property_model(), property_id),
        );
        Ok(if pivot.exists()? { Some(pivot) } else { None })
    }

    /// Owner-to-property cache, then pivot fields carried in the owner's
    /// entries onto each property and the shared pivot record.
    pub fn update_cache(
        &self,
        change: &Change,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        let mut writes = self.core.propagate_owner_cache(change, ctx.as_deref_mut())?;
        writes += self.propagate_pivot_fields(change, ctx)?;
        Ok(writes)
    }

    /// Mirrors declared fields of a changed pivot document onto both
    /// sides' entries. `change` is the pivot document's change.
    pub fn update_cache_from_pivot(
        &self,
        change: &Change,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        let fields = self.core.pivot_cache_fields();
        if fields.is_empty() {
            return Ok(0);
        }
        let id_path = FieldPath::from_segments([self.core.property_model().name, "id"]);
        let property_id = change
            .after
            .get_path(&id_path)
            .or_else(|| change.before.get_path(&id_path))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(property_id) = property_id else {
            return Ok(0);
        };

        let pivot_path = FieldPath::parse(PIVOT_FIELD);
        let patches = cache_patches(
            &fields,
            change.before.get_path(&pivot_path).and_then(Value::as_object),
            change.after.get_path(&pivot_path).and_then(Value::as_object),
            false,
        );
        if patches.is_empty() {
            return Ok(0);
        }

        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        let mut writes = 0;
        let owner_entry = self.core.entry_path(&property_id);
        if owner.get_field(owner_entry.clone())?.is_some() {
            writes += write_patches(
                owner,
                patches.clone().prefixed(&owner_entry.child(PIVOT_FIELD)),
                ctx.as_deref_mut(),
            )?;
        }
        let property = self.core.property(&property_id);
        if self.core.links_back(&property, owner_id)? {
            let location = self.core.back_ref_path(owner_id).child(PIVOT_FIELD);
            writes += write_patches(&property, patches.prefixed(&location), ctx)?;
        }
        Ok(writes)
    }

    /// Fires on-update with the changed entries, then field commands on
    /// each changed entry's pivot object.
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
                entry_pivot(before, property_id),
                entry_pivot(after, property_id),
            )?;
        }
        Ok(executed)
    }

    fn pivot_collection(&self) -> String {
        let mut collections = [
            self.core.owner_model().collection,
            self.core.property_model().collection,
        ];
        collections.sort_unstable();
        format!("{}{PIVOT_SEPARATOR}{}", collections[0], collections[1])
    }

    fn propagate_pivot_fields(
        &self,
        change: &Change,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<usize> {
        let fields = self.core.pivot_cache_fields();
        if fields.is_empty() {
            return Ok(0);
        }
        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        let (_, after_entries) = change.field(&self.core.field());
        let property_ids: Vec<String> = after_entries
            .and_then(Value::as_object)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();

        let mut writes = 0;
        for property_id in property_ids {
            let path = self.core.entry_path(&property_id).child(PIVOT_FIELD);
            let patches = cache_patches(
                &fields,
                change.before.get_path(&path).and_then(Value::as_object),
                change.after.get_path(&path).and_then(Value::as_object),
                false,
            );
            if patches.is_empty() {
                continue;
            }

            let property = self.core.property(&property_id);
            if self.core.links_back(&property, owner_id)? {
                let location = self.core.back_ref_path(owner_id).child(PIVOT_FIELD);
                writes += write_patches(
                    &property,
                    patches.clone().prefixed(&location),
                    ctx.as_deref_mut(),
                )?;
            }

            let pivot = Pivot::from_parts(
                owner.datastore().clone(),
                (owner.model(), owner_id),
                (self.core.property_model(), &property_id),
            );
            if !patches.public.is_empty() && pivot.exists()? {
                pivot.merge_fields(
                    patches.public.prefixed(&FieldPath::parse(PIVOT_FIELD)),
                    ctx.as_deref_mut(),
                )?;
                writes += 1;
            }
        }
        Ok(writes)
    }

    fn link_property(
        &self,
        property: &Entity,
        mut ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        let owner = self.core.owner();
        let owner_id = owner.require_id()?;
        match self.core.descriptor().inverse {
            Some(inverse) => property
                .many_to_many(inverse)?
                .link(owner_id, None, ctx.as_deref_mut())?,
            None => {
                let back_ref = self.core.back_ref_path(owner_id);
                if property.get_field(back_ref.clone())?.is_none() {
                    property.merge_fields(
                        Patch::new().with_set(back_ref, Value::Bool(true)),
                        ctx.as_deref_mut(),
                    )?;
                }
            }
        }

        let pivot = Pivot::between(owner, property)?;
        pivot.merge_fields(pivot.identity_patch(), ctx)?;
        debug!(
            "event=relation_attach module=relation status=ok accessor={} pivot={}",
            self.core.descriptor().accessor,
            pivot.path()
        );
        Ok(())
    }

    fn unlink_property(
        &self,
        property: &Entity,
        owner_id: &str,
        ctx: Option<&mut WriteBatch>,
    ) -> RelationResult<()> {
        if !self.core.links_back(property, owner_id)? {
            return Ok(());
        }
        property.merge_fields(
            Patch::new().with_delete(self.core.back_ref_path(owner_id)),
            ctx,
        )?;
        Ok(())
    }
}

fn entry_pivot<'v>(entries: Option<&'v Value>, property_id: &str) -> Option<&'v Value> {
    entries
        .and_then(|entries| entries.get(property_id))
        .and_then(|entry| entry.get(PIVOT_FIELD))
}
