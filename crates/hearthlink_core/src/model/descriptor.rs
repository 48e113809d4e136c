//! Static model and relation declarations.
//!
//! Every model declares its relations up front, including the accessor on
//! the related model that holds the inverse side, so reverse links are
//! resolved by table lookup at runtime.

use crate::document::FieldPath;

/// Suffix marking a field (and a mirror collection) as restricted data.
pub const SECURE_SUFFIX: &str = "_secure";

/// Cardinality of one declared relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::OneToMany => "one_to_many",
            Self::ManyToOne => "many_to_one",
            Self::ManyToMany => "many_to_many",
        }
    }
}

/// One relation declared on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Accessor name on the owner model (`"wheels"`).
    pub accessor: &'static str,
    pub kind: RelationKind,
    /// Related model name (`"wheel"`).
    pub property: &'static str,
    /// Accessor on the related model that holds the other side.
    pub inverse: Option<&'static str>,
    /// Detaching deletes the related documents (one-to-many only).
    pub weak: bool,
    /// Owner fields denormalized onto the related side.
    pub cache_fields: &'static [&'static str],
    /// Pivot fields mirrored between both sides (many-to-many only).
    pub pivot_cache_fields: &'static [&'static str],
}

impl RelationDescriptor {
    const fn new(accessor: &'static str, kind: RelationKind, property: &'static str) -> Self {
        Self {
            accessor,
            kind,
            property,
            inverse: None,
            weak: false,
            cache_fields: &[],
            pivot_cache_fields: &[],
        }
    }

    pub const fn one_to_many(accessor: &'static str, property: &'static str) -> Self {
        Self::new(accessor, RelationKind::OneToMany, property)
    }

    pub const fn many_to_one(accessor: &'static str, property: &'static str) -> Self {
        Self::new(accessor, RelationKind::ManyToOne, property)
    }

    pub const fn many_to_many(accessor: &'static str, property: &'static str) -> Self {
        Self::new(accessor, RelationKind::ManyToMany, property)
    }

    pub const fn weak(self) -> Self {
        Self { weak: true, ..self }
    }

    pub const fn inverse(self, accessor: &'static str) -> Self {
        Self {
            inverse: Some(accessor),
            ..self
        }
    }

    pub const fn cache(self, fields: &'static [&'static str]) -> Self {
        Self {
            cache_fields: fields,
            ..self
        }
    }

    pub const fn cache_pivot(self, fields: &'static [&'static str]) -> Self {
        Self {
            pivot_cache_fields: fields,
            ..self
        }
    }
}

/// One persisted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Singular model name, also the reference field name on related docs.
    pub name: &'static str,
    /// Registry type name (`"Sensor"`).
    pub type_name: &'static str,
    /// Plural collection name (`"sensors"`).
    pub collection: &'static str,
    /// Whether a paired document lives in the secure mirror collection.
    pub secure: bool,
    pub relations: &'static [RelationDescriptor],
}

impl ModelDescriptor {
    pub const fn new(
        name: &'static str,
        type_name: &'static str,
        collection: &'static str,
    ) -> Self {
        Self {
            name,
            type_name,
            collection,
            secure: false,
            relations: &[],
        }
    }

    pub const fn with_secure_data(self) -> Self {
        Self {
            secure: true,
            ..self
        }
    }

    pub const fn with_relations(self, relations: &'static [RelationDescriptor]) -> Self {
        Self { relations, ..self }
    }

    pub fn relation(&self, accessor: &str) -> Option<&'static RelationDescriptor> {
        self.relations
            .iter()
            .find(|relation| relation.accessor == accessor)
    }

    pub fn secure_collection(&self) -> String {
        secure_collection_name(self.collection)
    }
}

pub fn secure_collection_name(collection: &str) -> String {
    format!("{collection}{SECURE_SUFFIX}")
}

/// A cacheable field is secure when its last segment carries the suffix.
///
/// Suffixes on nested keys inside a cached object are not inspected: the
/// whole declared field goes to one collection.
pub fn is_secure_field(path: &FieldPath) -> bool {
    path.last()
        .is_some_and(|segment| segment.ends_with(SECURE_SUFFIX))
}
