//! Model resolution registry.
//!
//! # Responsibility
//! - Map model names, collection names and type names to static
//!   descriptors, populated once at process start.
//! - Hold application-level actionable-field bindings that every relation
//!   instance starts with.
//!
//! # Invariants
//! - Model and collection names never contain `_` (reserved for pivots).
//! - Every relation target and declared inverse accessor is registered
//!   before the registry is used (`validate`).

use crate::action::{ActionableFields, Command};
use crate::model::descriptor::ModelDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static MODEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][A-Za-z0-9]*$").expect("valid model name regex"));
static TYPE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("valid type name regex"));

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidName(String),
    DuplicateModel(String),
    UnknownModel(String),
    UnknownRelation { model: String, accessor: String },
    MissingInverse {
        model: &'static str,
        accessor: &'static str,
        inverse: &'static str,
    },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "invalid model or collection name `{name}`"),
            Self::DuplicateModel(name) => write!(f, "model already registered: {name}"),
            Self::UnknownModel(name) => write!(f, "no model registered for `{name}`"),
            Self::UnknownRelation { model, accessor } => {
                write!(f, "model `{model}` declares no relation `{accessor}`")
            }
            Self::MissingInverse {
                model,
                accessor,
                inverse,
            } => write!(
                f,
                "relation `{model}.{accessor}` names inverse `{inverse}` which its target does not declare"
            ),
        }
    }
}

impl Error for RegistryError {}

/// Name-to-descriptor table plus registry-level action bindings.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    by_type: BTreeMap<&'static str, &'static ModelDescriptor>,
    by_name: BTreeMap<&'static str, &'static ModelDescriptor>,
    by_collection: BTreeMap<&'static str, &'static ModelDescriptor>,
    actions: BTreeMap<(String, String), ActionableFields>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `models` and validates their relation graph.
    pub fn with_models(models: &[&'static ModelDescriptor]) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for model in models {
            registry.register(model)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn register(&mut self, model: &'static ModelDescriptor) -> RegistryResult<()> {
        for name in [model.name, model.collection] {
            if !MODEL_NAME_RE.is_match(name) {
                return Err(RegistryError::InvalidName(name.to_string()));
            }
        }
        if !TYPE_NAME_RE.is_match(model.type_name) {
            return Err(RegistryError::InvalidName(model.type_name.to_string()));
        }
        if self.by_type.contains_key(model.type_name)
            || self.by_name.contains_key(model.name)
            || self.by_collection.contains_key(model.collection)
        {
            return Err(RegistryError::DuplicateModel(model.type_name.to_string()));
        }

        self.by_type.insert(model.type_name, model);
        self.by_name.insert(model.name, model);
        self.by_collection.insert(model.collection, model);
        Ok(())
    }

    /// Checks that every relation target and inverse accessor exists.
    pub fn validate(&self) -> RegistryResult<()> {
        for model in self.by_type.values() {
            for relation in model.relations {
                let target = self.resolve(relation.property)?;
                if let Some(inverse) = relation.inverse {
                    if target.relation(inverse).is_none() {
                        return Err(RegistryError::MissingInverse {
                            model: model.name,
                            accessor: relation.accessor,
                            inverse,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves a model from its name, collection name or type name.
    ///
    /// Falls back to the inferred type name (singularized, capitalized), so
    /// `"sensors"`, `"sensor"` and `"Sensor"` resolve to the same model.
    pub fn resolve(&self, model_name: &str) -> RegistryResult<&'static ModelDescriptor> {
        let trimmed = model_name.trim();
        self.by_name
            .get(trimmed)
            .or_else(|| self.by_collection.get(trimmed))
            .or_else(|| self.by_type.get(trimmed))
            .or_else(|| self.by_type.get(infer_type_name(trimmed).as_str()))
            .copied()
            .ok_or_else(|| RegistryError::UnknownModel(trimmed.to_string()))
    }

    pub fn by_collection(&self, collection: &str) -> Option<&'static ModelDescriptor> {
        self.by_collection.get(collection).copied()
    }

    pub fn models(&self) -> impl Iterator<Item = &'static ModelDescriptor> + '_ {
        self.by_type.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Binds a field command for every instance of `model.accessor`.
    pub fn register_command(
        &mut self,
        model: &str,
        accessor: &str,
        field: &str,
        command: Arc<dyn Command>,
    ) -> RegistryResult<()> {
        self.actions_entry(model, accessor)?
            .register(field, command);
        Ok(())
    }

    /// Binds the whole-entry on-update command for `model.accessor`.
    pub fn register_on_update(
        &mut self,
        model: &str,
        accessor: &str,
        command: Arc<dyn Command>,
    ) -> RegistryResult<()> {
        self.actions_entry(model, accessor)?
            .set_on_update(command);
        Ok(())
    }

    /// Registry-level bindings for one relation (empty when none).
    pub fn actions_for(&self, model: &str, accessor: &str) -> ActionableFields {
        self.actions
            .get(&(model.to_string(), accessor.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn actions_entry(&mut self, model: &str, accessor: &str) -> RegistryResult<&mut ActionableFields> {
        let descriptor = self.resolve(model)?;
        if descriptor.relation(accessor).is_none() {
            return Err(RegistryError::UnknownRelation {
                model: descriptor.name.to_string(),
                accessor: accessor.to_string(),
            });
        }
        Ok(self
            .actions
            .entry((descriptor.name.to_string(), accessor.to_string()))
            .or_default())
    }
}

/// Infers a registry type name from a model or collection name:
/// `"sensors"` -> `"Sensor"`, `"batteries"` -> `"Battery"`,
/// `"smokeDetectors"` -> `"SmokeDetector"`.
pub fn infer_type_name(model_name: &str) -> String {
    let singular = singularize(model_name.trim());
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if name.ends_with("ss") {
        return name.to_string();
    }
    name.strip_suffix('s').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::{infer_type_name, ModelRegistry, RegistryError};
    use crate::model::descriptor::{ModelDescriptor, RelationDescriptor};

    static CAR_RELATIONS: [RelationDescriptor; 1] =
        [RelationDescriptor::one_to_many("wheels", "wheel").inverse("car")];
    static CAR: ModelDescriptor =
        ModelDescriptor::new("car", "Car", "cars").with_relations(&CAR_RELATIONS);
    static WHEEL_RELATIONS: [RelationDescriptor; 1] =
        [RelationDescriptor::many_to_one("car", "car").inverse("wheels")];
    static WHEEL: ModelDescriptor =
        ModelDescriptor::new("wheel", "Wheel", "wheels").with_relations(&WHEEL_RELATIONS);
    static BROKEN_RELATIONS: [RelationDescriptor; 1] =
        [RelationDescriptor::one_to_many("wheels", "wheel").inverse("owner")];
    static BROKEN: ModelDescriptor =
        ModelDescriptor::new("truck", "Truck", "trucks").with_relations(&BROKEN_RELATIONS);
    static BAD_NAME: ModelDescriptor = ModelDescriptor::new("smoke_detector", "Smoke", "smokes");

    #[test]
    fn infer_type_name_singularizes_and_capitalizes() {
        assert_eq!(infer_type_name("sensors"), "Sensor");
        assert_eq!(infer_type_name("batteries"), "Battery");
        assert_eq!(infer_type_name("address"), "Address");
        assert_eq!(infer_type_name("smokeDetectors"), "SmokeDetector");
    }

    #[test]
    fn resolve_accepts_name_collection_and_type() {
        let registry = ModelRegistry::with_models(&[&CAR, &WHEEL]).unwrap();
        for name in ["car", "cars", "Car", " cars "] {
            assert_eq!(registry.resolve(name).unwrap().name, "car");
        }
        assert_eq!(
            registry.resolve("boats"),
            Err(RegistryError::UnknownModel("boats".to_string()))
        );
    }

    #[test]
    fn validate_rejects_missing_inverse_accessor() {
        let err = ModelRegistry::with_models(&[&BROKEN, &WHEEL, &CAR]).unwrap_err();
        assert!(matches!(err, RegistryError::MissingInverse { inverse: "owner", .. }));
    }

    #[test]
    fn underscores_are_reserved_for_pivots() {
        let mut registry = ModelRegistry::new();
        assert!(matches!(
            registry.register(&BAD_NAME),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ModelRegistry::new();
        registry.register(&CAR).unwrap();
        assert_eq!(
            registry.register(&CAR),
            Err(RegistryError::DuplicateModel("Car".to_string()))
        );
    }
}
