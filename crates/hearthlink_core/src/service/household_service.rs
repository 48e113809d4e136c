//! Household setup use-cases.
//!
//! # Responsibility
//! - Claim a household for an admin user and link the membership.
//! - Pair a sensor with a household.
//! - Set up a fresh household around a first sensor, rolling back the
//!   speculative household when a policy check fails.
//!
//! # Invariants
//! - A household has at most one admin; a sensor at most one household.
//! - Policy failures never leave a speculatively created household behind.

use crate::document::Patch;
use crate::model::household::{HOUSEHOLD, SENSOR, USER};
use crate::model::{Datastore, Entity, EntityError, ModelDescriptor};
use crate::relation::RelationError;
use crate::store::StoreError;
use log::{info, warn};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Business-rule rejections. Callers log these and do not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    HouseholdAlreadyClaimed { household: String },
    SensorAlreadyPaired { sensor: String, household: String },
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HouseholdAlreadyClaimed { household } => write!(
                f,
                "household `{household}` is already claimed by another admin"
            ),
            Self::SensorAlreadyPaired { sensor, household } => write!(
                f,
                "sensor `{sensor}` is already paired with household `{household}`"
            ),
        }
    }
}

impl Error for PolicyError {}

#[derive(Debug)]
pub enum ServiceError {
    Policy(PolicyError),
    NotFound { model: &'static str, id: String },
    Entity(EntityError),
    Relation(RelationError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Policy(err) => write!(f, "{err}"),
            Self::NotFound { model, id } => write!(f, "{model} not found: {id}"),
            Self::Entity(err) => write!(f, "{err}"),
            Self::Relation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Policy(err) => Some(err),
            Self::Entity(err) => Some(err),
            Self::Relation(err) => Some(err),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<PolicyError> for ServiceError {
    fn from(value: PolicyError) -> Self {
        Self::Policy(value)
    }
}

impl From<EntityError> for ServiceError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        Self::Entity(EntityError::Store(value))
    }
}

impl From<RelationError> for ServiceError {
    fn from(value: RelationError) -> Self {
        Self::Relation(value)
    }
}

/// Membership role written into the household/user pivot.
pub const ADMIN_ROLE: &str = "admin";

/// Household use-case facade over a datastore.
#[derive(Debug, Clone)]
pub struct HouseholdService {
    db: Datastore,
}

impl HouseholdService {
    pub fn new(db: Datastore) -> Self {
        Self { db }
    }

    /// Claims `household_id` for `user_id`, creating the household when it
    /// does not exist yet.
    ///
    /// Claiming again as the same admin is a no-op.
    ///
    /// # Errors
    /// - `PolicyError::HouseholdAlreadyClaimed` when another admin holds it.
    /// - `ServiceError::NotFound` when the user does not exist.
    pub fn claim_household(
        &self,
        user_id: &str,
        household_id: Option<&str>,
        data: Value,
    ) -> ServiceResult<Entity> {
        let user = self.require(&USER, user_id)?;
        let household = self.db.entity_for(&HOUSEHOLD, household_id);

        if household.exists()? {
            let admin = household.get_field("admin.id")?;
            match admin.as_ref().and_then(Value::as_str) {
                Some(admin_id) if admin_id == user_id => return Ok(household),
                Some(_) => {
                    warn!(
                        "event=household_claim module=service status=rejected household={}",
                        household.require_id()?
                    );
                    return Err(PolicyError::HouseholdAlreadyClaimed {
                        household: household.require_id()?.to_string(),
                    }
                    .into());
                }
                None => household.update(&json!({ "admin": { "id": user_id } }), None)?,
            }
        } else {
            let mut body = data;
            if let Some(map) = body.as_object_mut() {
                map.insert("admin".to_string(), json!({ "id": user_id }));
            }
            household.create(body, None)?;
            household.on_create(None)?;
        }

        {
            let members = household.many_to_many("users")?;
            members.attach(&user, Some(json!({ "pivot": { "role": ADMIN_ROLE } })), None)?;
            if let Some(pivot) = members.pivot(user_id)? {
                pivot.merge_fields(
                    Patch::new().with_set("pivot.role", json!(ADMIN_ROLE)),
                    None,
                )?;
            }
        }
        info!(
            "event=household_claim module=service status=ok household={}",
            household.require_id()?
        );
        Ok(household)
    }

    /// Pairs `sensor_id` with `household_id`.
    ///
    /// # Errors
    /// - `PolicyError::SensorAlreadyPaired` when the sensor belongs to a
    ///   different household.
    pub fn pair_sensor(&self, household_id: &str, sensor_id: &str) -> ServiceResult<Entity> {
        let household = self.require(&HOUSEHOLD, household_id)?;
        let sensor = self.require(&SENSOR, sensor_id)?;

        let paired_with = sensor.many_to_one("household")?.id()?;
        if let Some(current) = paired_with {
            if current == household_id {
                return Ok(sensor);
            }
            warn!(
                "event=sensor_pair module=service status=rejected sensor={sensor_id}"
            );
            return Err(PolicyError::SensorAlreadyPaired {
                sensor: sensor_id.to_string(),
                household: current,
            }
            .into());
        }

        household.one_to_many("sensors")?.attach(&sensor, None, None)?;
        sensor.refresh();
        info!(
            "event=sensor_pair module=service status=ok sensor={sensor_id} household={household_id}"
        );
        Ok(sensor)
    }

    /// Creates a household for `user_id` and pairs its first sensor.
    ///
    /// When pairing is rejected by policy, the household created here is
    /// unlinked and deleted before the error is returned.
    pub fn setup_household(
        &self,
        user_id: &str,
        data: Value,
        sensor_id: &str,
    ) -> ServiceResult<Entity> {
        let household = self.claim_household(user_id, None, data)?;
        let household_id = household.require_id()?.to_string();

        match self.pair_sensor(&household_id, sensor_id) {
            Ok(_) => Ok(household),
            Err(ServiceError::Policy(policy)) => {
                self.discard(&household)?;
                Err(policy.into())
            }
            Err(other) => Err(other),
        }
    }

    fn discard(&self, household: &Entity) -> ServiceResult<()> {
        household.many_to_many("users")?.detach(None)?;
        household.destroy(None)?;
        info!(
            "event=household_discard module=service status=ok household={}",
            household.require_id()?
        );
        Ok(())
    }

    fn require(
        &self,
        model: &'static ModelDescriptor,
        id: &str,
    ) -> ServiceResult<Entity> {
        let entity = self.db.entity_for(model, Some(id));
        if !entity.exists()? {
            return Err(ServiceError::NotFound {
                model: model.name,
                id: id.to_string(),
            });
        }
        Ok(entity)
    }
}
