//! Use-case services built on entities and relations.

pub mod household_service;

pub use household_service::{HouseholdService, PolicyError, ServiceError, ServiceResult};
