//! Actionable-field commands and their dispatcher.
//!
//! # Responsibility
//! - Define the command contract invoked when a relation-carried field
//!   changes.
//! - Map field names to commands and run them against a change diff.
//!
//! # Invariants
//! - Command errors are returned to the caller, never swallowed here.
//! - A field command runs only when that field appears in the diff.

use crate::model::entity::{Entity, EntityError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug)]
pub enum CommandError {
    /// `undo` (or another optional step) is not provided by this command.
    Unimplemented(String),
    /// The command rejected or could not complete the action.
    Failed { command: String, message: String },
    /// The command's own entity reads/writes failed.
    Entity(EntityError),
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unimplemented(command) => write!(f, "command `{command}` does not implement undo"),
            Self::Failed { command, message } => write!(f, "command `{command}` failed: {message}"),
            Self::Entity(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Entity(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EntityError> for CommandError {
    fn from(value: EntityError) -> Self {
        Self::Entity(value)
    }
}

/// Side effect bound to a relation field.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the action for `owner` with the changed value.
    fn execute(&self, owner: &Entity, value: &Value) -> CommandResult<()>;

    fn undo(&self) -> CommandResult<()> {
        Err(CommandError::Unimplemented(self.name().to_string()))
    }
}

/// Closure-backed command.
pub struct FnCommand<F> {
    name: String,
    action: F,
}

impl<F> FnCommand<F>
where
    F: Fn(&Entity, &Value) -> CommandResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

impl<F> Command for FnCommand<F>
where
    F: Fn(&Entity, &Value) -> CommandResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, owner: &Entity, value: &Value) -> CommandResult<()> {
        (self.action)(owner, value)
    }
}

/// Field -> command table attached to one relation.
#[derive(Clone, Default)]
pub struct ActionableFields {
    on_update: Option<Arc<dyn Command>>,
    fields: BTreeMap<String, Arc<dyn Command>>,
}

impl Debug for ActionableFields {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionableFields")
            .field("on_update", &self.on_update.as_ref().map(|cmd| cmd.name().to_string()))
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ActionableFields {
    /// Binds `command` to `field`, replacing any previous binding.
    pub fn register(&mut self, field: impl Into<String>, command: Arc<dyn Command>) {
        self.fields.insert(field.into(), command);
    }

    /// Sets the command that receives the whole entry diff.
    pub fn set_on_update(&mut self, command: Arc<dyn Command>) {
        self.on_update = Some(command);
    }

    /// Runs the on-update command with the whole diff. Returns how many
    /// commands ran.
    pub fn dispatch_on_update(&self, owner: &Entity, diff: &Map<String, Value>) -> CommandResult<usize> {
        let Some(command) = &self.on_update else {
            return Ok(0);
        };
        command.execute(owner, &Value::Object(diff.clone()))?;
        Ok(1)
    }

    /// Runs the command bound to each changed field present in `diff`.
    pub fn dispatch_fields(&self, owner: &Entity, diff: &Map<String, Value>) -> CommandResult<usize> {
        let mut executed = 0;
        for (field, value) in diff {
            if let Some(command) = self.fields.get(field) {
                command.execute(owner, value)?;
                executed += 1;
            }
        }
        Ok(executed)
    }
}
