use std::fmt;
use std::time::Duration;

use crate::config::VariableStore;
use crate::error::ProvisionResult;
use crate::host::Host;

/// What a step's apply achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The effect is now in place.
    Applied,
    /// The step did what it could; a manual follow-up remains.
    Deferred { notice: String, action: String },
    /// Non-fatal shortfall worth a warning.
    Degraded { warning: String },
}

/// Everything a step may read while it runs.
pub struct StepContext<'a> {
    pub config: &'a VariableStore,
    pub host: &'a Host,
}

impl<'a> StepContext<'a> {
    #[must_use]
    pub const fn new(config: &'a VariableStore, host: &'a Host) -> Self {
        Self { config, host }
    }
}

/// An idempotent unit of provisioning work.
///
/// `apply` must be harmless when the effect is already in place:
/// resumed runs may call it on steps whose earlier success can no
/// longer be confirmed.
pub trait Step {
    /// Whether the effect is already in place. Must not mutate the
    /// host.
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool>;

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome>;

    /// Re-check after an `Applied` outcome.
    fn verify(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        self.precondition(ctx)
    }

    /// Manual command that fixes or replaces this step on failure.
    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        None
    }

    /// Time budget overriding the runner's default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// A named step with its dependencies.
pub struct StepDefinition {
    pub id: String,
    pub label: String,
    pub dependencies: Vec<String>,
    action: Box<dyn Step>,
}

impl StepDefinition {
    #[must_use]
    pub fn new(id: &str, label: &str, action: impl Step + 'static) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            dependencies: Vec::new(),
            action: Box::new(action),
        }
    }

    /// Declare a dependency on another step.
    #[must_use]
    pub fn after(mut self, dependency: &str) -> Self {
        if !self.dependencies.iter().any(|d| d == dependency) {
            self.dependencies.push(dependency.to_string());
        }
        self
    }

    #[must_use]
    pub fn action(&self) -> &dyn Step {
        self.action.as_ref()
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
