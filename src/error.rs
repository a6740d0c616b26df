use std::path::PathBuf;
use std::time::Duration;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing configuration value: {0}")]
    MissingConfig(String),

    #[error("command failed: {command}{}", format_stderr(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command timed out after {}s: {command}", .after.as_secs())]
    CommandTimedOut { command: String, after: Duration },

    #[error("step '{step}' failed: {cause}")]
    CollaboratorError {
        step: String,
        #[source]
        cause: Box<ProvisionError>,
    },

    #[error("step '{step}' exceeded its {}s time budget", .after.as_secs())]
    CollaboratorTimeout { step: String, after: Duration },

    #[error(
        "step '{step}' applied without error but its postcondition \
         does not hold; inspect the host manually"
    )]
    PostconditionViolation { step: String },

    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("dependency cycle between steps: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("another run holds the lock at {}", .lock.display())]
    RunAlreadyInProgress { lock: PathBuf },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ProvisionError {
    /// Wrap a failure raised while a step was running, keeping
    /// timeouts distinct from other collaborator failures.
    #[must_use]
    pub fn in_step(self, step: &str) -> Self {
        match self {
            Self::CommandTimedOut { after, .. } => Self::CollaboratorTimeout {
                step: step.to_string(),
                after,
            },
            Self::CollaboratorError { .. }
            | Self::CollaboratorTimeout { .. }
            | Self::PostconditionViolation { .. }
            | Self::Cancelled => self,
            other => Self::CollaboratorError {
                step: step.to_string(),
                cause: Box::new(other),
            },
        }
    }
}

fn format_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" ({stderr})")
    }
}
