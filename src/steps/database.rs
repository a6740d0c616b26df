use crate::config::{DATABASE_NAME, DATABASE_PASSWORD, DATABASE_USER};
use crate::error::ProvisionResult;
use crate::host::DatabaseSpec;
use crate::step::{Outcome, Step, StepContext};

/// Application role and database, created in one script.
#[derive(Debug)]
pub struct ProvisionDatabase;

pub fn database_spec(ctx: &StepContext<'_>) -> ProvisionResult<DatabaseSpec> {
    Ok(DatabaseSpec {
        name: ctx.config.get(DATABASE_NAME)?.to_string(),
        user: ctx.config.get(DATABASE_USER)?.to_string(),
        password: ctx.config.get(DATABASE_PASSWORD)?.to_string(),
    })
}

impl Step for ProvisionDatabase {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        ctx.host.database.is_provisioned(&database_spec(ctx)?)
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let spec = database_spec(ctx)?;
        log::info!("Provisioning database {} for role {}", spec.name, spec.user);
        ctx.host.database.provision(&spec)?;
        Ok(Outcome::Applied)
    }

    fn remedy(&self, ctx: &StepContext<'_>) -> Option<String> {
        let name = ctx.config.get(DATABASE_NAME).ok()?;
        let user = ctx.config.get(DATABASE_USER).ok()?;
        Some(format!(
            "runuser -u postgres -- createuser --pwprompt {user} && \
             runuser -u postgres -- createdb --owner {user} {name}"
        ))
    }
}
