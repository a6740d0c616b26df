use crate::error::ProvisionResult;
use crate::step::{Outcome, Step, StepContext};
use crate::template::{self, PLACEHOLDER_MARKER, PLACEHOLDER_PAGE};

/// Static root for nginx, with a placeholder page until the real
/// build is uploaded.
#[derive(Debug)]
pub struct DeployFrontend;

impl Step for DeployFrontend {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let index = ctx.config.frontend_dir()?.join("index.html");
        Ok(ctx
            .host
            .files
            .read(&index)?
            .is_some_and(|page| !page.contains(PLACEHOLDER_MARKER)))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let dir = ctx.config.frontend_dir()?;
        let index = dir.join("index.html");
        ctx.host.files.create_dir_all(&dir)?;

        match ctx.host.files.read(&index)? {
            Some(page) if !page.contains(PLACEHOLDER_MARKER) => Ok(Outcome::Applied),
            existing => {
                if existing.is_none() {
                    let page = template::render(PLACEHOLDER_PAGE, ctx.config, &[])?;
                    ctx.host.files.write(&index, &page, 0o644)?;
                }
                Ok(Outcome::Deferred {
                    notice: format!(
                        "Frontend build not uploaded, serving a placeholder from {}",
                        dir.display()
                    ),
                    action: format!("Upload the frontend build into {}", dir.display()),
                })
            }
        }
    }
}
