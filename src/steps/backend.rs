use std::path::PathBuf;

use crate::config::APP_NAME;
use crate::error::ProvisionResult;
use crate::step::{Outcome, Step, StepContext};
use crate::template::{self, ENV_FILE, SYSTEMD_UNIT};

/// File whose presence means the backend build was uploaded.
pub const ENTRY_POINT: &str = "server.js";

/// Environment file, systemd unit and service for the backend.
#[derive(Debug)]
pub struct DeployBackend;

struct Desired {
    unit: String,
    env_path: PathBuf,
    env: String,
    unit_file: String,
    entry_point: PathBuf,
}

impl DeployBackend {
    fn desired(ctx: &StepContext<'_>) -> ProvisionResult<Desired> {
        let config = ctx.config;
        let backend_dir = config.backend_dir()?;
        let dir = backend_dir.display().to_string();
        Ok(Desired {
            unit: config.get(APP_NAME)?.to_string(),
            env_path: config.env_file_path()?,
            env: template::render(ENV_FILE, config, &[])?,
            unit_file: template::render(
                SYSTEMD_UNIT,
                config,
                &[("backend_dir", dir.as_str())],
            )?,
            entry_point: backend_dir.join(ENTRY_POINT),
        })
    }
}

impl Step for DeployBackend {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let want = Self::desired(ctx)?;
        let host = ctx.host;
        Ok(host.files.read(&want.env_path)? == Some(want.env)
            && host.services.unit_file(&want.unit)? == Some(want.unit_file)
            && host.services.is_enabled(&want.unit)?
            && host.files.exists(&want.entry_point)
            && host.services.is_active(&want.unit)?)
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let want = Self::desired(ctx)?;
        let host = ctx.host;
        let backend_dir = ctx.config.backend_dir()?;
        host.files.create_dir_all(&backend_dir)?;

        let mut changed = false;
        if host.files.read(&want.env_path)?.as_deref() != Some(want.env.as_str()) {
            host.files.write(&want.env_path, &want.env, 0o600)?;
            changed = true;
        }
        if host.services.unit_file(&want.unit)?.as_deref() != Some(want.unit_file.as_str()) {
            host.services.install_unit(&want.unit, &want.unit_file)?;
            changed = true;
        }
        if !host.services.is_enabled(&want.unit)? {
            host.services.enable(&want.unit)?;
        }

        if !host.files.exists(&want.entry_point) {
            return Ok(Outcome::Deferred {
                notice: format!("Backend build not uploaded to {}", backend_dir.display()),
                action: format!(
                    "Upload the backend build to {}, then run: systemctl restart {}",
                    backend_dir.display(),
                    want.unit
                ),
            });
        }

        if changed || !host.services.is_active(&want.unit)? {
            host.services.restart(&want.unit)?;
        }
        Ok(Outcome::Applied)
    }

    fn remedy(&self, ctx: &StepContext<'_>) -> Option<String> {
        let unit = ctx.config.get(APP_NAME).ok()?;
        Some(format!("journalctl -u {unit} -n 50 --no-pager"))
    }
}
