use std::path::{Path, PathBuf};

use crate::config::{APP_NAME, BACKUP_DIR, BACKUP_SCHEDULE};
use crate::error::ProvisionResult;
use crate::host::CronJob;
use crate::step::{Outcome, Step, StepContext};
use crate::template::{self, BACKUP_SCRIPT};

const SCRIPT_DIR: &str = "/usr/local/bin";

/// Nightly `pg_dump` with retention, run by cron.
///
/// A missing cron daemon only degrades the step: the script is still
/// installed and can be run by hand.
#[derive(Debug)]
pub struct ScheduleBackups;

struct Desired {
    script_path: PathBuf,
    script: String,
    job: CronJob,
}

impl ScheduleBackups {
    fn desired(ctx: &StepContext<'_>) -> ProvisionResult<Desired> {
        let app = ctx.config.get(APP_NAME)?;
        let script_path = Path::new(SCRIPT_DIR).join(format!("{app}-backup.sh"));
        Ok(Desired {
            script: template::render(BACKUP_SCRIPT, ctx.config, &[])?,
            job: CronJob {
                name: format!("{app}-backup"),
                schedule: ctx.config.get(BACKUP_SCHEDULE)?.to_string(),
                user: "root".to_string(),
                command: script_path.display().to_string(),
            },
            script_path,
        })
    }
}

impl Step for ScheduleBackups {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let want = Self::desired(ctx)?;
        Ok(ctx.host.files.read(&want.script_path)? == Some(want.script)
            && ctx.host.scheduler.job(&want.job.name)? == Some(want.job.render()))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let want = Self::desired(ctx)?;
        let files = &ctx.host.files;
        files.create_dir_all(Path::new(ctx.config.get(BACKUP_DIR)?))?;
        if files.read(&want.script_path)?.as_deref() != Some(want.script.as_str()) {
            files.write(&want.script_path, &want.script, 0o755)?;
        }

        let scheduler = &ctx.host.scheduler;
        if !scheduler.is_available()? {
            return Ok(Outcome::Degraded {
                warning: format!(
                    "cron is not running; backups are not scheduled, run {} by hand",
                    want.script_path.display()
                ),
            });
        }
        if scheduler.job(&want.job.name)? == Some(want.job.render()) {
            return Ok(Outcome::Applied);
        }
        match scheduler.register(&want.job) {
            Ok(()) => Ok(Outcome::Applied),
            Err(e) => Ok(Outcome::Degraded {
                warning: format!("could not register backup job {}: {e}", want.job.name),
            }),
        }
    }

    fn remedy(&self, ctx: &StepContext<'_>) -> Option<String> {
        let want = Self::desired(ctx).ok()?;
        Some(format!("systemctl enable --now cron && {}", want.script_path.display()))
    }
}
