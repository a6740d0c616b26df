use std::path::PathBuf;

use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::fs::LocalFs;
use crate::host::{CronJob, FileSystem, Scheduler};

const CRON_DIR: &str = "/etc/cron.d";

/// `Scheduler` backed by `/etc/cron.d` files.
pub struct Cron {
    shell: Shell,
}

impl Cron {
    #[must_use]
    pub const fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

/// cron.d ignores files whose names contain dots.
#[must_use]
pub fn job_path(name: &str) -> PathBuf {
    PathBuf::from(CRON_DIR).join(name.replace('.', "-"))
}

impl Scheduler for Cron {
    fn is_available(&self) -> ProvisionResult<bool> {
        self.shell
            .check("systemctl", &["is-active", "--quiet", "cron"])
    }

    fn job(&self, name: &str) -> ProvisionResult<Option<String>> {
        LocalFs.read(&job_path(name))
    }

    fn register(&self, job: &CronJob) -> ProvisionResult<()> {
        LocalFs.write(&job_path(&job.name), &job.render(), 0o644)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_path_strips_dots() {
        assert_eq!(
            job_path("shop.example-backup"),
            PathBuf::from("/etc/cron.d/shop-example-backup")
        );
    }
}
