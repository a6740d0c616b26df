use std::path::PathBuf;

use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::fs::LocalFs;
use crate::host::{FileSystem, ServiceManager};

const UNIT_DIR: &str = "/etc/systemd/system";

/// `ServiceManager` backed by `systemctl`.
pub struct Systemd {
    shell: Shell,
}

impl Systemd {
    #[must_use]
    pub const fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

#[must_use]
pub fn unit_path(unit: &str) -> PathBuf {
    PathBuf::from(UNIT_DIR).join(format!("{unit}.service"))
}

impl ServiceManager for Systemd {
    fn unit_file(&self, unit: &str) -> ProvisionResult<Option<String>> {
        LocalFs.read(&unit_path(unit))
    }

    fn install_unit(&self, unit: &str, content: &str) -> ProvisionResult<()> {
        LocalFs.write(&unit_path(unit), content, 0o644)?;
        self.shell.run("systemctl", &["daemon-reload"])?;
        Ok(())
    }

    fn is_enabled(&self, unit: &str) -> ProvisionResult<bool> {
        self.shell.check("systemctl", &["is-enabled", "--quiet", unit])
    }

    fn is_active(&self, unit: &str) -> ProvisionResult<bool> {
        self.shell.check("systemctl", &["is-active", "--quiet", unit])
    }

    fn enable(&self, unit: &str) -> ProvisionResult<()> {
        self.shell.run("systemctl", &["enable", unit])?;
        Ok(())
    }

    fn restart(&self, unit: &str) -> ProvisionResult<()> {
        self.shell.run("systemctl", &["restart", unit])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_path_appends_service_suffix() {
        assert_eq!(
            unit_path("shop"),
            PathBuf::from("/etc/systemd/system/shop.service")
        );
    }
}
