use std::path::Path;
use std::time::SystemTime;

use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::PackageManager;

/// Touched by apt's post-update hook on Ubuntu after every
/// successful `apt-get update`.
const UPDATE_STAMP: &str = "/var/lib/apt/periodic/update-success-stamp";
const LISTS_DIR: &str = "/var/lib/apt/lists";

/// `PackageManager` backed by `apt-get` and `dpkg-query`.
pub struct Apt {
    shell: Shell,
}

impl Apt {
    #[must_use]
    pub fn new(shell: Shell) -> Self {
        Self {
            shell: shell.env("DEBIAN_FRONTEND", "noninteractive"),
        }
    }
}

impl PackageManager for Apt {
    fn is_installed(&self, package: &str) -> ProvisionResult<bool> {
        let output = self
            .shell
            .output("dpkg-query", &["-W", "-f=${Status}", package], None)?;
        Ok(output.success() && is_installed_status(&output.stdout))
    }

    fn installed_version(&self, package: &str) -> ProvisionResult<Option<String>> {
        if !self.is_installed(package)? {
            return Ok(None);
        }
        let version = self
            .shell
            .run("dpkg-query", &["-W", "-f=${Version}", package])?;
        Ok(Some(version).filter(|v| !v.is_empty()))
    }

    fn refresh(&self) -> ProvisionResult<()> {
        self.shell.run("apt-get", &["update"])?;
        self.shell.run(
            "apt-get",
            &[
                "-y",
                "-o",
                "Dpkg::Options::=--force-confdef",
                "-o",
                "Dpkg::Options::=--force-confold",
                "upgrade",
            ],
        )?;
        Ok(())
    }

    fn last_refresh(&self) -> ProvisionResult<Option<SystemTime>> {
        for candidate in [UPDATE_STAMP, LISTS_DIR] {
            if let Ok(meta) = std::fs::metadata(Path::new(candidate)) {
                return Ok(Some(meta.modified()?));
            }
        }
        Ok(None)
    }

    fn add_repository(&self, setup_script_url: &str) -> ProvisionResult<()> {
        self.shell
            .run_script(&format!("curl -fsSL '{setup_script_url}' | bash -"))?;
        Ok(())
    }

    fn install(&self, packages: &[&str]) -> ProvisionResult<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend_from_slice(packages);
        self.shell.run("apt-get", &args)?;
        Ok(())
    }
}

fn is_installed_status(status: &str) -> bool {
    status.trim() == "install ok installed"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_status() {
        assert!(is_installed_status("install ok installed"));
        assert!(!is_installed_status("deinstall ok config-files"));
        assert!(!is_installed_status("unknown ok not-installed"));
    }
}
