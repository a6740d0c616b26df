use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::fs::LocalFs;
use crate::host::{FileSystem, ReverseProxy};

const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";
const DEFAULT_SITE: &str = "default";

/// `ReverseProxy` backed by the Debian nginx layout.
pub struct Nginx {
    shell: Shell,
    available: PathBuf,
    enabled: PathBuf,
}

impl Nginx {
    #[must_use]
    pub fn new(shell: Shell) -> Self {
        Self {
            shell,
            available: PathBuf::from(SITES_AVAILABLE),
            enabled: PathBuf::from(SITES_ENABLED),
        }
    }

    fn enable_link(&self, name: &str) -> ProvisionResult<()> {
        let link = self.enabled.join(name);
        remove_if_present(&link)?;
        std::fs::create_dir_all(&self.enabled)?;
        std::os::unix::fs::symlink(self.available.join(name), &link)?;
        Ok(())
    }
}

impl ReverseProxy for Nginx {
    fn site(&self, name: &str) -> ProvisionResult<Option<String>> {
        LocalFs.read(&self.available.join(name))
    }

    fn is_site_enabled(&self, name: &str) -> ProvisionResult<bool> {
        Ok(self.enabled.join(name).exists())
    }

    fn default_site_enabled(&self) -> ProvisionResult<bool> {
        Ok(self.enabled.join(DEFAULT_SITE).symlink_metadata().is_ok())
    }

    fn install_site(&self, name: &str, content: &str) -> ProvisionResult<()> {
        LocalFs.write(&self.available.join(name), content, 0o644)?;
        self.enable_link(name)?;
        if name != DEFAULT_SITE {
            remove_if_present(&self.enabled.join(DEFAULT_SITE))?;
        }
        Ok(())
    }

    fn check_config(&self) -> ProvisionResult<()> {
        self.shell.run("nginx", &["-t"])?;
        Ok(())
    }

    fn reload(&self) -> ProvisionResult<()> {
        self.shell.run("systemctl", &["reload", "nginx"])?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> ProvisionResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
