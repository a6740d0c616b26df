use std::time::{Duration, SystemTime};

use crate::cmd;
use crate::config::NODE_MAJOR;
use crate::error::ProvisionResult;
use crate::step::{Outcome, Step, StepContext};

const NODESOURCE_SETUP: &str = "https://deb.nodesource.com/setup_";

pub const BASE_PACKAGES: &[&str] = &[
    "curl",
    "git",
    "nginx",
    "postgresql",
    "ufw",
    "certbot",
    "python3-certbot-nginx",
    "cron",
    "build-essential",
];

/// Refresh package lists and upgrade what is installed.
#[derive(Debug)]
pub struct UpdateSystem {
    /// Lists refreshed more recently than this count as current.
    pub max_age: Duration,
}

impl Default for UpdateSystem {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Step for UpdateSystem {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let Some(refreshed) = ctx.host.packages.last_refresh()? else {
            return Ok(false);
        };
        Ok(SystemTime::now()
            .duration_since(refreshed)
            .is_ok_and(|age| age <= self.max_age))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        ctx.host.packages.refresh()?;
        Ok(Outcome::Applied)
    }

    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        Some("apt-get update && apt-get upgrade -y".to_string())
    }
}

#[derive(Debug)]
pub struct InstallDeps {
    pub packages: Vec<String>,
}

impl Default for InstallDeps {
    fn default() -> Self {
        Self {
            packages: BASE_PACKAGES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl InstallDeps {
    fn missing(&self, ctx: &StepContext<'_>) -> ProvisionResult<Vec<&str>> {
        let mut missing = Vec::new();
        for package in &self.packages {
            if !ctx.host.packages.is_installed(package)? {
                missing.push(package.as_str());
            }
        }
        Ok(missing)
    }
}

impl Step for InstallDeps {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        Ok(self.missing(ctx)?.is_empty())
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let missing = self.missing(ctx)?;
        if !missing.is_empty() {
            log::info!("Installing {}", missing.join(" "));
            ctx.host.packages.install(&missing)?;
        }
        Ok(Outcome::Applied)
    }

    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        let mut args = vec!["install", "-y"];
        args.extend(self.packages.iter().map(String::as_str));
        Some(cmd::format_command("apt-get", &args))
    }
}

/// Node.js from the NodeSource repository, pinned to `node_major`.
#[derive(Debug)]
pub struct InstallRuntime;

impl InstallRuntime {
    fn setup_url(ctx: &StepContext<'_>) -> ProvisionResult<String> {
        Ok(format!("{NODESOURCE_SETUP}{}.x", ctx.config.get(NODE_MAJOR)?))
    }
}

impl Step for InstallRuntime {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let wanted = ctx.config.get_u16(NODE_MAJOR)?;
        let installed = ctx.host.packages.installed_version("nodejs")?;
        Ok(installed.as_deref().and_then(major_version) == Some(wanted))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        ctx.host.packages.add_repository(&Self::setup_url(ctx)?)?;
        ctx.host.packages.install(&["nodejs"])?;
        Ok(Outcome::Applied)
    }

    fn remedy(&self, ctx: &StepContext<'_>) -> Option<String> {
        let url = Self::setup_url(ctx).ok()?;
        Some(format!("curl -fsSL {url} | bash - && apt-get install -y nodejs"))
    }
}

/// Major component of a Debian package version such as
/// `1:20.11.1-1nodesource1`.
#[must_use]
pub fn major_version(version: &str) -> Option<u16> {
    let upstream = version.split_once(':').map_or(version, |(_, rest)| rest);
    let digits: String = upstream.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_from_debian_versions() {
        assert_eq!(major_version("20.11.1-1nodesource1"), Some(20));
        assert_eq!(major_version("18.19.1+dfsg-6ubuntu5"), Some(18));
        assert_eq!(major_version("1:22.3.0"), Some(22));
        assert_eq!(major_version("garbage"), None);
    }

    #[test]
    fn install_remedy_lists_packages() {
        let step = InstallDeps {
            packages: vec!["nginx".into(), "ufw".into()],
        };
        let config = crate::config::VariableStore::new();
        let host = crate::host::Host::system(Duration::from_secs(1));
        let ctx = StepContext::new(&config, &host);

        assert_eq!(
            step.remedy(&ctx).as_deref(),
            Some("apt-get install -y nginx ufw")
        );
    }
}
