use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::{Firewall, FirewallStatus};

/// `Firewall` backed by `ufw`.
pub struct Ufw {
    shell: Shell,
}

impl Ufw {
    #[must_use]
    pub const fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

impl Firewall for Ufw {
    fn status(&self) -> ProvisionResult<FirewallStatus> {
        let output = self.shell.run("ufw", &["status"])?;
        Ok(parse_status(&output))
    }

    fn allow(&self, rule: &str) -> ProvisionResult<()> {
        self.shell.run("ufw", &["allow", rule])?;
        Ok(())
    }

    fn enable(&self) -> ProvisionResult<()> {
        self.shell.run("ufw", &["--force", "enable"])?;
        Ok(())
    }
}

/// Parse `ufw status` output. IPv6 duplicates (`(v6)`) collapse
/// into their IPv4 rule.
#[must_use]
pub fn parse_status(output: &str) -> FirewallStatus {
    let mut status = FirewallStatus::default();

    for line in output.lines() {
        let line = line.trim();
        if let Some(state) = line.strip_prefix("Status:") {
            status.active = state.trim() == "active";
            continue;
        }

        let Some((rule, rest)) = line.split_once("  ") else {
            continue;
        };
        if !rest.trim_start().starts_with("ALLOW") {
            continue;
        }
        let rule = rule.trim().trim_end_matches("(v6)").trim().to_string();
        if !status.allowed.contains(&rule) {
            status.allowed.push(rule);
        }
    }

    status
}
