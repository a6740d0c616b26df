use crate::error::ProvisionResult;
use crate::step::{Outcome, Step, StepContext};

/// Allow SSH and web traffic, then turn the firewall on.
#[derive(Debug)]
pub struct ConfigureFirewall {
    /// ufw application profiles, allowed in order. SSH comes first so
    /// enabling the firewall cannot lock the operator out.
    pub rules: Vec<String>,
}

impl Default for ConfigureFirewall {
    fn default() -> Self {
        Self {
            rules: vec!["OpenSSH".to_string(), "Nginx Full".to_string()],
        }
    }
}

impl Step for ConfigureFirewall {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let status = ctx.host.firewall.status()?;
        Ok(status.active && self.rules.iter().all(|r| status.allows(r)))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let firewall = &ctx.host.firewall;
        let status = firewall.status()?;
        for rule in self.rules.iter().filter(|r| !status.allows(r)) {
            log::info!("Allowing {rule}");
            firewall.allow(rule)?;
        }
        if !status.active {
            firewall.enable()?;
        }
        Ok(Outcome::Applied)
    }

    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        let allows: Vec<String> = self
            .rules
            .iter()
            .map(|r| format!("ufw allow '{r}'"))
            .collect();
        Some(format!("{} && ufw --force enable", allows.join(" && ")))
    }
}
