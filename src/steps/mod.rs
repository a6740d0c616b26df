//! The provisioning steps for a single-host web application.
//!
//! [`canonical_registry`] registers them in the order an operator
//! would run them by hand; the plan built from it only reorders where
//! a dependency demands it.

pub mod backend;
pub mod backup;
pub mod certificate;
pub mod database;
pub mod firewall;
pub mod frontend;
pub mod proxy;
pub mod system;

use crate::error::ProvisionResult;
use crate::plan::Registry;
use crate::step::StepDefinition;

pub const UPDATE_SYSTEM: &str = "update-system";
pub const INSTALL_DEPS: &str = "install-deps";
pub const INSTALL_RUNTIME: &str = "install-runtime";
pub const PROVISION_DATABASE: &str = "provision-database";
pub const DEPLOY_BACKEND: &str = "deploy-backend";
pub const DEPLOY_FRONTEND: &str = "deploy-frontend";
pub const CONFIGURE_PROXY: &str = "configure-proxy";
pub const CONFIGURE_FIREWALL: &str = "configure-firewall";
pub const ISSUE_CERTIFICATE: &str = "issue-certificate";
pub const SCHEDULE_BACKUPS: &str = "schedule-backups";

/// Served by nginx for ACME http-01 challenges.
pub const ACME_WEBROOT: &str = "/var/www/letsencrypt";

/// Every step of a full server provisioning.
pub fn canonical_registry() -> ProvisionResult<Registry> {
    let mut registry = Registry::new();
    for step in [
        StepDefinition::new(
            UPDATE_SYSTEM,
            "Update system packages",
            system::UpdateSystem::default(),
        ),
        StepDefinition::new(
            INSTALL_DEPS,
            "Install base dependencies",
            system::InstallDeps::default(),
        )
        .after(UPDATE_SYSTEM),
        StepDefinition::new(INSTALL_RUNTIME, "Install Node.js", system::InstallRuntime)
            .after(INSTALL_DEPS),
        StepDefinition::new(
            PROVISION_DATABASE,
            "Provision PostgreSQL database",
            database::ProvisionDatabase,
        )
        .after(INSTALL_DEPS),
        StepDefinition::new(DEPLOY_BACKEND, "Deploy backend service", backend::DeployBackend)
            .after(INSTALL_RUNTIME)
            .after(PROVISION_DATABASE),
        StepDefinition::new(
            DEPLOY_FRONTEND,
            "Deploy static frontend",
            frontend::DeployFrontend,
        )
        .after(INSTALL_DEPS),
        StepDefinition::new(CONFIGURE_PROXY, "Configure nginx", proxy::ConfigureProxy)
            .after(DEPLOY_BACKEND)
            .after(DEPLOY_FRONTEND),
        StepDefinition::new(
            CONFIGURE_FIREWALL,
            "Configure firewall",
            firewall::ConfigureFirewall::default(),
        )
        .after(INSTALL_DEPS),
        StepDefinition::new(
            ISSUE_CERTIFICATE,
            "Issue TLS certificate",
            certificate::IssueCertificate,
        )
        .after(CONFIGURE_PROXY)
        .after(CONFIGURE_FIREWALL),
        StepDefinition::new(
            SCHEDULE_BACKUPS,
            "Schedule database backups",
            backup::ScheduleBackups,
        )
        .after(PROVISION_DATABASE),
    ] {
        registry.register(step)?;
    }
    Ok(registry)
}
