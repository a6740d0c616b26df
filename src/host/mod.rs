//! External collaborators.
//!
//! Each OS tool a step delegates to sits behind a trait so the
//! runner and the steps never depend on a real host. [`Host::system`]
//! wires the implementations that shell out to apt, systemd, nginx,
//! certbot, ufw, cron and psql.

pub mod apt;
pub mod certbot;
pub mod cron;
pub mod fs;
pub mod nginx;
pub mod postgres;
pub mod systemd;
pub mod ufw;

use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::cmd::{self, Deadline, Shell};
use crate::error::ProvisionResult;

/// Package database (apt on Ubuntu).
pub trait PackageManager {
    fn is_installed(&self, package: &str) -> ProvisionResult<bool>;

    /// Installed version string, `None` when the package is absent.
    fn installed_version(&self, package: &str) -> ProvisionResult<Option<String>>;

    /// Refresh package lists and upgrade installed packages.
    fn refresh(&self) -> ProvisionResult<()>;

    /// When the package lists were last refreshed successfully.
    fn last_refresh(&self) -> ProvisionResult<Option<SystemTime>>;

    /// Register an extra repository by running its setup script.
    fn add_repository(&self, setup_script_url: &str) -> ProvisionResult<()>;

    fn install(&self, packages: &[&str]) -> ProvisionResult<()>;
}

/// Process supervisor (systemd).
pub trait ServiceManager {
    /// Content of the unit file, `None` if it is not registered.
    fn unit_file(&self, unit: &str) -> ProvisionResult<Option<String>>;

    /// Write the unit file and make the supervisor pick it up.
    fn install_unit(&self, unit: &str, content: &str) -> ProvisionResult<()>;

    fn is_enabled(&self, unit: &str) -> ProvisionResult<bool>;

    fn is_active(&self, unit: &str) -> ProvisionResult<bool>;

    fn enable(&self, unit: &str) -> ProvisionResult<()>;

    fn restart(&self, unit: &str) -> ProvisionResult<()>;
}

/// Reverse proxy (nginx).
pub trait ReverseProxy {
    /// Content of a site config, `None` if it does not exist.
    fn site(&self, name: &str) -> ProvisionResult<Option<String>>;

    fn is_site_enabled(&self, name: &str) -> ProvisionResult<bool>;

    /// Whether the distribution's default site is still enabled.
    fn default_site_enabled(&self) -> ProvisionResult<bool>;

    /// Write and enable a site, disabling the default site.
    fn install_site(&self, name: &str, content: &str) -> ProvisionResult<()>;

    /// Syntax-check the full configuration.
    fn check_config(&self) -> ProvisionResult<()>;

    fn reload(&self) -> ProvisionResult<()>;
}

/// What to ask the certificate authority for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub domains: Vec<String>,
    pub email: String,
    pub webroot: String,
}

impl CertificateRequest {
    /// The equivalent manual command, for remedies and deferred
    /// actions.
    #[must_use]
    pub fn command_line(&self) -> String {
        cmd::format_command("certbot", &certbot::issue_args(self))
    }
}

/// Certificate authority client (certbot).
pub trait CertificateClient {
    fn has_certificate(&self, domain: &str) -> ProvisionResult<bool>;

    fn issue(&self, request: &CertificateRequest) -> ProvisionResult<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallStatus {
    pub active: bool,
    pub allowed: Vec<String>,
}

impl FirewallStatus {
    #[must_use]
    pub fn allows(&self, rule: &str) -> bool {
        self.allowed.iter().any(|r| r == rule)
    }
}

/// Host firewall (ufw).
pub trait Firewall {
    fn status(&self) -> ProvisionResult<FirewallStatus>;

    fn allow(&self, rule: &str) -> ProvisionResult<()>;

    fn enable(&self) -> ProvisionResult<()>;
}

/// A periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub name: String,
    pub schedule: String,
    pub user: String,
    pub command: String,
}

impl CronJob {
    /// Full content of the job's cron.d file.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "SHELL=/bin/sh\n\
             PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
             {} {} {}\n",
            self.schedule, self.user, self.command
        )
    }
}

/// Task scheduler (cron).
pub trait Scheduler {
    /// Whether the scheduler daemon is running.
    fn is_available(&self) -> ProvisionResult<bool>;

    /// Registered content of a job, `None` if absent.
    fn job(&self, name: &str) -> ProvisionResult<Option<String>>;

    fn register(&self, job: &CronJob) -> ProvisionResult<()>;
}

/// Database, role and password for the application.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSpec")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// Database server (PostgreSQL).
pub trait Database {
    /// Whether the role can log into the database with the password.
    fn is_provisioned(&self, spec: &DatabaseSpec) -> ProvisionResult<bool>;

    /// Create or update role and database in one scripted
    /// transaction.
    fn provision(&self, spec: &DatabaseSpec) -> ProvisionResult<()>;
}

/// Local filesystem.
pub trait FileSystem {
    /// File content, `None` if the file does not exist.
    fn read(&self, path: &Path) -> ProvisionResult<Option<String>>;

    /// Write a file with the given mode, creating parent
    /// directories.
    fn write(&self, path: &Path, content: &str, mode: u32) -> ProvisionResult<()>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> ProvisionResult<()>;
}

/// Every collaborator a step may use.
pub struct Host {
    pub packages: Box<dyn PackageManager>,
    pub services: Box<dyn ServiceManager>,
    pub proxy: Box<dyn ReverseProxy>,
    pub certificates: Box<dyn CertificateClient>,
    pub firewall: Box<dyn Firewall>,
    pub scheduler: Box<dyn Scheduler>,
    pub database: Box<dyn Database>,
    pub files: Box<dyn FileSystem>,
    /// Budget of the running step, honoured by every command the
    /// collaborators start.
    pub deadline: Deadline,
}

impl Host {
    /// Collaborators backed by the local OS tools. Outside a step every
    /// command is killed after `timeout`; inside one, at the step
    /// deadline.
    #[must_use]
    pub fn system(timeout: Duration) -> Self {
        let deadline = Deadline::new();
        let shell = Shell::new(timeout).with_deadline(deadline.clone());
        Self {
            packages: Box::new(apt::Apt::new(shell.clone())),
            services: Box::new(systemd::Systemd::new(shell.clone())),
            proxy: Box::new(nginx::Nginx::new(shell.clone())),
            certificates: Box::new(certbot::Certbot::new(shell.clone())),
            firewall: Box::new(ufw::Ufw::new(shell.clone())),
            scheduler: Box::new(cron::Cron::new(shell.clone())),
            database: Box::new(postgres::Postgres::new(shell)),
            files: Box::new(fs::LocalFs),
            deadline,
        }
    }
}

/// Name of the machine the run targets.
#[must_use]
pub fn local_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_job_render() {
        let job = CronJob {
            name: "shop-backup".into(),
            schedule: "0 2 * * *".into(),
            user: "root".into(),
            command: "/usr/local/bin/shop-backup.sh".into(),
        };

        let rendered = job.render();

        assert!(rendered.starts_with("SHELL=/bin/sh\n"));
        assert!(rendered.ends_with("0 2 * * * root /usr/local/bin/shop-backup.sh\n"));
    }

    #[test]
    fn certificate_command_line() {
        let request = CertificateRequest {
            domains: vec!["example.com".into(), "www.example.com".into()],
            email: "ops@example.com".into(),
            webroot: "/var/www/letsencrypt".into(),
        };

        assert_eq!(
            request.command_line(),
            "certbot certonly --webroot -w /var/www/letsencrypt \
             -d example.com -d www.example.com --non-interactive \
             --agree-tos -m ops@example.com"
        );
    }

    #[test]
    fn database_spec_debug_hides_password() {
        let spec = DatabaseSpec {
            name: "shop".into(),
            user: "shop".into(),
            password: "hunter22".into(),
        };
        assert!(!format!("{spec:?}").contains("hunter22"));
    }

    #[test]
    fn firewall_allows() {
        let status = FirewallStatus {
            active: true,
            allowed: vec!["OpenSSH".into()],
        };
        assert!(status.allows("OpenSSH"));
        assert!(!status.allows("Nginx Full"));
    }
}
