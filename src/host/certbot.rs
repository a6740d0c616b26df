use std::path::PathBuf;

use crate::cmd::Shell;
use crate::error::ProvisionResult;
use crate::host::{CertificateClient, CertificateRequest};

const LIVE_DIR: &str = "/etc/letsencrypt/live";

/// `CertificateClient` backed by `certbot` in webroot mode, so the
/// nginx site stays under our control.
pub struct Certbot {
    shell: Shell,
}

impl Certbot {
    #[must_use]
    pub const fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

/// Path of the issued certificate chain for a domain.
#[must_use]
pub fn fullchain_path(domain: &str) -> PathBuf {
    PathBuf::from(LIVE_DIR).join(domain).join("fullchain.pem")
}

/// Path of the private key for a domain.
#[must_use]
pub fn privkey_path(domain: &str) -> PathBuf {
    PathBuf::from(LIVE_DIR).join(domain).join("privkey.pem")
}

/// Non-interactive `certbot certonly` arguments for a request.
#[must_use]
pub fn issue_args(request: &CertificateRequest) -> Vec<&str> {
    let mut args = vec!["certonly", "--webroot", "-w", request.webroot.as_str()];
    for domain in &request.domains {
        args.push("-d");
        args.push(domain);
    }
    args.extend_from_slice(&["--non-interactive", "--agree-tos", "-m", request.email.as_str()]);
    args
}

impl CertificateClient for Certbot {
    fn has_certificate(&self, domain: &str) -> ProvisionResult<bool> {
        Ok(fullchain_path(domain).exists())
    }

    fn issue(&self, request: &CertificateRequest) -> ProvisionResult<()> {
        self.shell.run("certbot", &issue_args(request))?;
        Ok(())
    }
}
