use crate::config::{APP_NAME, CONTACT_EMAIL, DNS_READY, DOMAIN};
use crate::error::ProvisionResult;
use crate::host::CertificateRequest;
use crate::step::{Outcome, Step, StepContext};
use crate::steps::ACME_WEBROOT;
use crate::steps::proxy::{self, site_config};

/// Let's Encrypt certificate over the http-01 webroot challenge, then
/// switch the nginx site to HTTPS.
///
/// Until the operator confirms DNS points at this host, issuance is
/// left as a deferred action: the challenge would fail and count
/// against the CA's rate limits.
#[derive(Debug)]
pub struct IssueCertificate;

pub fn certificate_request(ctx: &StepContext<'_>) -> ProvisionResult<CertificateRequest> {
    Ok(CertificateRequest {
        domains: ctx.config.server_names()?,
        email: ctx.config.get(CONTACT_EMAIL)?.to_string(),
        webroot: ACME_WEBROOT.to_string(),
    })
}

impl Step for IssueCertificate {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        if !ctx
            .host
            .certificates
            .has_certificate(ctx.config.get(DOMAIN)?)?
        {
            return Ok(false);
        }
        let site = ctx.host.proxy.site(ctx.config.get(APP_NAME)?)?;
        Ok(site == Some(site_config(ctx.config, true)?))
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        let request = certificate_request(ctx)?;
        let domain = ctx.config.get(DOMAIN)?;

        if !ctx.host.certificates.has_certificate(domain)? {
            if !ctx.config.get_bool(DNS_READY)? {
                return Ok(Outcome::Deferred {
                    notice: format!("TLS pending until DNS for {domain} points at this server"),
                    action: request.command_line(),
                });
            }
            log::info!("Requesting certificate for {}", request.domains.join(", "));
            ctx.host.certificates.issue(&request)?;
        }

        proxy::install_site(ctx, &site_config(ctx.config, true)?)?;
        Ok(Outcome::Applied)
    }

    fn remedy(&self, ctx: &StepContext<'_>) -> Option<String> {
        certificate_request(ctx).ok().map(|r| r.command_line())
    }
}
