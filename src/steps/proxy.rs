use std::path::Path;

use crate::config::{APP_NAME, DOMAIN, VariableStore};
use crate::error::ProvisionResult;
use crate::host::certbot;
use crate::step::{Outcome, Step, StepContext};
use crate::steps::ACME_WEBROOT;
use crate::template::{self, NGINX_LOCATIONS, NGINX_SITE, NGINX_SITE_TLS};

/// nginx site for the application, replacing the default site.
#[derive(Debug)]
pub struct ConfigureProxy;

/// Site config for the application, with the HTTPS server block when
/// `tls` is set.
pub fn site_config(config: &VariableStore, tls: bool) -> ProvisionResult<String> {
    let frontend_dir = config.frontend_dir()?.display().to_string();
    let locations = template::render(
        NGINX_LOCATIONS,
        config,
        &[
            ("frontend_dir", frontend_dir.as_str()),
            ("acme_webroot", ACME_WEBROOT),
        ],
    )?;
    let server_names = config.server_names()?.join(" ");

    if tls {
        let domain = config.get(DOMAIN)?;
        let fullchain = certbot::fullchain_path(domain).display().to_string();
        let privkey = certbot::privkey_path(domain).display().to_string();
        template::render(
            NGINX_SITE_TLS,
            config,
            &[
                ("server_names", server_names.as_str()),
                ("locations", locations.as_str()),
                ("acme_webroot", ACME_WEBROOT),
                ("fullchain", fullchain.as_str()),
                ("privkey", privkey.as_str()),
            ],
        )
    } else {
        template::render(
            NGINX_SITE,
            config,
            &[
                ("server_names", server_names.as_str()),
                ("locations", locations.as_str()),
            ],
        )
    }
}

/// Write, syntax-check and load a site.
pub fn install_site(ctx: &StepContext<'_>, content: &str) -> ProvisionResult<()> {
    let proxy = &ctx.host.proxy;
    ctx.host.files.create_dir_all(Path::new(ACME_WEBROOT))?;
    proxy.install_site(ctx.config.get(APP_NAME)?, content)?;
    proxy.check_config()?;
    proxy.reload()
}

impl ConfigureProxy {
    /// The TLS variant once a certificate exists, so re-running this
    /// step never downgrades a secured site.
    fn desired(ctx: &StepContext<'_>) -> ProvisionResult<String> {
        let tls = ctx
            .host
            .certificates
            .has_certificate(ctx.config.get(DOMAIN)?)?;
        site_config(ctx.config, tls)
    }
}

impl Step for ConfigureProxy {
    fn precondition(&self, ctx: &StepContext<'_>) -> ProvisionResult<bool> {
        let name = ctx.config.get(APP_NAME)?;
        let proxy = &ctx.host.proxy;
        Ok(proxy.site(name)? == Some(Self::desired(ctx)?)
            && proxy.is_site_enabled(name)?
            && !proxy.default_site_enabled()?)
    }

    fn apply(&self, ctx: &StepContext<'_>) -> ProvisionResult<Outcome> {
        install_site(ctx, &Self::desired(ctx)?)?;
        Ok(Outcome::Applied)
    }

    fn remedy(&self, _ctx: &StepContext<'_>) -> Option<String> {
        Some("nginx -t && systemctl reload nginx".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CONTACT_EMAIL, Sensitivity, Source};

    fn config() -> VariableStore {
        let mut store = VariableStore::new();
        store
            .set(DOMAIN, "shop.example.com", Source::Interactive, Sensitivity::Plain)
            .unwrap();
        store
            .set(CONTACT_EMAIL, "ops@example.com", Source::Interactive, Sensitivity::Plain)
            .unwrap();
        store
            .set(APP_NAME, "shop", Source::Interactive, Sensitivity::Plain)
            .unwrap();
        store.apply_defaults().unwrap();
        store
    }

    #[test]
    fn plain_site() {
        let site = site_config(&config(), false).unwrap();

        assert!(site.contains("server_name shop.example.com www.shop.example.com;"));
        assert!(site.contains("root /var/www/shop/frontend;"));
        assert!(site.contains("proxy_pass http://127.0.0.1:8000;"));
        assert!(!site.contains("443"));
        assert!(!site.contains("{{"));
    }

    #[test]
    fn tls_site_points_at_certificate() {
        let site = site_config(&config(), true).unwrap();

        assert!(site.contains("listen 443 ssl"));
        assert!(site.contains(
            "ssl_certificate /etc/letsencrypt/live/shop.example.com/fullchain.pem;"
        ));
        assert!(site.contains("return 301 https://$host$request_uri;"));
        assert!(site.contains("root /var/www/letsencrypt;"));
        assert!(!site.contains("{{"));
    }
}
