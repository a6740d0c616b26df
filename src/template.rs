//! Configuration file bodies, rendered from the variable store.
//!
//! Placeholders use `{{key}}`. A key is looked up in the extra
//! bindings first, then in the store; an unknown key fails with
//! `MissingConfig` instead of leaving the placeholder in place.

use indexmap::IndexMap;

use crate::config::VariableStore;
use crate::error::{ProvisionError, ProvisionResult};

/// Marker proving a page was written by us and not uploaded.
pub const PLACEHOLDER_MARKER: &str = "<!-- alicerce placeholder -->";

pub const ENV_FILE: &str = "\
NODE_ENV=production
PORT={{backend_port}}
DB_HOST=127.0.0.1
DB_PORT=5432
DB_NAME={{database_name}}
DB_USER={{database_user}}
DB_PASSWORD={{database_password}}
API_KEY={{api_key}}
SESSION_SECRET={{session_secret}}
PUBLIC_URL=https://{{domain}}
";

pub const SYSTEMD_UNIT: &str = "\
[Unit]
Description={{app_name}} backend
After=network.target postgresql.service
Wants=postgresql.service

[Service]
Type=simple
User=www-data
Group=www-data
WorkingDirectory={{backend_dir}}
EnvironmentFile={{backend_dir}}/.env
ExecStart=/usr/bin/node {{backend_dir}}/server.js
Restart=on-failure
RestartSec=5

[Install]
WantedBy=multi-user.target
";

pub const NGINX_LOCATIONS: &str = "    root {{frontend_dir}};
    index index.html;

    location /.well-known/acme-challenge/ {
        root {{acme_webroot}};
    }

    location /api/ {
        proxy_pass http://127.0.0.1:{{backend_port}};
        proxy_http_version 1.1;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }

    location / {
        try_files $uri $uri/ /index.html;
    }
";

pub const NGINX_SITE: &str = "\
server {
    listen 80;
    listen [::]:80;
    server_name {{server_names}};

{{locations}}}
";

pub const NGINX_SITE_TLS: &str = "\
server {
    listen 80;
    listen [::]:80;
    server_name {{server_names}};

    location /.well-known/acme-challenge/ {
        root {{acme_webroot}};
    }

    location / {
        return 301 https://$host$request_uri;
    }
}

server {
    listen 443 ssl http2;
    listen [::]:443 ssl http2;
    server_name {{server_names}};

    ssl_certificate {{fullchain}};
    ssl_certificate_key {{privkey}};
    ssl_protocols TLSv1.2 TLSv1.3;

    add_header Strict-Transport-Security \"max-age=31536000\" always;
    add_header X-Content-Type-Options \"nosniff\" always;
    add_header X-Frame-Options \"DENY\" always;

{{locations}}}
";

pub const BACKUP_SCRIPT: &str = "\
#!/bin/sh
set -eu

BACKUP_DIR=\"{{backup_dir}}\"
STAMP=$(date +%Y%m%d-%H%M%S)

mkdir -p \"$BACKUP_DIR\"
runuser -u postgres -- pg_dump {{database_name}} | gzip > \"$BACKUP_DIR/{{database_name}}-$STAMP.sql.gz\"
find \"$BACKUP_DIR\" -name '{{database_name}}-*.sql.gz' -mtime +{{backup_retention_days}} -delete
";

pub const PLACEHOLDER_PAGE: &str = "\
<!doctype html>
<html>
<head><meta charset=\"utf-8\"><title>{{domain}}</title></head>
<body>
<!-- alicerce placeholder -->
<p>{{domain}} is provisioned. Upload the frontend build to replace this page.</p>
</body>
</html>
";

/// Render a template. `extra` bindings shadow store keys.
pub fn render(
    template: &str,
    store: &VariableStore,
    extra: &[(&str, &str)],
) -> ProvisionResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            ProvisionError::InvalidConfig(format!(
                "unterminated placeholder in template near '{}'",
                after.chars().take(20).collect::<String>()
            ))
        })?;
        let key = after[..end].trim();

        let value = match extra.iter().find(|(k, _)| *k == key) {
            Some((_, v)) => *v,
            None => store.get(key)?,
        };
        out.push_str(value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Parse `KEY=value` lines of an environment file. Blank lines and
/// `#` comments are skipped.
#[must_use]
pub fn parse_env_file(content: &str) -> IndexMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
