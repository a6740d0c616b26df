//! Variable store holding the configuration values of one run.
//!
//! Values are collected (or generated) once when the run starts and
//! are immutable afterwards. Secrets never leave the store in
//! cleartext except through [`VariableStore::get`], which steps use
//! to render the artifacts that need them.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use indexmap::IndexMap;
use rand::RngCore;
use rand::rngs::OsRng;
use regex::Regex;
use serde::Serialize;

use crate::error::{ProvisionError, ProvisionResult};

pub const DOMAIN: &str = "domain";
pub const CONTACT_EMAIL: &str = "contact_email";
pub const DATABASE_PASSWORD: &str = "database_password";
pub const API_KEY: &str = "api_key";
pub const SESSION_SECRET: &str = "session_secret";
pub const DNS_READY: &str = "dns_ready";
pub const APP_NAME: &str = "app_name";
pub const INSTALL_DIR: &str = "install_dir";
pub const DATABASE_NAME: &str = "database_name";
pub const DATABASE_USER: &str = "database_user";
pub const BACKEND_PORT: &str = "backend_port";
pub const NODE_MAJOR: &str = "node_major";
pub const BACKUP_DIR: &str = "backup_dir";
pub const BACKUP_RETENTION_DAYS: &str = "backup_retention_days";
pub const BACKUP_SCHEDULE: &str = "backup_schedule";
pub const INCLUDE_WWW: &str = "include_www";

const REQUIRED: &[&str] = &[
    DOMAIN,
    CONTACT_EMAIL,
    DATABASE_PASSWORD,
    API_KEY,
    SESSION_SECRET,
];

const PREVIEW_PREFIX_LEN: usize = 15;
/// Characters that must stay hidden before a secret gets a prefix
/// preview.
const PREVIEW_MIN_HIDDEN: usize = 4;
const SECRET_PLACEHOLDER: &str = "********";
const MIN_PASSWORD_LEN: usize = 8;

static HOSTNAME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid regex")
});

static SQL_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid regex"));

static APP_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]{0,31}$").expect("valid regex"));

static CRON_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z*/,-]+$").expect("valid regex"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex")
});

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Interactive,
    Generated,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Plain,
    Secret,
}

#[derive(Clone)]
pub struct ConfigValue {
    pub key: String,
    value: String,
    pub source: Source,
    pub sensitivity: Sensitivity,
}

impl ConfigValue {
    /// Display form of the value: secrets are masked.
    #[must_use]
    pub fn display(&self) -> String {
        match self.sensitivity {
            Sensitivity::Plain => self.value.clone(),
            Sensitivity::Secret => mask(&self.value),
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigValue")
            .field("key", &self.key)
            .field("value", &self.display())
            .field("source", &self.source)
            .field("sensitivity", &self.sensitivity)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    values: IndexMap<String, ConfigValue>,
}

impl VariableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value. Values are immutable for the run, so setting a
    /// key twice is rejected.
    pub fn set(
        &mut self,
        key: &str,
        value: &str,
        source: Source,
        sensitivity: Sensitivity,
    ) -> ProvisionResult<()> {
        if self.values.contains_key(key) {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{key}' is already set for this run"
            )));
        }
        self.values.insert(
            key.to_string(),
            ConfigValue {
                key: key.to_string(),
                value: value.to_string(),
                source,
                sensitivity,
            },
        );
        Ok(())
    }

    pub fn get(&self, key: &str) -> ProvisionResult<&str> {
        self.values
            .get(key)
            .map(|v| v.value.as_str())
            .ok_or_else(|| ProvisionError::MissingConfig(key.to_string()))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> ProvisionResult<bool> {
        parse_bool(self.get(key)?).ok_or_else(|| {
            ProvisionError::InvalidConfig(format!("'{key}' must be true or false"))
        })
    }

    pub fn get_u16(&self, key: &str) -> ProvisionResult<u16> {
        self.get(key)?
            .parse()
            .map_err(|_| ProvisionError::InvalidConfig(format!("'{key}' must be a number")))
    }

    /// Whether a key holds a secret. Unknown keys are not secret.
    #[must_use]
    pub fn is_secret(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|v| v.sensitivity == Sensitivity::Secret)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigValue> {
        self.values.values()
    }

    /// Key to display string, in insertion order, with every secret
    /// masked.
    #[must_use]
    pub fn masked_summary(&self) -> IndexMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.display()))
            .collect()
    }

    /// Fill in derived values for every optional key that is still
    /// unset.
    pub fn apply_defaults(&mut self) -> ProvisionResult<()> {
        let app_name = self
            .get(APP_NAME)
            .map_or_else(|_| "webapp".to_string(), str::to_string);
        let db_ident = app_name.replace('-', "_");

        let defaults = [
            (APP_NAME, app_name.clone()),
            (INSTALL_DIR, format!("/var/www/{app_name}")),
            (DATABASE_NAME, db_ident.clone()),
            (DATABASE_USER, db_ident),
            (BACKEND_PORT, "8000".to_string()),
            (NODE_MAJOR, "20".to_string()),
            (BACKUP_DIR, format!("/var/backups/{app_name}")),
            (BACKUP_RETENTION_DAYS, "7".to_string()),
            (BACKUP_SCHEDULE, "0 2 * * *".to_string()),
            (INCLUDE_WWW, "true".to_string()),
            (DNS_READY, "false".to_string()),
        ];

        for (key, value) in defaults {
            if !self.contains(key) {
                self.set(key, &value, Source::Generated, Sensitivity::Plain)?;
            }
        }
        Ok(())
    }

    /// Check required keys and value grammar. Runs before any step
    /// touches the host.
    pub fn validate(&self) -> ProvisionResult<()> {
        for key in REQUIRED {
            match self.get(key) {
                Ok(v) if !v.trim().is_empty() => {}
                _ => {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "'{key}' is required"
                    )));
                }
            }
        }

        let domain = self.get(DOMAIN)?;
        if !is_valid_hostname(domain) {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{domain}' is not a valid hostname"
            )));
        }

        let email = self.get(CONTACT_EMAIL)?;
        if !EMAIL.is_match(email) {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{email}' is not a valid email address"
            )));
        }

        if self.get(DATABASE_PASSWORD)?.chars().count() < MIN_PASSWORD_LEN {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{DATABASE_PASSWORD}' must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.contains(BACKEND_PORT) && self.get_u16(BACKEND_PORT)? == 0 {
            return Err(ProvisionError::InvalidConfig(
                "'backend_port' must be between 1 and 65535".into(),
            ));
        }

        if self.get(APP_NAME).is_ok_and(|n| !APP_IDENT.is_match(n)) {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{APP_NAME}' must start with a lowercase letter and contain \
                 only lowercase letters, digits or hyphens"
            )));
        }

        for key in [DATABASE_NAME, DATABASE_USER] {
            if self.get(key).is_ok_and(|ident| !SQL_IDENT.is_match(ident)) {
                return Err(ProvisionError::InvalidConfig(format!(
                    "'{key}' must be lowercase letters, digits or underscores"
                )));
            }
        }

        for key in [DNS_READY, INCLUDE_WWW] {
            if self.contains(key) {
                self.get_bool(key)?;
            }
        }

        if self.get(BACKUP_SCHEDULE).is_ok_and(|s| !is_valid_schedule(s)) {
            return Err(ProvisionError::InvalidConfig(format!(
                "'{BACKUP_SCHEDULE}' must be five cron fields, e.g. \"0 2 * * *\""
            )));
        }

        Ok(())
    }

    /// Domains the certificate and proxy are issued for.
    pub fn server_names(&self) -> ProvisionResult<Vec<String>> {
        let domain = self.get(DOMAIN)?;
        let mut names = vec![domain.to_string()];
        if self.get_bool(INCLUDE_WWW)? && !domain.starts_with("www.") {
            names.push(format!("www.{domain}"));
        }
        Ok(names)
    }

    /// Where the backend artifacts and its environment file live.
    pub fn backend_dir(&self) -> ProvisionResult<PathBuf> {
        Ok(PathBuf::from(self.get(INSTALL_DIR)?).join("backend"))
    }

    /// Static root served by the reverse proxy.
    pub fn frontend_dir(&self) -> ProvisionResult<PathBuf> {
        Ok(PathBuf::from(self.get(INSTALL_DIR)?).join("frontend"))
    }

    pub fn env_file_path(&self) -> ProvisionResult<PathBuf> {
        Ok(self.backend_dir()?.join(".env"))
    }
}

/// Mask a secret for display. Long secrets keep a short prefix so
/// they can be told apart; short ones are fully hidden.
#[must_use]
pub fn mask(secret: &str) -> String {
    if secret.chars().count() > PREVIEW_PREFIX_LEN + PREVIEW_MIN_HIDDEN {
        let prefix: String = secret.chars().take(PREVIEW_PREFIX_LEN).collect();
        format!("{prefix}...")
    } else {
        SECRET_PLACEHOLDER.to_string()
    }
}

/// 32 random bytes from the OS, hex encoded.
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[must_use]
pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| HOSTNAME_LABEL.is_match(l))
}

/// Five cron time fields on one line. The schedule is written
/// verbatim into a cron.d file.
#[must_use]
pub fn is_valid_schedule(schedule: &str) -> bool {
    let fields: Vec<&str> = schedule
        .split([' ', '\t'])
        .filter(|f| !f.is_empty())
        .collect();
    fields.len() == 5 && fields.iter().all(|f| CRON_FIELD.is_match(f))
}

#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
