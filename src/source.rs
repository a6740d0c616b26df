//! Where configuration values come from.
//!
//! Flags, `ALICERCE_*` environment variables and an optional YAML
//! settings file are merged into [`Settings`]. A [`ConfigSource`]
//! then fills the gaps (or refuses to) and confirms the result, so
//! the runner never talks to a terminal itself.

use std::fmt;
use std::path::Path;

use dialoguer::{Confirm, Input, Password};
use serde::Deserialize;

use crate::config::{
    self, Sensitivity, Source, VariableStore, API_KEY, APP_NAME, BACKEND_PORT,
    BACKUP_RETENTION_DAYS, BACKUP_SCHEDULE, CONTACT_EMAIL, DATABASE_PASSWORD, DNS_READY, DOMAIN,
    INCLUDE_WWW, NODE_MAJOR, SESSION_SECRET,
};
use crate::error::{ProvisionError, ProvisionResult};
use crate::host::FileSystem;
use crate::report;
use crate::template;

/// Values supplied before any prompting.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub domain: Option<String>,
    #[serde(alias = "email")]
    pub contact_email: Option<String>,
    pub database_password: Option<String>,
    pub api_key: Option<String>,
    pub dns_ready: Option<bool>,
    pub app_name: Option<String>,
    pub backend_port: Option<u16>,
    pub node_major: Option<u16>,
    pub include_www: Option<bool>,
    pub backup_retention_days: Option<u32>,
    pub backup_schedule: Option<String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |v: &Option<String>| v.as_deref().map(config::mask);
        f.debug_struct("Settings")
            .field("domain", &self.domain)
            .field("contact_email", &self.contact_email)
            .field("database_password", &hidden(&self.database_password))
            .field("api_key", &hidden(&self.api_key))
            .field("dns_ready", &self.dns_ready)
            .field("app_name", &self.app_name)
            .field("backend_port", &self.backend_port)
            .field("node_major", &self.node_major)
            .field("include_www", &self.include_www)
            .field("backup_retention_days", &self.backup_retention_days)
            .field("backup_schedule", &self.backup_schedule)
            .finish()
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> ProvisionResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let settings = serde_yaml::from_str(&content)?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Layer `overrides` on top of `self`.
    #[must_use]
    pub fn merge(self, overrides: Self) -> Self {
        Self {
            domain: overrides.domain.or(self.domain),
            contact_email: overrides.contact_email.or(self.contact_email),
            database_password: overrides.database_password.or(self.database_password),
            api_key: overrides.api_key.or(self.api_key),
            dns_ready: overrides.dns_ready.or(self.dns_ready),
            app_name: overrides.app_name.or(self.app_name),
            backend_port: overrides.backend_port.or(self.backend_port),
            node_major: overrides.node_major.or(self.node_major),
            include_www: overrides.include_www.or(self.include_www),
            backup_retention_days: overrides
                .backup_retention_days
                .or(self.backup_retention_days),
            backup_schedule: overrides.backup_schedule.or(self.backup_schedule),
        }
    }

    /// Required keys with no value.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            (DOMAIN, &self.domain),
            (CONTACT_EMAIL, &self.contact_email),
            (DATABASE_PASSWORD, &self.database_password),
            (API_KEY, &self.api_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(k, _)| k)
        .collect()
    }

    fn entries(&self) -> Vec<(&'static str, Option<String>, Sensitivity)> {
        vec![
            (DOMAIN, self.domain.clone(), Sensitivity::Plain),
            (CONTACT_EMAIL, self.contact_email.clone(), Sensitivity::Plain),
            (
                DATABASE_PASSWORD,
                self.database_password.clone(),
                Sensitivity::Secret,
            ),
            (API_KEY, self.api_key.clone(), Sensitivity::Secret),
            (
                DNS_READY,
                self.dns_ready.map(|b| b.to_string()),
                Sensitivity::Plain,
            ),
            (APP_NAME, self.app_name.clone(), Sensitivity::Plain),
            (
                BACKEND_PORT,
                self.backend_port.map(|p| p.to_string()),
                Sensitivity::Plain,
            ),
            (
                NODE_MAJOR,
                self.node_major.map(|n| n.to_string()),
                Sensitivity::Plain,
            ),
            (
                INCLUDE_WWW,
                self.include_www.map(|b| b.to_string()),
                Sensitivity::Plain,
            ),
            (
                BACKUP_RETENTION_DAYS,
                self.backup_retention_days.map(|d| d.to_string()),
                Sensitivity::Plain,
            ),
            (
                BACKUP_SCHEDULE,
                self.backup_schedule.clone(),
                Sensitivity::Plain,
            ),
        ]
    }
}

/// Fills in missing values and confirms the final configuration.
pub trait ConfigSource {
    /// Complete `given`, asking for whatever is missing when the source
    /// can.
    fn collect(&mut self, given: Settings) -> ProvisionResult<Settings>;

    /// Whether the operator accepts the configuration.
    fn confirm(&mut self, store: &VariableStore) -> ProvisionResult<bool>;
}

/// Flags, environment and settings file only. Never prompts.
#[derive(Debug, Default)]
pub struct NonInteractive;

impl ConfigSource for NonInteractive {
    fn collect(&mut self, given: Settings) -> ProvisionResult<Settings> {
        let missing = given.missing_required();
        if missing.is_empty() {
            return Ok(given);
        }
        let hints: Vec<String> = missing
            .iter()
            .map(|k| format!("{k} (--{} or {})", flag_name(k), env_name(k)))
            .collect();
        Err(ProvisionError::InvalidConfig(format!(
            "missing required values: {}",
            hints.join(", ")
        )))
    }

    fn confirm(&mut self, _store: &VariableStore) -> ProvisionResult<bool> {
        Ok(true)
    }
}

/// Terminal prompts for whatever the flags left out.
#[derive(Debug, Default)]
pub struct Interactive {
    assume_yes: bool,
}

impl Interactive {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the final confirmation.
    #[must_use]
    pub const fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }
}

impl ConfigSource for Interactive {
    fn collect(&mut self, mut given: Settings) -> ProvisionResult<Settings> {
        if given.domain.is_none() {
            let domain: String = Input::new()
                .with_prompt("Domain")
                .validate_with(|v: &String| {
                    if config::is_valid_hostname(v.trim()) {
                        Ok(())
                    } else {
                        Err("not a valid hostname")
                    }
                })
                .interact_text()
                .map_err(prompt_error)?;
            given.domain = Some(domain.trim().to_string());
        }

        if given.contact_email.is_none() {
            let email: String = Input::new()
                .with_prompt("Contact email for certificates")
                .interact_text()
                .map_err(prompt_error)?;
            given.contact_email = Some(email.trim().to_string());
        }

        if given.database_password.is_none() {
            let password = Password::new()
                .with_prompt("Database password")
                .with_confirmation("Repeat database password", "Passwords do not match")
                .interact()
                .map_err(prompt_error)?;
            given.database_password = Some(password);
        }

        if given.api_key.is_none() {
            let key = Password::new()
                .with_prompt("API key")
                .interact()
                .map_err(prompt_error)?;
            given.api_key = Some(key);
        }

        if given.dns_ready.is_none() {
            let domain = given.domain.as_deref().unwrap_or("the domain");
            let ready = Confirm::new()
                .with_prompt(format!(
                    "Does DNS for {domain} already point at this server?"
                ))
                .default(false)
                .interact()
                .map_err(prompt_error)?;
            given.dns_ready = Some(ready);
        }

        Ok(given)
    }

    fn confirm(&mut self, store: &VariableStore) -> ProvisionResult<bool> {
        report::print_masked_config(store);
        if self.assume_yes {
            return Ok(true);
        }
        println!();
        Confirm::new()
            .with_prompt("Provision this server with the settings above?")
            .default(true)
            .interact()
            .map_err(prompt_error)
    }
}

fn prompt_error(e: dialoguer::Error) -> ProvisionError {
    ProvisionError::Io(std::io::Error::other(e.to_string()))
}

fn flag_name(key: &str) -> String {
    match key {
        CONTACT_EMAIL => "email".to_string(),
        _ => key.replace('_', "-"),
    }
}

fn env_name(key: &str) -> String {
    format!("ALICERCE_{}", flag_name(key).replace('-', "_").to_uppercase())
}

/// Build the variable store for a run.
///
/// Values supplied up front are tagged as coming from the
/// environment, prompted ones as interactive. The session secret is
/// taken from an existing backend environment file when there is one,
/// so re-runs leave that file untouched.
pub fn collect(
    source: &mut dyn ConfigSource,
    given: Settings,
    files: &dyn FileSystem,
) -> ProvisionResult<VariableStore> {
    let completed = source.collect(given.clone())?;

    let mut store = VariableStore::new();
    for ((key, value, sensitivity), (_, supplied, _)) in
        completed.entries().into_iter().zip(given.entries())
    {
        let Some(value) = value else { continue };
        let origin = if supplied.is_some() {
            Source::Environment
        } else {
            Source::Interactive
        };
        store.set(key, &value, origin, sensitivity)?;
    }
    store.apply_defaults()?;

    let secret = existing_session_secret(&store, files)?.unwrap_or_else(|| {
        log::debug!("Generating a new session secret");
        config::generate_secret()
    });
    store.set(SESSION_SECRET, &secret, Source::Generated, Sensitivity::Secret)?;

    store.validate()?;
    Ok(store)
}

fn existing_session_secret(
    store: &VariableStore,
    files: &dyn FileSystem,
) -> ProvisionResult<Option<String>> {
    let path = store.env_file_path()?;
    let Some(content) = files.read(&path)? else {
        return Ok(None);
    };
    let secret = template::parse_env_file(&content)
        .shift_remove("SESSION_SECRET")
        .filter(|s| !s.is_empty());
    if secret.is_some() {
        log::info!("Reusing session secret from {}", path.display());
    }
    Ok(secret)
}
