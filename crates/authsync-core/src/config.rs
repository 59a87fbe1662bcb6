//! Session configuration.
//!
//! Endpoints, routes, credential lifetime, and the execution context kind.
//! Configuration is read from `~/.config/authsync/config.json` when present,
//! and `AUTHSYNC_*` environment variables (optionally from a `.env` file)
//! override individual fields.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::CredentialOptions;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "authsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Credentials live for 30 days unless renewed.
const DEFAULT_CREDENTIAL_MAX_AGE_DAYS: i64 = 30;

/// Upper bound for `credential_max_age_days`, about a century.
const MAX_CREDENTIAL_MAX_AGE_DAYS: i64 = 36_500;

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Whether a forced sign-out can be observed by the user in this context.
///
/// An interactive context (a window, a tab, a TUI) can navigate and broadcast.
/// A background context (server-side render, worker) must never force a
/// sign-out it cannot safely announce; auth failures are only propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    #[default]
    Interactive,
    Background,
}

impl ContextKind {
    pub fn is_observable(self) -> bool {
        matches!(self, ContextKind::Interactive)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interactive" => Some(ContextKind::Interactive),
            "background" => Some(ContextKind::Background),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub sign_in_path: String,
    pub renewal_path: String,
    pub identity_path: String,
    /// Well-known broadcast channel shared by all contexts of one application.
    pub channel_name: String,
    pub context_kind: ContextKind,
    pub credential_max_age_days: i64,
    pub credential_path: String,
    pub authenticated_route: String,
    pub unauthenticated_route: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            sign_in_path: "/sessions".to_string(),
            renewal_path: "/refresh".to_string(),
            identity_path: "/me".to_string(),
            channel_name: "auth".to_string(),
            context_kind: ContextKind::Interactive,
            credential_max_age_days: DEFAULT_CREDENTIAL_MAX_AGE_DAYS,
            credential_path: "/".to_string(),
            authenticated_route: "/dashboard".to_string(),
            unauthenticated_route: "/".to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Self =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.sanitize();
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the config file, then apply `AUTHSYNC_*` overrides from the
    /// environment and `.env`.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AUTHSYNC_BASE_URL") {
            self.base_url = url;
        }
        if let Some(channel) = lookup("AUTHSYNC_CHANNEL") {
            self.channel_name = channel;
        }
        if let Some(kind) = lookup("AUTHSYNC_CONTEXT") {
            match ContextKind::parse(&kind) {
                Some(kind) => self.context_kind = kind,
                None => warn!(value = %kind, "Ignoring unknown AUTHSYNC_CONTEXT"),
            }
        }
        if let Some(days) = lookup("AUTHSYNC_CREDENTIAL_MAX_AGE_DAYS") {
            match days.trim().parse::<i64>() {
                Ok(days) if max_age_in_range(days) => self.credential_max_age_days = days,
                _ => warn!(value = %days, "Ignoring invalid AUTHSYNC_CREDENTIAL_MAX_AGE_DAYS"),
            }
        }
        if let Some(secs) = lookup("AUTHSYNC_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %secs, "Ignoring invalid AUTHSYNC_TIMEOUT_SECS"),
            }
        }
    }

    /// Reset values a hand-edited config file may carry out of range.
    fn sanitize(&mut self) {
        if !max_age_in_range(self.credential_max_age_days) {
            warn!(
                value = self.credential_max_age_days,
                "Ignoring invalid credential_max_age_days in config file"
            );
            self.credential_max_age_days = DEFAULT_CREDENTIAL_MAX_AGE_DAYS;
        }
        if self.request_timeout_secs == 0 {
            warn!("Ignoring zero request_timeout_secs in config file");
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
    }

    /// Options every persisted credential is written with. An out-of-range
    /// max age falls back to the default.
    pub fn credential_options(&self) -> CredentialOptions {
        let max_age = Some(self.credential_max_age_days)
            .filter(|days| max_age_in_range(*days))
            .and_then(Duration::try_days)
            .unwrap_or_else(|| {
                warn!(
                    value = self.credential_max_age_days,
                    "Credential max age out of range, using default"
                );
                Duration::days(DEFAULT_CREDENTIAL_MAX_AGE_DAYS)
            });
        CredentialOptions {
            max_age,
            path: self.credential_path.clone(),
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default location of the shared credential file.
    pub fn credentials_file() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("credentials.json"))
    }
}

fn max_age_in_range(days: i64) -> bool {
    (1..=MAX_CREDENTIAL_MAX_AGE_DAYS).contains(&days)
}
