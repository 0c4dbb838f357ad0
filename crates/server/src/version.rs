//! Build identification reported by `/version`

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use textgen_common::{Result, TextgenError};

/// Environment variable carrying the commit hash
pub const GITHASH_VAR: &str = "GITHASH";

/// Environment variable carrying the RFC 3339 build timestamp
pub const BUILD_TIME_VAR: &str = "BUILD_TIME";

/// Version record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub app_name: String,
    pub githash: Option<String>,
    pub build_time: Option<String>,
}

impl VersionInfo {
    /// Build the record from the current process environment
    pub fn from_env(app_name: &str) -> Result<Self> {
        Self::from_lookup(app_name, |key| std::env::var(key).ok())
    }

    /// Build the record from an arbitrary variable lookup
    pub fn from_lookup<F>(app_name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let build_time = lookup(BUILD_TIME_VAR)
            .map(|raw| normalize_build_time(&raw))
            .transpose()?;

        Ok(Self {
            app_name: app_name.to_string(),
            githash: lookup(GITHASH_VAR),
            build_time,
        })
    }
}

/// Re-render an RFC 3339 timestamp, using `Z` for a zero offset
pub fn normalize_build_time(raw: &str) -> Result<String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|time| time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .map_err(|e| TextgenError::internal(format!("Invalid {} '{}': {}", BUILD_TIME_VAR, raw, e)))
}
