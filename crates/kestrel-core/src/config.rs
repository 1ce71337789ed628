use std::str::FromStr;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::models::{BrowserEngine, IdentityPolicy};

/// Which storage backs the identity pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolBackendKind {
    Memory,
    Postgres,
}

impl FromStr for PoolBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "linked_list" => Ok(PoolBackendKind::Memory),
            "postgres" | "postgresql" => Ok(PoolBackendKind::Postgres),
            _ => Err(format!("Unknown pool backend: {s}")),
        }
    }
}

/// Identity pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub backend: PoolBackendKind,
    pub max_size: usize,
    /// Every declared partition. Declared engines answer size queries even
    /// while nothing fills them.
    pub engines: Vec<BrowserEngine>,
    /// Engine used when a request or fill does not name one.
    pub default_engine: BrowserEngine,
    pub policy: IdentityPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backend: PoolBackendKind::Memory,
            max_size: 20,
            engines: vec![BrowserEngine::Firefox, BrowserEngine::Chromium],
            default_engine: BrowserEngine::Chromium,
            policy: IdentityPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Read configuration from environment variables.
    ///
    /// - `KESTREL_POOL_BACKEND` (`memory` | `postgres`, defaults to `memory`)
    /// - `KESTREL_COOKIE_POOL_SIZE` (defaults to 20)
    /// - `KESTREL_COOKIE_ENGINES` (comma-separated, defaults to `firefox,chromium`)
    /// - `KESTREL_DEFAULT_ENGINE` (defaults to `chromium`, must be declared)
    /// - `KESTREL_IDENTITY_TTL_SECS` (defaults to three days)
    /// - `KESTREL_IDENTITY_USABLE_TIMES` (defaults to 5)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let backend = match std::env::var("KESTREL_POOL_BACKEND") {
            Err(_) => defaults.backend,
            Ok(raw) => raw.parse().map_err(AppError::ConfigError)?,
        };

        let max_size = positive_env("KESTREL_COOKIE_POOL_SIZE", defaults.max_size as u64)? as usize;

        let engines = match std::env::var("KESTREL_COOKIE_ENGINES") {
            Err(_) => defaults.engines,
            Ok(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<BrowserEngine>().map_err(AppError::ConfigError))
                .collect::<Result<Vec<_>, _>>()?,
        };
        if engines.is_empty() {
            return Err(AppError::ConfigError(
                "KESTREL_COOKIE_ENGINES must name at least one engine".into(),
            ));
        }

        let explicit = match std::env::var("KESTREL_DEFAULT_ENGINE") {
            Err(_) => None,
            Ok(raw) => Some(raw.parse::<BrowserEngine>().map_err(AppError::ConfigError)?),
        };
        let default_engine = resolve_default_engine(&engines, explicit, defaults.default_engine)?;

        let ttl_secs = positive_env(
            "KESTREL_IDENTITY_TTL_SECS",
            defaults.policy.ttl.num_seconds() as u64,
        )?;
        let usable_times = positive_env(
            "KESTREL_IDENTITY_USABLE_TIMES",
            u64::from(defaults.policy.usable_times),
        )?;
        let usable_times = u32::try_from(usable_times)
            .ok()
            .filter(|n| *n <= IdentityPolicy::NON_EXPIRING_USES)
            .ok_or_else(|| {
                AppError::ConfigError(format!(
                    "KESTREL_IDENTITY_USABLE_TIMES must be at most {}",
                    IdentityPolicy::NON_EXPIRING_USES
                ))
            })?;

        Ok(Self {
            backend,
            max_size,
            engines,
            default_engine,
            policy: IdentityPolicy {
                ttl: TimeDelta::seconds(ttl_secs as i64),
                usable_times,
            },
        })
    }
}

/// An explicit choice must be declared. Otherwise `fallback` is used when
/// declared, else the first declared engine.
fn resolve_default_engine(
    engines: &[BrowserEngine],
    explicit: Option<BrowserEngine>,
    fallback: BrowserEngine,
) -> Result<BrowserEngine, AppError> {
    if let Some(engine) = explicit {
        if !engines.contains(&engine) {
            return Err(AppError::ConfigError(format!(
                "KESTREL_DEFAULT_ENGINE '{engine}' is not among KESTREL_COOKIE_ENGINES"
            )));
        }
        return Ok(engine);
    }
    if engines.contains(&fallback) {
        return Ok(fallback);
    }
    engines
        .first()
        .copied()
        .ok_or_else(|| AppError::ConfigError("No engines declared".into()))
}

/// Parse a positive integer env var, falling back to `default` when unset.
pub(crate) fn positive_env(name: &str, default: u64) -> Result<u64, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => {
            let parsed: u64 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid {name} '{raw}': must be a positive integer"
                ))
            })?;
            if parsed == 0 {
                return Err(AppError::ConfigError(format!("{name} must be at least 1")));
            }
            Ok(parsed)
        }
    }
}
