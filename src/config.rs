// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{LockError, Result};
use crate::locking::locker::{DEFAULT_RETRY_AFTER, DEFAULT_TIMEOUT};
use crate::locking::timeout::{
    LOCK_TIMEOUT_ENV, LockTimeoutResolver, LockTimeoutSource, LockTimeoutValue,
};
use crate::locking::tracer::DEFAULT_IGNORED_PREFIXES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "locksmith.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocksmithConfig {
    #[serde(default)]
    pub locker: LockerConfig,

    #[serde(default)]
    pub tracer: TracerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockerConfig {
    /// Lazy timeout and hard deadline for calls that do not pass their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,

    /// Patient warning slice; falls back to `default_timeout_ms` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_every_ms: Option<u64>,

    /// Per-attempt budget of `Locker::hard_retrying`.
    #[serde(default = "default_retry_after_ms")]
    pub retry_after_ms: u64,

    /// Where `default_timeout_ms` came from after loading.
    #[serde(skip)]
    pub timeout_source: LockTimeoutSource,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            warn_every_ms: None,
            retry_after_ms: default_retry_after_ms(),
            timeout_source: LockTimeoutSource::Default,
        }
    }
}

impl LockerConfig {
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn warn_every(&self) -> Duration {
        self.warn_every_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.default_timeout())
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.retry_after_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Resolve native stack frames into holder snapshots. Costly; off by default.
    #[serde(default)]
    pub capture_frames: bool,

    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            capture_frames: false,
            ignored_prefixes: default_ignored_prefixes(),
        }
    }
}

fn default_retry_after_ms() -> u64 {
    u64::try_from(DEFAULT_RETRY_AFTER.as_millis()).unwrap_or(u64::MAX)
}

fn default_ignored_prefixes() -> Vec<String> {
    DEFAULT_IGNORED_PREFIXES
        .iter()
        .map(|prefix| prefix.to_string())
        .collect()
}

impl LocksmithConfig {
    /// Loads `locksmith.toml` from `dir` (defaults when absent) and applies the
    /// `LOCKSMITH_LOCK_TIMEOUT` override.
    pub fn load(dir: &Path) -> Result<Self> {
        let env_value = std::env::var(LOCK_TIMEOUT_ENV).ok();
        Self::load_with_env(dir, env_value.as_deref())
    }

    pub fn load_with_env(dir: &Path, env_timeout: Option<&str>) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)?;
            let config: LocksmithConfig = toml::from_str(&contents).map_err(|e| {
                LockError::ConfigError(format!("Failed to parse {CONFIG_FILE_NAME}: {e}"))
            })?;
            log::debug!("Loaded config from {config_path:?}");
            config
        } else {
            log::debug!("Config file not found at {config_path:?}, using defaults");
            Self::default()
        };

        let resolution = LockTimeoutResolver::new(LockTimeoutValue::Finite(DEFAULT_TIMEOUT))
            .with_env(env_timeout)
            .with_config(
                config
                    .locker
                    .default_timeout_ms
                    .map(LockTimeoutValue::from_millis),
            )
            .resolve()
            .map_err(|e| LockError::ConfigError(format!("{LOCK_TIMEOUT_ENV}: {e}")))?;

        if resolution.source != LockTimeoutSource::Default {
            config.locker.default_timeout_ms =
                Some(u64::try_from(resolution.value.as_duration().as_millis()).unwrap_or(u64::MAX));
        }
        config.locker.timeout_source = resolution.source;
        log::debug!(
            "Default lock timeout {} (source: {:?})",
            resolution.value,
            resolution.source
        );
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| LockError::ConfigError(format!("Failed to serialize config: {e}")))?;

        fs::write(&config_path, contents)?;
        log::debug!("Saved config to {config_path:?}");
        Ok(())
    }
}
