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

use std::fmt;
use std::time::Duration;

/// Environment variable overriding the default timeout of lockers built from configuration.
pub const LOCK_TIMEOUT_ENV: &str = "LOCKSMITH_LOCK_TIMEOUT";

/// A wait budget. `Infinite` is only meaningful to callers that loop (patient waits);
/// bounded policies clamp it to `Duration::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTimeoutValue {
    Finite(Duration),
    Infinite,
}

impl LockTimeoutValue {
    pub const fn from_millis(millis: u64) -> Self {
        Self::Finite(Duration::from_millis(millis))
    }

    pub const fn from_secs(seconds: u64) -> Self {
        Self::Finite(Duration::from_secs(seconds))
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            LockTimeoutValue::Finite(duration) => *duration,
            LockTimeoutValue::Infinite => Duration::MAX,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, LockTimeoutValue::Infinite)
    }
}

impl From<Duration> for LockTimeoutValue {
    fn from(duration: Duration) -> Self {
        LockTimeoutValue::Finite(duration)
    }
}

impl fmt::Display for LockTimeoutValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTimeoutValue::Infinite => f.write_str("infinite"),
            LockTimeoutValue::Finite(duration) => f.write_str(&format_wait(*duration)),
        }
    }
}

/// Where the effective timeout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Environment,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: LockTimeoutValue,
    pub source: LockTimeoutSource,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration file",
            LockTimeoutSource::Environment => "environment variable",
            LockTimeoutSource::Explicit => "explicit override",
        };
        f.write_str(label)
    }
}

/// Error produced when parsing a timeout override fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    message: String,
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LockTimeoutParseError {}

impl LockTimeoutParseError {
    fn invalid_value(value: &str) -> Self {
        Self {
            message: format!(
                "Lock timeout value '{value}' is invalid. Use a number with an optional unit \
                 (ms, s, m) or the word 'infinite'."
            ),
        }
    }
}

/// Parses a timeout such as `250ms`, `5s`, `2m`, `30` (seconds) or `infinite`.
pub fn parse_timeout_override(value: &str) -> Result<LockTimeoutValue, LockTimeoutParseError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("infinite") {
        return Ok(LockTimeoutValue::Infinite);
    }

    let (digits, scale_ms) = if let Some(stripped) = trimmed.strip_suffix("ms") {
        (stripped, 1)
    } else if let Some(stripped) = trimmed.strip_suffix('s') {
        (stripped, 1_000)
    } else if let Some(stripped) = trimmed.strip_suffix('m') {
        (stripped, 60_000)
    } else {
        (trimmed, 1_000)
    };

    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|amount| amount.checked_mul(scale_ms))
        .map(LockTimeoutValue::from_millis)
        .ok_or_else(|| LockTimeoutParseError::invalid_value(trimmed))
}

/// Resolves the effective timeout with explicit > environment > config > default precedence.
pub struct LockTimeoutResolver<'a> {
    explicit: Option<LockTimeoutValue>,
    env_override: Option<&'a str>,
    config_value: Option<LockTimeoutValue>,
    default_value: LockTimeoutValue,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(default_value: LockTimeoutValue) -> Self {
        Self {
            explicit: None,
            env_override: None,
            config_value: None,
            default_value,
        }
    }

    pub fn with_explicit(mut self, value: Option<LockTimeoutValue>) -> Self {
        self.explicit = value;
        self
    }

    pub fn with_env(mut self, value: Option<&'a str>) -> Self {
        self.env_override = value;
        self
    }

    pub fn with_config(mut self, value: Option<LockTimeoutValue>) -> Self {
        self.config_value = value;
        self
    }

    pub fn resolve(self) -> Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(value) = self.explicit {
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Explicit,
            });
        }

        if let Some(env_value) = self.env_override {
            let value = parse_timeout_override(env_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Environment,
            });
        }

        if let Some(value) = self.config_value {
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Config,
            });
        }

        Ok(LockTimeoutResolution {
            value: self.default_value,
            source: LockTimeoutSource::Default,
        })
    }
}

/// Renders a wait duration the way diagnostics print it (`850ms`, `1.2s`).
pub fn format_wait(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f32())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
