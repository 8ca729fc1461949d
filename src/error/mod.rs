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

mod context;

pub use context::{ErrorContext, format_error_chain};

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    /// A hard acquisition did not get the lock before its deadline. The message
    /// names the requester and the holder.
    #[error("Hard lock {locker} timed out after {waited:?}\n{message}")]
    HardTimeout {
        locker: String,
        waited: Duration,
        message: String,
    },

    #[error("Patient wait for lock {locker} was cancelled after {waited:?}")]
    Cancelled { locker: String, waited: Duration },

    /// Failures of the workers behind one composed acquisition.
    #[error("{} of the composed lock acquisitions failed: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<LockError>),

    #[error("Lock worker for {locker} panicked")]
    WorkerPanicked { locker: String },

    /// A failure raised by caller code running under a lock.
    #[error(transparent)]
    Action(Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LockError {
    /// Wraps a caller-code failure so it can travel through retrying policies.
    pub fn action(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LockError::Action(err.into())
    }

    /// True for a hard timeout, or a non-empty aggregate whose first level holds
    /// nothing but hard timeouts. A panic or caller failure mixed into an
    /// aggregate must not be retried away.
    pub fn is_hard_timeout(&self) -> bool {
        match self {
            LockError::HardTimeout { .. } => true,
            LockError::Aggregate(errors) => {
                !errors.is_empty()
                    && errors
                        .iter()
                        .all(|err| matches!(err, LockError::HardTimeout { .. }))
            }
            _ => false,
        }
    }

    /// Same shape as [`LockError::is_hard_timeout`], for cancelled patient waits.
    pub fn is_cancelled(&self) -> bool {
        match self {
            LockError::Cancelled { .. } => true,
            LockError::Aggregate(errors) => {
                !errors.is_empty()
                    && errors
                        .iter()
                        .all(|err| matches!(err, LockError::Cancelled { .. }))
            }
            _ => false,
        }
    }
}

fn summarize(errors: &[LockError]) -> String {
    errors
        .iter()
        .map(|err| match err {
            LockError::HardTimeout { locker, waited, .. } => {
                format!("{locker} timed out after {waited:?}")
            }
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, LockError>;
