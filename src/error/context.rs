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

use crate::error::LockError;
use crate::locking::timeout::{LOCK_TIMEOUT_ENV, format_wait};
use std::fmt;

pub struct ErrorContext<'a> {
    pub error: &'a LockError,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(error: &'a LockError) -> Self {
        let (suggestion, details) = match error {
            LockError::HardTimeout {
                locker,
                waited,
                message,
            } => {
                let suggestion = Some(format!(
                    "Raise the deadline for {locker}, or wrap nested hard locks in \
                     hard_with_retries so a busy inner lock backs off instead of failing."
                ));
                let details = Some(format!(
                    "Gave up after {}.\n{message}",
                    format_wait(*waited)
                ));
                (suggestion, details)
            }
            LockError::Cancelled { locker, waited } => {
                let suggestion = None;
                let details = Some(format!(
                    "Stopped waiting for {locker} after {}; the protected action did not run.",
                    format_wait(*waited)
                ));
                (suggestion, details)
            }
            LockError::Aggregate(errors) => {
                let suggestion = if error.is_hard_timeout() {
                    Some(
                        "Use MultiLocker::hard_with_retries so the whole set is retried when one \
                         member is busy."
                            .to_string(),
                    )
                } else {
                    None
                };
                let details = Some(format!(
                    "Member failures:\n{}",
                    errors
                        .iter()
                        .map(|e| format!("  - {}", first_line(e)))
                        .collect::<Vec<_>>()
                        .join("\n")
                ));
                (suggestion, details)
            }
            LockError::WorkerPanicked { locker } => {
                let suggestion = None;
                let details = Some(format!(
                    "The thread holding {locker} for a composed acquisition panicked; the lock \
                     was released during unwinding."
                ));
                (suggestion, details)
            }
            LockError::ConfigError(msg) => {
                let suggestion = Some(format!(
                    "Check locksmith.toml and {LOCK_TIMEOUT_ENV} (accepted: '250ms', '5s', '2m', \
                     'infinite')."
                ));
                let details = Some(msg.clone());
                (suggestion, details)
            }
            LockError::Io(io_err) => {
                let suggestion = match io_err.kind() {
                    std::io::ErrorKind::PermissionDenied => {
                        Some("Check permissions on the configuration directory.".to_string())
                    }
                    std::io::ErrorKind::NotFound => Some(
                        "Ensure the file or directory exists and the path is correct.".to_string(),
                    ),
                    _ => None,
                };
                let details = Some(format!("I/O error: {io_err}"));
                (suggestion, details)
            }
            LockError::Action(_) => (None, None),
        };

        ErrorContext {
            error,
            suggestion,
            details,
        }
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestion = Some(suggestion);
        self
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", first_line(self.error))?;

        if let Some(details) = &self.details {
            write!(f, "\n\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

pub fn format_error_chain(error: &LockError) -> String {
    ErrorContext::new(error).to_string()
}

fn first_line(error: &LockError) -> String {
    let rendered = error.to_string();
    rendered.lines().next().unwrap_or_default().to_string()
}
