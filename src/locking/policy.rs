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

use crate::locking::cancellation::CancellationToken;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// The three ways a locker may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PolicyKind {
    /// Runs the action even when the lock could not be taken in time.
    Lazy,
    /// Waits forever, warning after every slice.
    Patient,
    /// Fails with a timeout instead of running the action.
    Hard,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PolicyKind::Lazy => "lazy",
            PolicyKind::Patient => "patient",
            PolicyKind::Hard => "hard",
        };
        f.write_str(label)
    }
}

/// A fully parameterised acquisition policy. `None` durations fall back to the
/// locker's default timeout at the time of the call.
#[derive(Debug, Clone)]
pub enum LockPolicy {
    Lazy {
        timeout: Option<Duration>,
    },
    Patient {
        warn_every: Option<Duration>,
        cancellation: Option<CancellationToken>,
    },
    Hard {
        die_after: Option<Duration>,
    },
}

impl LockPolicy {
    pub fn lazy() -> Self {
        LockPolicy::Lazy { timeout: None }
    }

    pub fn patient() -> Self {
        LockPolicy::Patient {
            warn_every: None,
            cancellation: None,
        }
    }

    pub fn hard() -> Self {
        LockPolicy::Hard { die_after: None }
    }

    /// Sets the policy's time budget (timeout, warning slice or deadline).
    pub fn with_budget(self, budget: Duration) -> Self {
        match self {
            LockPolicy::Lazy { .. } => LockPolicy::Lazy {
                timeout: Some(budget),
            },
            LockPolicy::Patient { cancellation, .. } => LockPolicy::Patient {
                warn_every: Some(budget),
                cancellation,
            },
            LockPolicy::Hard { .. } => LockPolicy::Hard {
                die_after: Some(budget),
            },
        }
    }

    /// Attaches a cancellation token. Only patient waits observe it; other policies
    /// are returned unchanged.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        match self {
            LockPolicy::Patient { warn_every, .. } => LockPolicy::Patient {
                warn_every,
                cancellation: Some(token),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            LockPolicy::Lazy { .. } => PolicyKind::Lazy,
            LockPolicy::Patient { .. } => PolicyKind::Patient,
            LockPolicy::Hard { .. } => PolicyKind::Hard,
        }
    }

    pub fn budget(&self) -> Option<Duration> {
        match self {
            LockPolicy::Lazy { timeout } => *timeout,
            LockPolicy::Patient { warn_every, .. } => *warn_every,
            LockPolicy::Hard { die_after } => *die_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_applies_to_each_variant() {
        let budget = Duration::from_millis(75);
        assert_eq!(LockPolicy::lazy().with_budget(budget).budget(), Some(budget));
        assert_eq!(
            LockPolicy::patient().with_budget(budget).budget(),
            Some(budget)
        );
        assert_eq!(LockPolicy::hard().with_budget(budget).budget(), Some(budget));
        assert_eq!(LockPolicy::hard().budget(), None);
    }

    #[test]
    fn cancellation_only_sticks_to_patient() {
        let token = CancellationToken::new();
        let patient = LockPolicy::patient().with_cancellation(token.clone());
        assert!(matches!(
            patient,
            LockPolicy::Patient {
                cancellation: Some(_),
                ..
            }
        ));

        let hard = LockPolicy::hard().with_cancellation(token);
        assert_eq!(hard.kind(), PolicyKind::Hard);
    }

    #[test]
    fn kinds_render_lowercase() {
        assert_eq!(PolicyKind::Patient.to_string(), "patient");
    }
}
