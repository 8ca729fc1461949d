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

use crate::locking::locker::Locker;
use crate::locking::policy::PolicyKind;
use log::debug;
use parking_lot::ReentrantMutexGuard;
use std::fmt;
use std::time::{Duration, Instant};

/// Result of an explicit acquisition. A handle is either backed by the locker's
/// primitive or, after a lazy timeout, unsynchronized. Releasing is idempotent and
/// never fails; an unsynchronized handle releases as a no-op.
///
/// Handles are not `Send`: the primitive must be released by the thread that took it.
pub struct LockHandle<'a> {
    locker: &'a Locker,
    policy: PolicyKind,
    guard: Option<ReentrantMutexGuard<'a, ()>>,
    waited: Duration,
    acquired_at: Instant,
    released: bool,
}

impl<'a> LockHandle<'a> {
    pub(crate) fn held(
        locker: &'a Locker,
        policy: PolicyKind,
        guard: ReentrantMutexGuard<'a, ()>,
        waited: Duration,
    ) -> Self {
        Self {
            locker,
            policy,
            guard: Some(guard),
            waited,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub(crate) fn unsynchronized(locker: &'a Locker, policy: PolicyKind, waited: Duration) -> Self {
        Self {
            locker,
            policy,
            guard: None,
            waited,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub fn locker(&self) -> &'a Locker {
        self.locker
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    /// True when this handle owns the primitive (false after a lazy timeout or release).
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Time spent waiting before the handle was produced.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.guard.take() {
            Some(guard) => {
                // Holder fields must be cleared while the primitive is still ours.
                self.locker.note_released();
                drop(guard);
                debug!(
                    "Released {} lock {} after holding it {:.3}s",
                    self.policy,
                    self.locker,
                    self.acquired_at.elapsed().as_secs_f64()
                );
            }
            None => debug!(
                "Lock {} was never acquired by this {} handle; nothing to release",
                self.locker, self.policy
            ),
        }
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LockHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("locker", &self.locker.to_string())
            .field("policy", &self.policy)
            .field("held", &self.is_held())
            .field("waited", &self.waited)
            .finish()
    }
}
