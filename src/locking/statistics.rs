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

use crate::locking::policy::PolicyKind;
use crate::locking::timeout::format_wait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Wait-time aggregate for successful acquisitions under one policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PolicyStatistics {
    pub count: u64,
    pub longest_wait: Duration,
    pub cumulative_wait: Duration,
}

impl PolicyStatistics {
    /// Mean wait, zero when nothing has been recorded.
    pub fn average_wait(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.cumulative_wait.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn record(&mut self, waited: Duration) {
        self.count = self.count.saturating_add(1);
        self.longest_wait = self.longest_wait.max(waited);
        self.cumulative_wait = self.cumulative_wait.saturating_add(waited);
    }
}

impl fmt::Display for PolicyStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} acquired, avg wait {}, longest {}",
            self.count,
            format_wait(self.average_wait()),
            format_wait(self.longest_wait)
        )
    }
}

/// Point-in-time copy of a locker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStatistics {
    pub lazy: PolicyStatistics,
    pub patient: PolicyStatistics,
    pub hard: PolicyStatistics,
    pub lazy_timeouts: u64,
    pub patient_delays: u64,
    pub hard_timeouts: u64,
}

impl LockStatistics {
    pub fn policy(&self, kind: PolicyKind) -> &PolicyStatistics {
        match kind {
            PolicyKind::Lazy => &self.lazy,
            PolicyKind::Patient => &self.patient,
            PolicyKind::Hard => &self.hard,
        }
    }

    pub fn total_acquisitions(&self) -> u64 {
        self.lazy.count + self.patient.count + self.hard.count
    }
}

impl fmt::Display for LockStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "lazy:    {} ({} timed out)", self.lazy, self.lazy_timeouts)?;
        writeln!(f, "patient: {} ({} delays)", self.patient, self.patient_delays)?;
        write!(f, "hard:    {} ({} timed out)", self.hard, self.hard_timeouts)
    }
}

/// Guards a locker's counters with a mutex of its own, so readers never wait on the
/// locker's primitive and never see a half-applied update.
#[derive(Debug, Default)]
pub struct StatisticsRecorder {
    inner: Mutex<LockStatistics>,
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquired(&self, kind: PolicyKind, waited: Duration) {
        let mut stats = self.inner.lock();
        match kind {
            PolicyKind::Lazy => stats.lazy.record(waited),
            PolicyKind::Patient => stats.patient.record(waited),
            PolicyKind::Hard => stats.hard.record(waited),
        }
    }

    pub fn record_lazy_timeout(&self) {
        let mut stats = self.inner.lock();
        stats.lazy_timeouts = stats.lazy_timeouts.saturating_add(1);
    }

    pub fn record_patient_delay(&self) {
        let mut stats = self.inner.lock();
        stats.patient_delays = stats.patient_delays.saturating_add(1);
    }

    pub fn record_hard_timeout(&self) {
        let mut stats = self.inner.lock();
        stats.hard_timeouts = stats.hard_timeouts.saturating_add(1);
    }

    pub fn snapshot(&self) -> LockStatistics {
        *self.inner.lock()
    }

    pub fn reset(&self) {
        *self.inner.lock() = LockStatistics::default();
    }
}
