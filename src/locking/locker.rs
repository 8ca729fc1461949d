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

//! The lock engine.
//!
//! A [`Locker`] wraps one reentrant, thread-affine mutex and offers three
//! acquisition policies on top of its bounded `try_lock_for`:
//!
//! - **lazy**: wait up to a timeout, then run the action anyway without the lock;
//! - **patient**: wait forever in slices, emitting a "delayed" event per slice,
//!   optionally abandoning the wait when a [`CancellationToken`] fires;
//! - **hard**: wait up to a deadline, then fail with [`LockError::HardTimeout`].
//!
//! Successful acquisitions record the holder (thread, context snapshot, start
//! time) and update per-policy wait statistics. The mutex is reentrant: a thread
//! that already holds a locker re-enters immediately under any policy, and the
//! holder fields describe the outermost acquisition.

use crate::config::LocksmithConfig;
use crate::error::{LockError, Result};
use crate::locking::cancellation::CancellationToken;
use crate::locking::handle::LockHandle;
use crate::locking::hooks::{LockEvent, LockEventKind, NotificationHooks};
use crate::locking::policy::{LockPolicy, PolicyKind};
use crate::locking::statistics::{LockStatistics, StatisticsRecorder};
use crate::locking::tracer::{ContextSnapshot, Tracer, current_thread_label};
use chrono::{DateTime, Local};
use log::{debug, info};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Default timeout, warning slice and deadline for lockers that were not configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-attempt budget of [`Locker::hard_retrying`] for lockers that were not configured.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_millis(100);

/// Stored warning slice meaning "follow the default timeout".
const WARN_EVERY_UNSET: u64 = 0;

/// Upper bound on how long a cancellable patient wait goes without checking its token.
const CANCELLATION_POLL: Duration = Duration::from_millis(50);

/// Smallest patient slice; a zero slice would only spin and flood observers.
const MIN_PATIENT_SLICE: Duration = Duration::from_millis(1);

static NEXT_LOCKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique locker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LockerId(u64);

impl LockerId {
    pub(crate) fn next() -> Self {
        LockerId(NEXT_LOCKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who holds a locker right now.
#[derive(Debug, Clone, Serialize)]
pub struct HolderInfo {
    #[serde(skip)]
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub snapshot: ContextSnapshot,
    pub held_since: DateTime<Local>,
}

#[derive(Debug, Default)]
struct HolderState {
    owner: Option<ThreadId>,
    depth: usize,
    info: Option<HolderInfo>,
}

pub struct Locker {
    id: LockerId,
    name: String,
    mutex: ReentrantMutex<()>,
    default_timeout_nanos: AtomicU64,
    warn_every_nanos: AtomicU64,
    retry_after_nanos: AtomicU64,
    holder: Mutex<HolderState>,
    recorder: StatisticsRecorder,
    tracer: Arc<Tracer>,
    hooks: Arc<NotificationHooks>,
}

impl Locker {
    /// Creates a locker using the process-wide tracer and notification hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LockerId::next(),
            name: name.into(),
            mutex: ReentrantMutex::new(()),
            default_timeout_nanos: AtomicU64::new(duration_to_nanos(DEFAULT_TIMEOUT)),
            warn_every_nanos: AtomicU64::new(WARN_EVERY_UNSET),
            retry_after_nanos: AtomicU64::new(duration_to_nanos(DEFAULT_RETRY_AFTER)),
            holder: Mutex::new(HolderState::default()),
            recorder: StatisticsRecorder::new(),
            tracer: Tracer::global(),
            hooks: NotificationHooks::global(),
        }
    }

    /// Creates a locker whose default timeout, patient warning slice and retry
    /// budget come from the `[locker]` configuration section.
    pub fn from_config(name: impl Into<String>, config: &LocksmithConfig) -> Self {
        let locker = Self::new(name)
            .with_default_timeout(config.locker.default_timeout())
            .with_retry_after(config.locker.retry_after());
        match config.locker.warn_every_ms {
            Some(ms) => locker.with_warn_every(Duration::from_millis(ms)),
            None => locker,
        }
    }

    pub fn with_default_timeout(self, timeout: Duration) -> Self {
        self.set_default_timeout(timeout);
        self
    }

    pub fn with_warn_every(self, warn_every: Duration) -> Self {
        self.set_warn_every(warn_every);
        self
    }

    pub fn with_retry_after(self, retry_after: Duration) -> Self {
        self.set_retry_after(retry_after);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<NotificationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn id(&self) -> LockerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn hooks(&self) -> &Arc<NotificationHooks> {
        &self.hooks
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_nanos(self.default_timeout_nanos.load(Ordering::Relaxed))
    }

    /// Changes the budget used by calls that do not pass one. Safe while the lock is in use.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.default_timeout_nanos
            .store(duration_to_nanos(timeout), Ordering::Relaxed);
    }

    /// Warning slice of [`Locker::patient`]; the default timeout unless set explicitly.
    pub fn warn_every(&self) -> Duration {
        match self.warn_every_nanos.load(Ordering::Relaxed) {
            WARN_EVERY_UNSET => self.default_timeout(),
            nanos => Duration::from_nanos(nanos),
        }
    }

    /// Slices shorter than a millisecond are raised to one.
    pub fn set_warn_every(&self, warn_every: Duration) {
        self.warn_every_nanos.store(
            duration_to_nanos(warn_every.max(MIN_PATIENT_SLICE)),
            Ordering::Relaxed,
        );
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_nanos(self.retry_after_nanos.load(Ordering::Relaxed))
    }

    pub fn set_retry_after(&self, retry_after: Duration) {
        self.retry_after_nanos
            .store(duration_to_nanos(retry_after), Ordering::Relaxed);
    }

    pub fn statistics(&self) -> LockStatistics {
        self.recorder.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.recorder.reset();
    }

    pub fn holder(&self) -> Option<HolderInfo> {
        self.holder.lock().info.clone()
    }

    pub fn is_held(&self) -> bool {
        self.holder.lock().owner.is_some()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.holder.lock().owner == Some(thread::current().id())
    }

    // ---- lazy ----------------------------------------------------------------

    /// Runs `action`, holding the lock if it can be taken within the default timeout.
    #[track_caller]
    pub fn lazy<T>(&self, action: impl FnOnce() -> T) -> T {
        self.lazy_with_timeout(self.default_timeout(), action)
    }

    /// Runs `action`, holding the lock if it can be taken within `timeout`. On timeout
    /// the action still runs, unsynchronized.
    #[track_caller]
    pub fn lazy_with_timeout<T>(&self, timeout: Duration, action: impl FnOnce() -> T) -> T {
        let handle = self.enter_lazy(timeout, Location::caller());
        let value = action();
        handle.release();
        value
    }

    #[track_caller]
    pub fn acquire_lazy(&self, timeout: Duration) -> LockHandle<'_> {
        self.enter_lazy(timeout, Location::caller())
    }

    // ---- patient -------------------------------------------------------------

    /// Runs `action` once the lock is taken, however long that takes, warning after
    /// every [`Locker::warn_every`] slice.
    #[track_caller]
    pub fn patient<T>(&self, action: impl FnOnce() -> T) -> T {
        self.patient_with_warning(self.warn_every(), action)
    }

    #[track_caller]
    pub fn patient_with_warning<T>(&self, warn_every: Duration, action: impl FnOnce() -> T) -> T {
        let Ok(handle) = self.enter_patient(warn_every, None, Location::caller()) else {
            unreachable!("a patient wait without a cancellation token cannot fail");
        };
        let value = action();
        handle.release();
        value
    }

    /// Like [`Locker::patient_with_warning`], but gives up with
    /// [`LockError::Cancelled`] when `cancellation` fires. The action never runs in
    /// that case and the lock is never taken.
    #[track_caller]
    pub fn patient_cancellable<T>(
        &self,
        warn_every: Duration,
        cancellation: &CancellationToken,
        action: impl FnOnce() -> T,
    ) -> Result<T> {
        let handle = self.enter_patient(warn_every, Some(cancellation), Location::caller())?;
        let value = action();
        handle.release();
        Ok(value)
    }

    #[track_caller]
    pub fn acquire_patient(
        &self,
        warn_every: Duration,
        cancellation: Option<&CancellationToken>,
    ) -> Result<LockHandle<'_>> {
        self.enter_patient(warn_every, cancellation, Location::caller())
    }

    // ---- hard ----------------------------------------------------------------

    #[track_caller]
    pub fn hard<T>(&self, action: impl FnOnce() -> T) -> Result<T> {
        self.hard_with_timeout(self.default_timeout(), action)
    }

    /// Runs `action` under the lock, or fails with [`LockError::HardTimeout`] without
    /// running it when the lock is not free within `die_after`.
    #[track_caller]
    pub fn hard_with_timeout<T>(&self, die_after: Duration, action: impl FnOnce() -> T) -> Result<T> {
        let handle = self.enter_hard(die_after, Location::caller())?;
        let value = action();
        handle.release();
        Ok(value)
    }

    #[track_caller]
    pub fn acquire_hard(&self, die_after: Duration) -> Result<LockHandle<'_>> {
        self.enter_hard(die_after, Location::caller())
    }

    /// Repeats a hard acquisition with `retry_after` until the action completes.
    ///
    /// A hard timeout, whether of this locker or of a hard lock taken inside
    /// `action` (also when wrapped in [`LockError::Aggregate`]), releases this lock
    /// and starts over. Any other error is returned unchanged. Nesting several
    /// hard locks inside one retrying lock lets a failed inner acquisition back off
    /// without leaving outer locks held.
    #[track_caller]
    pub fn hard_with_retries<T, F>(&self, retry_after: Duration, action: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.retry_hard(retry_after, None, action, Location::caller())
    }

    /// [`Locker::hard_with_retries`] using this locker's [`Locker::retry_after`].
    #[track_caller]
    pub fn hard_retrying<T, F>(&self, action: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.retry_hard(self.retry_after(), None, action, Location::caller())
    }

    /// [`Locker::hard_with_retries`] bounded to `max_attempts` attempts; the last
    /// hard timeout is returned when they are exhausted.
    #[track_caller]
    pub fn hard_with_retries_limited<T, F>(
        &self,
        retry_after: Duration,
        max_attempts: usize,
        action: F,
    ) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.retry_hard(retry_after, Some(max_attempts.max(1)), action, Location::caller())
    }

    // ---- dispatch ------------------------------------------------------------

    #[track_caller]
    pub fn acquire(&self, policy: &LockPolicy) -> Result<LockHandle<'_>> {
        self.enter(policy, Location::caller())
    }

    /// Runs `action` under `policy`. Lazy never fails; patient fails only when
    /// cancelled; hard fails on timeout.
    #[track_caller]
    pub fn run<T>(&self, policy: &LockPolicy, action: impl FnOnce() -> T) -> Result<T> {
        let handle = self.enter(policy, Location::caller())?;
        let value = action();
        handle.release();
        Ok(value)
    }

    pub(crate) fn enter(
        &self,
        policy: &LockPolicy,
        location: &'static Location<'static>,
    ) -> Result<LockHandle<'_>> {
        match policy {
            LockPolicy::Lazy { .. } => {
                let budget = policy.budget().unwrap_or_else(|| self.default_timeout());
                Ok(self.enter_lazy(budget, location))
            }
            LockPolicy::Patient { cancellation, .. } => {
                let warn_every = policy.budget().unwrap_or_else(|| self.warn_every());
                self.enter_patient(warn_every, cancellation.as_ref(), location)
            }
            LockPolicy::Hard { .. } => {
                let budget = policy.budget().unwrap_or_else(|| self.default_timeout());
                self.enter_hard(budget, location)
            }
        }
    }

    fn enter_lazy(&self, timeout: Duration, location: &'static Location<'static>) -> LockHandle<'_> {
        let started = Instant::now();
        match self.mutex.try_lock_for(timeout) {
            Some(guard) => self.entered(guard, PolicyKind::Lazy, started.elapsed(), location),
            None => {
                let waited = started.elapsed();
                self.emit(LockEventKind::TimedOut, PolicyKind::Lazy, waited, location);
                self.recorder.record_lazy_timeout();
                debug!(
                    "Lazy lock {self} timed out after {:.3}s; running unsynchronized",
                    waited.as_secs_f64()
                );
                LockHandle::unsynchronized(self, PolicyKind::Lazy, waited)
            }
        }
    }

    fn enter_patient(
        &self,
        warn_every: Duration,
        cancellation: Option<&CancellationToken>,
        location: &'static Location<'static>,
    ) -> Result<LockHandle<'_>> {
        let warn_every = warn_every.max(MIN_PATIENT_SLICE);
        let started = Instant::now();

        loop {
            let slice_started = Instant::now();
            loop {
                if let Some(token) = cancellation
                    && token.is_cancelled()
                {
                    let waited = started.elapsed();
                    info!(
                        "Cancelled patient wait for {self} after {:.3}s",
                        waited.as_secs_f64()
                    );
                    return Err(LockError::Cancelled {
                        locker: self.to_string(),
                        waited,
                    });
                }

                let remaining = warn_every.saturating_sub(slice_started.elapsed());
                if remaining.is_zero() {
                    break;
                }
                let attempt = match cancellation {
                    Some(_) => remaining.min(CANCELLATION_POLL),
                    None => remaining,
                };
                if let Some(guard) = self.mutex.try_lock_for(attempt) {
                    return Ok(self.entered(guard, PolicyKind::Patient, started.elapsed(), location));
                }
            }

            let waited = started.elapsed();
            self.recorder.record_patient_delay();
            self.emit(LockEventKind::Delayed, PolicyKind::Patient, waited, location);
            debug!(
                "Patient lock {self} still waiting after {:.3}s",
                waited.as_secs_f64()
            );
        }
    }

    fn enter_hard(
        &self,
        die_after: Duration,
        location: &'static Location<'static>,
    ) -> Result<LockHandle<'_>> {
        let started = Instant::now();
        match self.mutex.try_lock_for(die_after) {
            Some(guard) => Ok(self.entered(guard, PolicyKind::Hard, started.elapsed(), location)),
            None => {
                let waited = started.elapsed();
                self.recorder.record_hard_timeout();
                let event = self.emit(LockEventKind::TimedOut, PolicyKind::Hard, waited, location);
                debug!(
                    "Hard lock {self} timed out after {:.3}s",
                    waited.as_secs_f64()
                );
                Err(LockError::HardTimeout {
                    locker: self.to_string(),
                    waited,
                    message: event.message().to_string(),
                })
            }
        }
    }

    fn retry_hard<T, F>(
        &self,
        retry_after: Duration,
        max_attempts: Option<usize>,
        mut action: F,
        location: &'static Location<'static>,
    ) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0_usize;
        loop {
            attempt += 1;
            let outcome = self.enter_hard(retry_after, location).and_then(|handle| {
                let result = action();
                handle.release();
                result
            });

            match outcome {
                Err(err) if err.is_hard_timeout() => {
                    if max_attempts.is_some_and(|max| attempt >= max) {
                        return Err(err);
                    }
                    debug!("Hard lock {self} hit a timeout on attempt {attempt}; retrying");
                    thread::yield_now();
                }
                other => return other,
            }
        }
    }

    fn entered<'a>(
        &'a self,
        guard: ReentrantMutexGuard<'a, ()>,
        policy: PolicyKind,
        waited: Duration,
        location: &'static Location<'static>,
    ) -> LockHandle<'a> {
        self.recorder.record_acquired(policy, waited);
        self.note_acquired(location);
        debug!(
            "Acquired {policy} lock {self} after {:.3}s",
            waited.as_secs_f64()
        );
        LockHandle::held(self, policy, guard, waited)
    }

    /// Records the holder. Only the thread owning the primitive writes holder state,
    /// so the snapshot can be captured outside the holder mutex.
    fn note_acquired(&self, location: &'static Location<'static>) {
        let me = thread::current().id();
        {
            let mut state = self.holder.lock();
            if state.owner == Some(me) {
                state.depth += 1;
                return;
            }
        }

        let info = HolderInfo {
            thread_id: me,
            thread_name: current_thread_label(),
            snapshot: self.tracer.capture(location),
            held_since: Local::now(),
        };
        let mut state = self.holder.lock();
        state.owner = Some(me);
        state.depth = 1;
        state.info = Some(info);
    }

    pub(crate) fn note_released(&self) {
        let mut state = self.holder.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            state.info = None;
        }
    }

    fn emit(
        &self,
        kind: LockEventKind,
        policy: PolicyKind,
        waited: Duration,
        location: &'static Location<'static>,
    ) -> LockEvent {
        let holder = self.holder().map(|info| info.snapshot);
        let event = LockEvent::new(
            self.id,
            &self.name,
            kind,
            policy,
            waited,
            self.tracer.capture(location),
            holder,
        );
        self.hooks.emit(&event);
        event
    }
}

impl fmt::Display for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.id)
    }
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("default_timeout", &self.default_timeout())
            .field("warn_every", &self.warn_every())
            .field("retry_after", &self.retry_after())
            .field("held", &self.is_held())
            .finish()
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
