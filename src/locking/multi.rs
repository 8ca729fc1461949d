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

//! Acquire-all/release-all over several independent lockers.
//!
//! Primitives cannot move between threads, so a [`MultiLocker`] starts one
//! scoped worker per member. Each worker takes its own locker under the caller's
//! policy, reports in, and parks until the coordinator has run the caller's code.
//! Members are taken in no particular order; two composed calls over overlapping
//! sets can deadlock under patient or lazy policies. Use hard policies (or
//! [`MultiLocker::hard_with_retries`]) when sets may overlap.
//!
//! A thread that already holds one of the members must not compose over it: the
//! worker for that member runs on another thread and cannot re-enter.

use crate::error::{LockError, Result};
use crate::locking::locker::{DEFAULT_RETRY_AFTER, Locker};
use crate::locking::policy::LockPolicy;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Shared coordination state. Counters are atomics; the mutex exists only so the
/// condition variables have something to park on.
#[derive(Default)]
struct Rendezvous {
    acquired: AtomicUsize,
    failed: AtomicUsize,
    released: AtomicBool,
    parking: Mutex<()>,
    acquired_signal: Condvar,
    release_signal: Condvar,
}

impl Rendezvous {
    fn arrive(&self) {
        self.acquired.fetch_add(1, Ordering::AcqRel);
        let _parked = self.parking.lock();
        self.acquired_signal.notify_all();
    }

    fn fail(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        let _parked = self.parking.lock();
        self.acquired_signal.notify_all();
    }

    /// Blocks until every worker holds its locker (`true`) or one gave up (`false`).
    fn wait_for_all(&self, expected: usize) -> bool {
        let mut parked = self.parking.lock();
        loop {
            if self.failed.load(Ordering::Acquire) > 0 {
                return false;
            }
            if self.acquired.load(Ordering::Acquire) >= expected {
                return true;
            }
            self.acquired_signal.wait(&mut parked);
        }
    }

    fn wait_for_release(&self) {
        let mut parked = self.parking.lock();
        while !self.released.load(Ordering::Acquire) {
            self.release_signal.wait(&mut parked);
        }
    }

    fn release_all(&self) {
        self.released.store(true, Ordering::Release);
        let _parked = self.parking.lock();
        self.release_signal.notify_all();
    }
}

/// Broadcasts release when dropped, so workers are let go on every exit path,
/// including a panic in the caller's code.
struct ReleaseOnDrop<'r>(&'r Rendezvous);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release_all();
    }
}

/// Reports a worker that exits without having arrived (error or panic).
struct Arrival<'r> {
    rendezvous: &'r Rendezvous,
    arrived: bool,
}

impl Arrival<'_> {
    fn arrive(&mut self) {
        self.arrived = true;
        self.rendezvous.arrive();
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if !self.arrived {
            self.rendezvous.fail();
        }
    }
}

/// A fixed, de-duplicated set of lockers acquired together.
#[derive(Debug, Clone)]
pub struct MultiLocker<'a> {
    lockers: Vec<&'a Locker>,
}

impl<'a> MultiLocker<'a> {
    /// Keeps the first occurrence of each locker, in the given order.
    pub fn new(lockers: &[&'a Locker]) -> Self {
        let mut unique: Vec<&'a Locker> = Vec::with_capacity(lockers.len());
        for &locker in lockers {
            if !unique.iter().any(|known| known.id() == locker.id()) {
                unique.push(locker);
            }
        }
        Self { lockers: unique }
    }

    pub fn len(&self) -> usize {
        self.lockers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lockers.is_empty()
    }

    pub fn lockers(&self) -> &[&'a Locker] {
        &self.lockers
    }

    /// Runs `action` once every member is held, or has lazily timed out.
    #[track_caller]
    pub fn lazy<T>(&self, action: impl FnOnce() -> T) -> Result<T> {
        self.coordinate(&LockPolicy::lazy(), Location::caller(), action)
    }

    #[track_caller]
    pub fn patient<T>(&self, action: impl FnOnce() -> T) -> Result<T> {
        self.coordinate(&LockPolicy::patient(), Location::caller(), action)
    }

    #[track_caller]
    pub fn hard<T>(&self, action: impl FnOnce() -> T) -> Result<T> {
        self.coordinate(&LockPolicy::hard(), Location::caller(), action)
    }

    /// Runs `action` once all members are acquired under `policy`.
    ///
    /// When any member cannot be acquired the action is not run and the failures
    /// come back as [`LockError::Aggregate`], even when only one worker failed.
    #[track_caller]
    pub fn run<T>(&self, policy: &LockPolicy, action: impl FnOnce() -> T) -> Result<T> {
        self.coordinate(policy, Location::caller(), action)
    }

    /// Hard-acquires every member with `retry_after`, starting over from scratch
    /// whenever a member (or a hard lock inside `action`) times out.
    #[track_caller]
    pub fn hard_with_retries<T, F>(&self, retry_after: Duration, mut action: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let location = Location::caller();
        let policy = LockPolicy::hard().with_budget(retry_after);
        loop {
            match self.coordinate(&policy, location, &mut action).and_then(|result| result) {
                Err(err) if err.is_hard_timeout() => {
                    debug!(
                        "Composed hard lock over {} lockers timed out; retrying",
                        self.len()
                    );
                    thread::yield_now();
                }
                other => return other,
            }
        }
    }

    /// [`MultiLocker::hard_with_retries`] using the longest
    /// [`Locker::retry_after`] among the members.
    #[track_caller]
    pub fn hard_retrying<T, F>(&self, action: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let retry_after = self
            .lockers
            .iter()
            .map(|locker| locker.retry_after())
            .max()
            .unwrap_or(DEFAULT_RETRY_AFTER);
        self.hard_with_retries(retry_after, action)
    }

    fn coordinate<T>(
        &self,
        policy: &LockPolicy,
        location: &'static Location<'static>,
        action: impl FnOnce() -> T,
    ) -> Result<T> {
        if self.lockers.is_empty() {
            return Ok(action());
        }

        let rendezvous = Rendezvous::default();
        thread::scope(|scope| {
            let release = ReleaseOnDrop(&rendezvous);

            let mut workers = Vec::with_capacity(self.lockers.len());
            for &locker in &self.lockers {
                let rendezvous = &rendezvous;
                let worker = thread::Builder::new()
                    .name(format!("locksmith-{}", locker.name()))
                    .spawn_scoped(scope, move || {
                        let mut arrival = Arrival {
                            rendezvous,
                            arrived: false,
                        };
                        let handle = locker.enter(policy, location)?;
                        arrival.arrive();
                        rendezvous.wait_for_release();
                        handle.release();
                        Ok::<(), LockError>(())
                    });
                match worker {
                    Ok(worker) => workers.push((locker, worker)),
                    Err(err) => {
                        rendezvous.fail();
                        drop(release);
                        // Already spawned workers are joined by the scope.
                        return Err(LockError::Io(err));
                    }
                }
            }

            let value = rendezvous
                .wait_for_all(workers.len())
                .then(|| {
                    debug!(
                        "All {} lockers acquired; running composed action",
                        workers.len()
                    );
                    action()
                });
            drop(release);

            let failures: Vec<LockError> = workers
                .into_iter()
                .filter_map(|(locker, worker)| match worker.join() {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(_) => Some(LockError::WorkerPanicked {
                        locker: locker.to_string(),
                    }),
                })
                .collect();

            match value {
                Some(value) if failures.is_empty() => Ok(value),
                _ => Err(LockError::Aggregate(failures)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::hooks::NotificationHooks;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn isolated(name: &str) -> Locker {
        Locker::new(name).with_hooks(Arc::new(NotificationHooks::new()))
    }

    #[test]
    fn deduplicates_members() {
        let a = isolated("a");
        let b = isolated("b");
        let multi = MultiLocker::new(&[&a, &b, &a]);
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.lockers()[0].id(), a.id());
    }

    #[test]
    fn empty_set_runs_action_directly() {
        let multi = MultiLocker::new(&[]);
        assert!(multi.is_empty());
        assert_eq!(multi.hard(|| 7).unwrap(), 7);
    }

    #[test]
    fn members_are_held_by_workers_during_action() {
        let a = isolated("left");
        let b = isolated("right");
        let runs = AtomicUsize::new(0);

        MultiLocker::new(&[&a, &b])
            .hard(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                for locker in [&a, &b] {
                    let holder = locker.holder().unwrap();
                    assert_ne!(holder.thread_id, thread::current().id());
                    assert!(holder.thread_name.starts_with("locksmith-"));
                }
            })
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!a.is_held());
        assert!(!b.is_held());
    }

    #[test]
    fn panicking_action_still_releases_members() {
        let a = isolated("panicky");
        let multi = MultiLocker::new(&[&a]);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            multi.hard::<()>(|| panic!("boom")).ok();
        }));
        assert!(outcome.is_err());
        assert!(!a.is_held());
        assert!(a.hard_with_timeout(Duration::from_millis(50), || ()).is_ok());
    }
}
