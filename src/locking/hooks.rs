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

//! Observer registries for lock timeout and delay diagnostics.
//!
//! Lockers never log contention themselves beyond `debug!` tracing; they hand
//! a [`LockEvent`] to their [`NotificationHooks`] and whoever composes the
//! application decides what to do with it. Delivery is synchronous, on the
//! waiting thread, in registration order.

use crate::locking::locker::LockerId;
use crate::locking::policy::PolicyKind;
use crate::locking::timeout::format_wait;
use crate::locking::tracer::ContextSnapshot;
use log::warn;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockEventKind {
    /// A lazy or hard acquisition ran out of time.
    TimedOut,
    /// A patient acquisition finished one slice without getting the lock.
    Delayed,
}

impl fmt::Display for LockEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockEventKind::TimedOut => f.write_str("timed out"),
            LockEventKind::Delayed => f.write_str("delayed"),
        }
    }
}

/// Immutable diagnostic delivered to observers.
#[derive(Debug, Clone, Serialize)]
pub struct LockEvent {
    locker_id: LockerId,
    locker_name: String,
    kind: LockEventKind,
    policy: PolicyKind,
    waited: Duration,
    requester: ContextSnapshot,
    holder: Option<ContextSnapshot>,
    message: String,
}

impl LockEvent {
    pub(crate) fn new(
        locker_id: LockerId,
        locker_name: &str,
        kind: LockEventKind,
        policy: PolicyKind,
        waited: Duration,
        requester: ContextSnapshot,
        holder: Option<ContextSnapshot>,
    ) -> Self {
        let verb = match kind {
            LockEventKind::TimedOut => "timed out after",
            LockEventKind::Delayed => "still waiting after",
        };
        let holder_text = holder
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<no recorded holder>".to_string());
        let message = format!(
            "Lock '{locker_name}' ({locker_id}) {verb} {} under {policy} policy\n\
             requested by: {requester}\n\
             held by: {holder_text}",
            format_wait(waited)
        );

        Self {
            locker_id,
            locker_name: locker_name.to_string(),
            kind,
            policy,
            waited,
            requester,
            holder,
            message,
        }
    }

    pub fn locker_id(&self) -> LockerId {
        self.locker_id
    }

    pub fn locker_name(&self) -> &str {
        &self.locker_name
    }

    pub fn kind(&self) -> LockEventKind {
        self.kind
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn requester(&self) -> &ContextSnapshot {
        &self.requester
    }

    pub fn holder(&self) -> Option<&ContextSnapshot> {
        self.holder.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for LockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Receives lock diagnostics. Both methods default to doing nothing so observers
/// only implement what they care about.
pub trait LockEventObserver: Send + Sync {
    fn on_timed_out(&self, _event: &LockEvent) {}

    fn on_delayed(&self, _event: &LockEvent) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockEventObserver;

impl LockEventObserver for NoopLockEventObserver {}

/// Forwards every event to the `log` facade at warn level.
#[derive(Debug, Default)]
pub struct LogObserver;

impl LockEventObserver for LogObserver {
    fn on_timed_out(&self, event: &LockEvent) {
        warn!("{}", event.message());
    }

    fn on_delayed(&self, event: &LockEvent) {
        warn!("{}", event.message());
    }
}

type ObserverList = RwLock<Vec<Arc<dyn LockEventObserver>>>;

/// The two observer registries ("lock timed out" and "lock delayed").
#[derive(Default)]
pub struct NotificationHooks {
    timed_out: ObserverList,
    delayed: ObserverList,
}

impl NotificationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by lockers that were not given one explicitly.
    pub fn global() -> Arc<NotificationHooks> {
        static GLOBAL: OnceLock<Arc<NotificationHooks>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(NotificationHooks::new()))
            .clone()
    }

    pub fn subscribe_timed_out(&self, observer: Arc<dyn LockEventObserver>) {
        self.timed_out.write().push(observer);
    }

    pub fn subscribe_delayed(&self, observer: Arc<dyn LockEventObserver>) {
        self.delayed.write().push(observer);
    }

    /// Registers one observer with both registries.
    pub fn subscribe_all(&self, observer: Arc<dyn LockEventObserver>) {
        self.subscribe_timed_out(observer.clone());
        self.subscribe_delayed(observer);
    }

    /// Removes every subscriber from both registries.
    pub fn clear(&self) {
        self.timed_out.write().clear();
        self.delayed.write().clear();
    }

    pub fn subscriber_count(&self, kind: LockEventKind) -> usize {
        self.registry(kind).read().len()
    }

    pub fn emit(&self, event: &LockEvent) {
        // Snapshot the list so observers may subscribe or clear without deadlocking.
        let observers: Vec<_> = self.registry(event.kind()).read().clone();
        for observer in observers {
            match event.kind() {
                LockEventKind::TimedOut => observer.on_timed_out(event),
                LockEventKind::Delayed => observer.on_delayed(event),
            }
        }
    }

    fn registry(&self, kind: LockEventKind) -> &ObserverList {
        match kind {
            LockEventKind::TimedOut => &self.timed_out,
            LockEventKind::Delayed => &self.delayed,
        }
    }
}

impl fmt::Debug for NotificationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHooks")
            .field("timed_out", &self.subscriber_count(LockEventKind::TimedOut))
            .field("delayed", &self.subscriber_count(LockEventKind::Delayed))
            .finish()
    }
}
