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

/// Shared fixtures for contention scenarios
use locksmith::locking::{LockEvent, LockEventKind, LockEventObserver, Locker, NotificationHooks};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

/// Creates a locker with its own hook registry so tests never see each other's events.
#[allow(dead_code)]
pub fn isolated_locker(name: &str) -> (Locker, Arc<RecordingObserver>) {
    let hooks = Arc::new(NotificationHooks::new());
    let recorder = Arc::new(RecordingObserver::default());
    hooks.subscribe_all(recorder.clone());
    (Locker::new(name).with_hooks(hooks), recorder)
}

/// Holds `locker` on a thread named `thread_name` for `hold`.
///
/// Returns once the holder is inside the lock, so callers can contend immediately.
#[allow(dead_code)]
pub fn hold_for<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    locker: &'env Locker,
    thread_name: &str,
    hold: Duration,
) -> ScopedJoinHandle<'scope, ()> {
    let (entered_tx, entered_rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name(thread_name.to_string())
        .spawn_scoped(scope, move || {
            locker.patient(|| {
                entered_tx.send(()).unwrap();
                thread::sleep(hold);
            });
        })
        .unwrap();
    entered_rx.recv().unwrap();
    handle
}

/// Collects every delivered event.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<LockEvent>>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: LockEventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }
}

impl LockEventObserver for RecordingObserver {
    fn on_timed_out(&self, event: &LockEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_delayed(&self, event: &LockEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
