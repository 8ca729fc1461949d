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

//! Execution-context snapshots identifying lock holders and waiters.
//!
//! Every snapshot records the thread name and the source location of the
//! public locker call (via `#[track_caller]`). When frame capture is enabled
//! the resolved call stack is attached as well, with the engine's own frames
//! dropped from the top and runtime frames matching the ignored prefixes
//! dropped from the bottom.

use crate::config::TracerConfig;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

/// Frames whose names start with one of these belong to the capture machinery or the
/// engine and are stripped from the top of every stack.
const ENGINE_FRAME_PREFIXES: &[&str] = &["backtrace::", "locksmith::locking::"];

/// Runtime frames trimmed from the bottom of captured stacks unless configured otherwise.
pub const DEFAULT_IGNORED_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "test::",
    "__rust",
    "__libc_start",
    "_start",
    "start_thread",
    "clone",
];

/// Filtered execution context captured when a lock is requested or entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    thread: String,
    location: String,
    frames: Vec<String>,
}

impl ContextSnapshot {
    pub fn thread(&self) -> &str {
        &self.thread
    }

    /// `file:line:column` of the locker call that produced this snapshot.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] at {}", self.thread, self.location)?;
        for frame in &self.frames {
            write!(f, "\n    in {frame}")?;
        }
        Ok(())
    }
}

/// Captures context snapshots. One tracer is usually shared by every locker of an
/// application so the ignored-prefix list is configured in one place.
#[derive(Debug)]
pub struct Tracer {
    ignored_prefixes: RwLock<Vec<String>>,
    capture_frames: AtomicBool,
}

impl Tracer {
    pub fn new() -> Self {
        Self {
            ignored_prefixes: RwLock::new(
                DEFAULT_IGNORED_PREFIXES
                    .iter()
                    .map(|prefix| prefix.to_string())
                    .collect(),
            ),
            capture_frames: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &TracerConfig) -> Self {
        Self {
            ignored_prefixes: RwLock::new(config.ignored_prefixes.clone()),
            capture_frames: AtomicBool::new(config.capture_frames),
        }
    }

    /// Process-wide tracer used by lockers that were not given one explicitly.
    pub fn global() -> Arc<Tracer> {
        static GLOBAL: OnceLock<Arc<Tracer>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Tracer::new())).clone()
    }

    pub fn ignored_prefixes(&self) -> Vec<String> {
        self.ignored_prefixes.read().clone()
    }

    pub fn set_ignored_prefixes<I, S>(&self, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.ignored_prefixes.write() = prefixes.into_iter().map(Into::into).collect();
    }

    pub fn add_ignored_prefix(&self, prefix: impl Into<String>) {
        self.ignored_prefixes.write().push(prefix.into());
    }

    pub fn captures_frames(&self) -> bool {
        self.capture_frames.load(Ordering::Relaxed)
    }

    /// Enables or disables stack capture. Symbol resolution costs far more than the
    /// lock itself, so it is off unless diagnostics are wanted.
    pub fn set_capture_frames(&self, enabled: bool) {
        self.capture_frames.store(enabled, Ordering::Relaxed);
    }

    pub fn capture(&self, location: &'static Location<'static>) -> ContextSnapshot {
        let frames = if self.captures_frames() {
            self.filter_frames(resolve_frames())
        } else {
            Vec::new()
        };

        ContextSnapshot {
            thread: current_thread_label(),
            location: location.to_string(),
            frames,
        }
    }

    /// Drops leading engine frames and trailing frames matching an ignored prefix.
    pub(crate) fn filter_frames(&self, mut frames: Vec<String>) -> Vec<String> {
        let engine_frames = frames
            .iter()
            .take_while(|name| is_engine_frame(name))
            .count();
        frames.drain(..engine_frames);

        let ignored = self.ignored_prefixes.read();
        while frames
            .last()
            .is_some_and(|name| matches_any(name, ignored.as_slice()))
        {
            frames.pop();
        }
        frames
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine frames, plus the unwinder's own C symbols that precede them.
fn is_engine_frame(name: &str) -> bool {
    matches_any(name, ENGINE_FRAME_PREFIXES) || !name.contains("::")
}

fn matches_any<P: AsRef<str>>(name: &str, prefixes: &[P]) -> bool {
    let name = name.trim_start_matches('<');
    prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_ref()))
}

fn resolve_frames() -> Vec<String> {
    let mut names = Vec::new();
    backtrace::trace(|frame| {
        backtrace::resolve_frame(frame, |symbol| {
            if let Some(name) = symbol.name() {
                names.push(format!("{name:#}"));
            }
        });
        true
    });
    names
}

/// Name of the running thread, or its id when it was spawned without one.
pub fn current_thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", current.id()),
    }
}
