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

//! Cooperative cancellation for patient waits.
//!
//! A token is a shared flag. Patient acquisitions poll it between bounded
//! try-acquire attempts and unwind with [`LockError::Cancelled`] once it is
//! set. [`global_token`] ties a token to SIGINT/SIGTERM so an interactive
//! process can abandon a stuck wait with Ctrl-C.
//!
//! [`LockError::Cancelled`]: crate::error::LockError::Cancelled

use log::{debug, warn};
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

#[cfg(windows)]
use signal_hook::consts::signal::SIGBREAK;

/// Token observed by patient waits. Clones share the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wraps an existing flag, e.g. one already registered with a signal handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fires the token. Every wait sharing it unwinds at its next poll.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            debug!("Cancellation requested");
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SignalRegistry {
    flag: Arc<AtomicBool>,
    _handles: Vec<SigId>,
}

impl SignalRegistry {
    fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for signal in registered_signals() {
            match flag::register(*signal, flag.clone()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!("Failed to register cancellation handler for signal {signal}: {err}")
                }
            }
        }

        Self {
            flag,
            _handles: handles,
        }
    }

    fn token(&self) -> CancellationToken {
        CancellationToken::from_flag(self.flag.clone())
    }
}

fn registered_signals() -> &'static [i32] {
    #[cfg(windows)]
    {
        static SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGBREAK];
        &SIGNALS
    }

    #[cfg(not(windows))]
    {
        static SIGNALS: [i32; 2] = [SIGINT, SIGTERM];
        &SIGNALS
    }
}

static SIGNAL_REGISTRY: OnceLock<SignalRegistry> = OnceLock::new();

/// Returns a token that fires when the process receives an interrupt or terminate signal.
pub fn global_token() -> CancellationToken {
    SIGNAL_REGISTRY.get_or_init(SignalRegistry::new).token()
}
