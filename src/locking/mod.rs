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

pub mod cancellation;
pub mod handle;
pub mod hooks;
pub mod locker;
pub mod multi;
pub mod policy;
pub mod statistics;
pub mod timeout;
pub mod tracer;

pub use cancellation::{CancellationToken, global_token};
pub use handle::LockHandle;
pub use hooks::{
    LockEvent, LockEventKind, LockEventObserver, LogObserver, NoopLockEventObserver,
    NotificationHooks,
};
pub use locker::{DEFAULT_RETRY_AFTER, DEFAULT_TIMEOUT, HolderInfo, Locker, LockerId};
pub use multi::MultiLocker;
pub use policy::{LockPolicy, PolicyKind};
pub use statistics::{LockStatistics, PolicyStatistics, StatisticsRecorder};
pub use timeout::{
    LockTimeoutResolution, LockTimeoutResolver, LockTimeoutSource, LockTimeoutValue,
    parse_timeout_override,
};
pub use tracer::{ContextSnapshot, DEFAULT_IGNORED_PREFIXES, Tracer};
