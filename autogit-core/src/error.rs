// Copyright 2016 Google Inc. All rights reserved.
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

//! The error taxonomy shared across the pipeline.
//!
//! Every variant here corresponds to a named failure mode in the design:
//! `VcsFailure`, `PluginTimeout`/`PluginFault`, `ManifestInvalid`,
//! `ConfigCorrupt`/`StateCorrupt`, and `WatcherUnavailable`. None of these
//! are allowed to unwind across a pipeline tick; the pipeline module logs
//! and absorbs them at the phase boundaries where the design calls for it.

use std::fmt;
use std::io;

/// A failure from the external VCS subprocess.
#[derive(Debug)]
pub enum VcsError {
    /// The subprocess could not be spawned at all.
    Spawn(io::Error),
    /// The subprocess exited non-zero; carries its stderr/stdout.
    NonZero { op: String, message: String },
    /// The subprocess did not finish within its deadline.
    Timeout { op: String },
}

impl fmt::Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VcsError::Spawn(e) => write!(f, "failed to spawn git: {}", e),
            VcsError::NonZero { op, message } => write!(f, "git {} failed: {}", op, message),
            VcsError::Timeout { op } => write!(f, "git {} timed out", op),
        }
    }
}

impl std::error::Error for VcsError {}

/// A failure from a plugin hook call, always contained by the dispatcher.
#[derive(Debug)]
pub enum PluginError {
    /// The hook exceeded its deadline.
    Timeout,
    /// The hook panicked or otherwise failed.
    Fault(String),
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PluginError::Timeout => write!(f, "plugin call timed out"),
            PluginError::Fault(msg) => write!(f, "plugin call failed: {}", msg),
        }
    }
}

impl std::error::Error for PluginError {}

/// A manifest that could not be loaded or was missing required fields.
#[derive(Debug)]
pub struct ManifestError {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "manifest {} invalid: {}", self.path, self.reason)
    }
}

impl std::error::Error for ManifestError {}

/// The persisted configuration document was unreadable or unparseable.
#[derive(Debug)]
pub struct ConfigError {
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "config corrupt: {}", self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// The persisted circuit-state document was unreadable or unparseable.
#[derive(Debug)]
pub struct StateError {
    pub reason: String,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "state corrupt: {}", self.reason)
    }
}

impl std::error::Error for StateError {}

/// The OS-event watcher backend failed to initialize.
#[derive(Debug)]
pub struct WatcherError {
    pub reason: String,
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "watcher unavailable: {}", self.reason)
    }
}

impl std::error::Error for WatcherError {}

/// Top-level error a pipeline tick's fallible phases may return via `?`.
///
/// This is an internal control-flow type: the pipeline always catches it
/// at the phase boundary, logs it, and ends the tick rather than letting
/// it propagate to the run loop.
#[derive(Debug)]
pub enum CoreError {
    Vcs(VcsError),
    Plugin(PluginError),
    Manifest(ManifestError),
    Config(ConfigError),
    State(StateError),
    Watcher(WatcherError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CoreError::Vcs(e) => write!(f, "{}", e),
            CoreError::Plugin(e) => write!(f, "{}", e),
            CoreError::Manifest(e) => write!(f, "{}", e),
            CoreError::Config(e) => write!(f, "{}", e),
            CoreError::State(e) => write!(f, "{}", e),
            CoreError::Watcher(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<VcsError> for CoreError {
    fn from(e: VcsError) -> Self {
        CoreError::Vcs(e)
    }
}

impl From<PluginError> for CoreError {
    fn from(e: PluginError) -> Self {
        CoreError::Plugin(e)
    }
}

impl From<ManifestError> for CoreError {
    fn from(e: ManifestError) -> Self {
        CoreError::Manifest(e)
    }
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<StateError> for CoreError {
    fn from(e: StateError) -> Self {
        CoreError::State(e)
    }
}

impl From<WatcherError> for CoreError {
    fn from(e: WatcherError) -> Self {
        CoreError::Watcher(e)
    }
}
