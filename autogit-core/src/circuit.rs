// Copyright 2017 Google Inc. All rights reserved.
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

//! Per-plugin failure counters, persisted across runs.
//!
//! `disabled ⇒ failures ≥ DISABLE_THRESHOLD`. The store is loaded once at
//! construction; a parse error starts it empty rather than blocking
//! startup. Every mutation rewrites the whole document atomically
//! (write to a scratch file, then rename over the target) and is
//! serialized behind a single lock, so a reader never observes a
//! torn write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StateError;
use crate::plugin::PluginSpec;

/// Number of consecutive failures after which a plugin is disabled.
pub const DISABLE_THRESHOLD: u32 = 3;

/// Recorded failure history for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    #[serde(default)]
    pub failures: u32,
    #[serde(default, rename = "last_failure_ts")]
    pub last_failure_at: f64,
    #[serde(default)]
    pub disabled: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState { failures: 0, last_failure_at: 0.0, disabled: false }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    circuits: HashMap<String, CircuitState>,
}

/// A persistent `PluginSpec -> CircuitState` mapping.
pub struct CircuitStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, CircuitState>>,
}

impl CircuitStore {
    /// Loads the store from `<base_dir>/data/state.json`. A missing or
    /// corrupt file starts the store empty; it is never fatal.
    pub fn open(base_dir: impl AsRef<Path>) -> Self {
        let path = base_dir.as_ref().join("data").join("state.json");
        let data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Document>(&raw) {
                Ok(doc) => doc.circuits,
                Err(e) => {
                    let err = StateError { reason: e.to_string() };
                    log::warn!("{}, starting circuit state empty", err);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        CircuitStore { path, inner: Mutex::new(data) }
    }

    fn flush(&self, data: &HashMap<String, CircuitState>) {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let doc = Document { circuits: data.clone() };
        let payload = match serde_json::to_string_pretty(&doc) {
            Ok(p) => p,
            Err(e) => {
                log::error!("failed to serialize circuit state: {}", e);
                return;
            }
        };
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = match tempfile::NamedTempFile::new_in(parent) {
            Ok(t) => t,
            Err(e) => {
                log::error!("failed to create scratch file for circuit state: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(tmp.path(), payload) {
            log::error!("failed to write circuit state scratch file: {}", e);
            return;
        }
        if let Err(e) = tmp.persist(&self.path) {
            log::error!("failed to persist circuit state: {}", e);
        }
    }

    /// Increments the failure count; disables the plugin once the count
    /// reaches [`DISABLE_THRESHOLD`].
    pub fn record_failure(&self, spec: &PluginSpec) {
        let mut guard = self.inner.lock().unwrap();
        let state = guard.entry(spec.as_str().to_string()).or_default();
        state.failures += 1;
        state.last_failure_at = now_secs();
        if state.failures >= DISABLE_THRESHOLD {
            state.disabled = true;
        }
        self.flush(&guard);
    }

    /// Resets a plugin's circuit to a fresh, enabled state.
    pub fn reset(&self, spec: &PluginSpec) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(spec.as_str().to_string(), CircuitState::default());
        self.flush(&guard);
    }

    pub fn is_disabled(&self, spec: &PluginSpec) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.get(spec.as_str()).map(|s| s.disabled).unwrap_or(false)
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}
