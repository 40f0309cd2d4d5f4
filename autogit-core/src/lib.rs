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

//! The main library for autogit-core: the watcher, VCS adapter, circuit
//! breaker state store, plugin host, dispatcher, and pipeline engine that
//! together drive the watch/stage/commit/push automation.

#[macro_use]
extern crate serde_derive;

pub mod circuit;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod plugin;
pub mod types;
pub mod vcs;
pub mod watcher;

pub use crate::circuit::{CircuitState, CircuitStore};
pub use crate::config::Config;
pub use crate::dispatcher::Dispatcher;
pub use crate::error::CoreError;
pub use crate::pipeline::Pipeline;
pub use crate::plugin::{Plugin, PluginHost, PluginManifest, PluginRecord, PluginSpec};
pub use crate::vcs::VcsAdapter;
pub use crate::watcher::{new_watcher, PollingWatcher, Watcher};
