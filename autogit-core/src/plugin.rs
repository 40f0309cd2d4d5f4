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

//! The plugin contract, manifest loading, and the in-process plugin host.
//!
//! A `PluginSpec` is an opaque `"<module>:<class>"` string, the same shape
//! the original implementation resolved via `importlib.import_module` +
//! `getattr`. Rust has no safe equivalent of that late dynamic resolution;
//! instead, a small static registry maps known spec strings to plugin
//! constructors linked into the binary. This keeps the wire-level contract
//! (opaque spec strings in config/manifest JSON) while resolving plugins
//! safely at compile time.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ManifestError;
use crate::types::{
    CommitDecision, CommitRequest, ConflictInfo, ExecutionContext, FileChangeEvent, PullDecision,
    PullRequest, PullResult, PushDecision, PushRequest, StageDecision, StageRequest,
};

/// An opaque, module-qualified identifier naming a plugin implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginSpec(String);

impl PluginSpec {
    pub fn new(spec: impl Into<String>) -> Self {
        PluginSpec(spec.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata describing a loaded plugin, independent of its spec string.
#[derive(Debug, Clone, Default)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub description: Option<String>,
}

/// The raw `manifest.json` shape read from a plugin directory.
#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    module: Option<String>,
    class: Option<String>,
    version: Option<String>,
    author: Option<String>,
    description: Option<String>,
}

const REQUIRED_FIELDS: &[&str] = &["name", "module", "class", "version"];

/// Reads and validates one `manifest.json`, returning its discovered
/// `PluginSpec` (`"<module>:<class>"`) and manifest metadata. Missing
/// required fields or unparseable JSON reject the manifest with a warning;
/// the caller is expected to continue loading other manifests.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<(PluginSpec, PluginManifest), ManifestError> {
    let path = path.as_ref();
    let raw_text = fs::read_to_string(path)
        .map_err(|e| ManifestError { path: path.display().to_string(), reason: e.to_string() })?;
    let raw: RawManifest = serde_json::from_str(&raw_text)
        .map_err(|e| ManifestError { path: path.display().to_string(), reason: e.to_string() })?;

    let mut missing = Vec::new();
    if raw.name.is_none() {
        missing.push("name");
    }
    if raw.module.is_none() {
        missing.push("module");
    }
    if raw.class.is_none() {
        missing.push("class");
    }
    if raw.version.is_none() {
        missing.push("version");
    }
    if !missing.is_empty() {
        return Err(ManifestError {
            path: path.display().to_string(),
            reason: format!("missing fields: {}", missing.join(", ")),
        });
    }

    let module = raw.module.unwrap();
    let class = raw.class.unwrap();
    let spec = PluginSpec::new(format!("{}:{}", module, class));
    let manifest = PluginManifest {
        name: raw.name.unwrap(),
        version: raw.version.unwrap(),
        author: raw.author,
        description: raw.description,
    };
    Ok((spec, manifest))
}

/// Scans `plugins_dir` for `manifest.json` files (recursively), returning
/// every spec that validated. Invalid manifests are logged and skipped.
///
/// The plugin search root (`plugins_dir`) is the Rust analog of the
/// module-resolution path the original implementation prepended before
/// `importlib.import_module`: here it is simply where `manifest.json`
/// files are discovered, since instantiation itself goes through the
/// static [`PluginRegistry`] rather than a dynamic import.
pub fn discover_manifests(plugins_dir: impl AsRef<Path>) -> Vec<(PluginSpec, PluginManifest, PathBuf)> {
    let mut found = Vec::new();
    walk_manifests(plugins_dir.as_ref(), &mut found);
    found
}

/// Indexes [`discover_manifests`]'s output by spec string, for use with
/// [`PluginHost::load_with_manifests`].
pub fn manifests_by_spec(plugins_dir: impl AsRef<Path>) -> HashMap<String, PluginManifest> {
    discover_manifests(plugins_dir)
        .into_iter()
        .map(|(spec, manifest, _path)| (spec.as_str().to_string(), manifest))
        .collect()
}

fn walk_manifests(dir: &Path, out: &mut Vec<(PluginSpec, PluginManifest, PathBuf)>) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_manifests(&path, out);
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("manifest.json") {
            match load_manifest(&path) {
                Ok((spec, manifest)) => out.push((spec, manifest, path)),
                Err(e) => log::warn!("{}", e),
            }
        }
    }
}

/// The typed hook interface every plugin implements. All ten hooks default
/// to no-ops or an allowing decision, mirroring `BasePlugin` in the
/// original implementation. Decision-returning hooks participate in the
/// dispatcher's aggregation; fan-out hooks are notification-only.
///
/// `Sync` is required, not just `Send`: the dispatcher hands an `Arc<dyn
/// Plugin>` clone to a worker thread for each call, so the instance must
/// be safe to reference from whichever worker thread ends up running it,
/// even after the dispatcher's own wait has timed out.
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::default()
    }

    fn on_file_detected(&self, _evt: &FileChangeEvent, _ctx: &ExecutionContext) {}

    fn before_stage(&self, _req: &StageRequest, _ctx: &ExecutionContext) -> StageDecision {
        StageDecision::allow()
    }

    fn after_stage(&self, _req: &StageRequest, _ctx: &ExecutionContext) {}

    fn before_commit(&self, _req: &CommitRequest, _ctx: &ExecutionContext) -> CommitDecision {
        CommitDecision::allow()
    }

    fn after_commit(&self, _commit_sha: Option<&str>, _ctx: &ExecutionContext) {}

    fn before_push(&self, _req: &PushRequest, _ctx: &ExecutionContext) -> PushDecision {
        PushDecision::allow()
    }

    fn after_push(&self, _req: &PushRequest, _ctx: &ExecutionContext) {}

    fn before_pull(&self, _req: &PullRequest, _ctx: &ExecutionContext) -> PullDecision {
        PullDecision::allow()
    }

    fn after_pull(&self, _res: &PullResult, _ctx: &ExecutionContext) {}

    fn on_conflict(&self, _info: &ConflictInfo, _ctx: &ExecutionContext) {}
}

/// A loaded plugin: its resolved spec, its live instance, and its manifest.
///
/// `instance` is an `Arc` rather than a `Box` so the dispatcher can clone
/// a reference into a worker thread without unsafely aliasing the
/// original: the instance stays alive for as long as any in-flight call
/// holds a clone, even one still running past its own timeout.
pub struct PluginRecord {
    pub spec: PluginSpec,
    pub instance: Arc<dyn Plugin>,
    pub manifest: PluginManifest,
}

/// Constructs a plugin instance for a known spec string.
pub type PluginFactory = fn() -> Box<dyn Plugin>;

/// The static spec -> constructor registry. Plugin crates register their
/// factories here (or callers pass an equivalent map to
/// [`PluginHost::load`]); the registry is the idiomatic Rust analog of the
/// original's `importlib.import_module` + `getattr` resolution.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn register(&mut self, spec: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(spec.into(), factory);
    }

    fn resolve(&self, spec: &PluginSpec) -> Option<PluginFactory> {
        self.factories.get(spec.as_str()).copied()
    }
}

/// Owns the ordered collection of loaded plugin instances for one run.
pub struct PluginHost {
    records: Vec<PluginRecord>,
}

impl PluginHost {
    /// Loads `specs` in order against `registry`. A spec with no matching
    /// factory is logged and skipped — one bad plugin never aborts the
    /// run. Order of the successfully loaded plugins matches the input
    /// list.
    pub fn load(specs: &[PluginSpec], registry: &PluginRegistry) -> Self {
        Self::load_with_manifests(specs, registry, &HashMap::new())
    }

    /// Like [`load`](Self::load), but prefers manifest metadata discovered
    /// from `manifest.json` files (keyed by spec string, as produced by
    /// [`discover_manifests`]) over the instance's own
    /// [`Plugin::manifest`] default.
    pub fn load_with_manifests(
        specs: &[PluginSpec],
        registry: &PluginRegistry,
        manifests: &HashMap<String, PluginManifest>,
    ) -> Self {
        let mut records = Vec::with_capacity(specs.len());
        for spec in specs {
            match registry.resolve(spec) {
                Some(factory) => {
                    let instance: Arc<dyn Plugin> = Arc::from(factory());
                    let manifest = manifests
                        .get(spec.as_str())
                        .cloned()
                        .unwrap_or_else(|| instance.manifest());
                    records.push(PluginRecord { spec: spec.clone(), instance, manifest });
                }
                None => {
                    log::error!("failed to load plugin {}: no factory registered", spec);
                }
            }
        }
        PluginHost { records }
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }
}
