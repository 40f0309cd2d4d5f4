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

//! Persisted run configuration.
//!
//! `enabled_plugins` is the one field with a non-obvious default: an
//! absent or `null` value is filled with [`default_plugins`] rather than
//! left empty, the same masking behavior `Config::__post_init__` gave the
//! original implementation. A corrupt document is reported, never
//! silently replaced — callers decide whether to fall back to defaults.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

fn default_polling_interval() -> f64 {
    2.0
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

/// Plugins enabled out of the box. The demo plugin is the only one shipped
/// in this workspace; real feature plugins (secret scanning, commit
/// message generation, lint formatting) are out of scope.
pub fn default_plugins() -> Vec<String> {
    vec!["demo_plugin:DemoPlugin".to_string()]
}

/// The persisted run configuration for one watched repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_sec: f64,
    #[serde(default)]
    pub enabled_plugins: Option<Vec<String>>,
}

impl Config {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Config {
            base_dir: base_dir.into(),
            repo_path: String::new(),
            remote: default_remote(),
            branch: default_branch(),
            polling_interval_sec: default_polling_interval(),
            enabled_plugins: Some(default_plugins()),
        }
    }

    /// The effective plugin list: the persisted value if present, the
    /// defaults otherwise.
    pub fn enabled_plugins(&self) -> Vec<String> {
        self.enabled_plugins.clone().unwrap_or_else(default_plugins)
    }

    fn path(base_dir: &Path) -> PathBuf {
        base_dir.join("data").join("config.json")
    }

    /// Loads `<base_dir>/data/config.json`, or returns fresh defaults when
    /// no file exists yet. A present but unparseable file is an error —
    /// the caller decides whether to fall back rather than this function
    /// silently discarding a document the user may want recovered.
    pub fn load(base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base_dir = base_dir.into();
        let path = Self::path(&base_dir);
        if !path.exists() {
            return Ok(Config::new(base_dir));
        }
        let raw = fs::read_to_string(&path).map_err(|e| ConfigError { reason: e.to_string() })?;
        let mut cfg: Config =
            serde_json::from_str(&raw).map_err(|e| ConfigError { reason: e.to_string() })?;
        cfg.base_dir = base_dir;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path(&self.base_dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError { reason: e.to_string() })?;
        }
        let payload =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError { reason: e.to_string() })?;
        fs::write(&path, payload).map_err(|e| ConfigError { reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.remote, "origin");
        assert_eq!(cfg.branch, "main");
        assert_eq!(cfg.enabled_plugins(), default_plugins());
    }

    #[test]
    fn absent_enabled_plugins_field_defaults_on_load() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("data")).unwrap();
        fs::write(
            tmp.path().join("data").join("config.json"),
            r#"{"repo_path": "/repo", "remote": "upstream", "branch": "main", "polling_interval_sec": 2.0}"#,
        )
        .unwrap();
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.remote, "upstream");
        assert_eq!(cfg.enabled_plugins(), default_plugins());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::new(tmp.path());
        cfg.repo_path = "/home/user/repo".to_string();
        cfg.enabled_plugins = Some(vec!["demo_plugin:DemoPlugin".to_string()]);
        cfg.save().unwrap();

        let reloaded = Config::load(tmp.path()).unwrap();
        assert_eq!(reloaded.repo_path, "/home/user/repo");
        assert_eq!(reloaded.enabled_plugins(), vec!["demo_plugin:DemoPlugin".to_string()]);
    }

    #[test]
    fn corrupt_file_is_reported_as_error() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("data")).unwrap();
        fs::write(tmp.path().join("data").join("config.json"), b"{ not json").unwrap();
        assert!(Config::load(tmp.path()).is_err());
    }
}
