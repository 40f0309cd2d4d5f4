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

//! An example plugin: logs each detected file change. Illustrates the
//! `Plugin` trait contract; not a feature plugin in its own right.

use autogit_core::plugin::{Plugin, PluginManifest};
use autogit_core::types::{ExecutionContext, FileChangeEvent};

pub struct DemoPlugin;

impl Plugin for DemoPlugin {
    fn manifest(&self) -> PluginManifest {
        PluginManifest {
            name: "DemoPlugin".to_string(),
            version: "0.1.0".to_string(),
            author: None,
            description: Some("logs file events".to_string()),
        }
    }

    fn on_file_detected(&self, evt: &FileChangeEvent, _ctx: &ExecutionContext) {
        log::info!("[DemoPlugin] {:?} {}", evt.kind, evt.path.display());
    }
}

/// Constructs a [`DemoPlugin`]; registered under the spec string
/// `demo_plugin:DemoPlugin`.
pub fn factory() -> Box<dyn Plugin> {
    Box::new(DemoPlugin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    #[test]
    fn manifest_matches_expected_identity() {
        let plugin = DemoPlugin;
        let manifest = plugin.manifest();
        assert_eq!(manifest.name, "DemoPlugin");
        assert_eq!(manifest.version, "0.1.0");
    }

    #[test]
    fn on_file_detected_does_not_panic() {
        let plugin = DemoPlugin;
        let evt = FileChangeEvent {
            path: PathBuf::from("/repo/a.txt"),
            kind: autogit_core::types::ChangeKind::Created,
            observed_at: SystemTime::now(),
            repo_root: PathBuf::from("/repo"),
        };
        let ctx = ExecutionContext { repo_root: PathBuf::from("/repo"), remote: None, branch: None };
        plugin.on_file_detected(&evt, &ctx);
    }
}
