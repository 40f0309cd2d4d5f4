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

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;

use autogit_core::circuit::CircuitStore;
use autogit_core::config::Config;
use autogit_core::dispatcher::Dispatcher;
use autogit_core::plugin::{manifests_by_spec, PluginHost, PluginRegistry, PluginSpec};
use autogit_core::vcs::VcsAdapter;
use autogit_core::watcher::new_watcher;
use autogit_core::Pipeline;

/// Watches a git repository and automatically stages, commits, and pushes
/// changes, dispatching a plugin chain at each phase of the cycle.
#[derive(Parser, Debug)]
#[command(name = "autogit", version)]
struct Cli {
    /// Path to the repository to watch.
    repo: PathBuf,

    /// Directory holding persisted config, circuit state, and logs.
    /// Defaults to the platform data directory.
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Remote name to pull from and push to. Overrides the saved config.
    #[arg(long)]
    remote: Option<String>,

    /// Branch to pull from and push to. Overrides the saved config.
    #[arg(long)]
    branch: Option<String>,

    /// Directory to search recursively for plugin `manifest.json` files.
    /// Only metadata (name/version/author/description) is taken from
    /// discovered manifests; instantiation still goes through the
    /// in-binary plugin registry.
    #[arg(long)]
    plugins_dir: Option<PathBuf>,
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("autogit")
}

fn bootstrap_logging(base_dir: &PathBuf) -> Result<(), fern::InitError> {
    let log_dir = base_dir.join("data").join("logs");
    std::fs::create_dir_all(&log_dir)?;
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} | {:<5} | {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr())
        .chain(fern::log_file(log_dir.join("app.log"))?)
        .apply()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let base_dir = cli.base_dir.clone().unwrap_or_else(default_base_dir);

    if let Err(e) = bootstrap_logging(&base_dir) {
        eprintln!("failed to initialize logging: {}", e);
        process::exit(1);
    }

    let mut config = match Config::load(&base_dir) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("config corrupt ({}), starting from defaults", e);
            Config::new(&base_dir)
        }
    };
    config.repo_path = cli.repo.display().to_string();
    if let Some(remote) = cli.remote {
        config.remote = remote;
    }
    if let Some(branch) = cli.branch {
        config.branch = branch;
    }
    if let Err(e) = config.save() {
        log::warn!("failed to persist config: {}", e);
    }

    let vcs = VcsAdapter::new(&cli.repo);
    if !vcs.is_repo() {
        log::error!("{} is not a git repository", cli.repo.display());
        process::exit(1);
    }

    let state = Arc::new(CircuitStore::open(&base_dir));

    let mut registry = PluginRegistry::new();
    registry.register("demo_plugin:DemoPlugin", demo_plugin::factory);

    let specs: Vec<PluginSpec> = config.enabled_plugins().into_iter().map(PluginSpec::new).collect();
    let manifests = cli
        .plugins_dir
        .as_ref()
        .map(manifests_by_spec)
        .unwrap_or_default();
    let host = PluginHost::load_with_manifests(&specs, &registry, &manifests);

    let dispatcher = Dispatcher::new(state);
    let watcher = new_watcher(&cli.repo);

    let mut pipeline = Pipeline::new(&cli.repo, watcher, dispatcher, host)
        .with_interval(std::time::Duration::from_secs_f64(config.polling_interval_sec));
    if !config.remote.is_empty() && !config.branch.is_empty() {
        pipeline = pipeline.with_remote(config.remote.clone(), config.branch.clone());
    }

    pipeline.start();
}
