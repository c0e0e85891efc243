/*
 * Copyright (C) 2025 The iSulad Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Process-wide daemon configuration snapshot.
//!
//! The configuration loader parses the daemon's JSON config elsewhere and
//! installs the result here with [`overwrite_config`]; reload replaces the
//! whole snapshot. Readers hold the read lock only for a single lookup and
//! never across a syscall.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// One entry of the daemon's `runtimes` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    /// Path of the OCI runtime binary.
    pub path: String,
    /// Extra arguments inserted before the runtime subcommand.
    #[serde(default)]
    pub runtime_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    /// Runtime name -> binary configuration.
    #[serde(default)]
    pub runtimes: HashMap<String, RuntimeConfig>,
}

fn config() -> &'static RwLock<DaemonConfig> {
    static CONFIG: OnceLock<RwLock<DaemonConfig>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(DaemonConfig::default()))
}

/// Installs or replaces the configuration snapshot.
pub fn overwrite_config(new: DaemonConfig) {
    let mut guard = config()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = new;
}

/// Resolves the binary used for `runtime`. Configured entries win; the
/// well-known OCI runtimes fall back to their own name, resolved via PATH.
pub fn runtime_command(runtime: &str) -> Option<String> {
    let guard = config()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(entry) = guard.runtimes.get(runtime) {
        if !entry.path.is_empty() {
            return Some(entry.path.clone());
        }
    }
    drop(guard);

    match runtime {
        "runc" | "kata-runtime" | "runsc" => Some(runtime.to_string()),
        _ => None,
    }
}

/// Static argument prefix configured for `runtime`; empty when absent.
pub fn runtime_args(runtime: &str) -> Vec<String> {
    let guard = config()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard
        .runtimes
        .get(runtime)
        .map(|entry| entry.runtime_args.clone())
        .unwrap_or_default()
}
