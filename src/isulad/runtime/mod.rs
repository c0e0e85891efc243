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

//! Runtime operations capability.
//!
//! The container service drives every container through the [`RuntimeOps`]
//! trait and never talks to an OCI runtime directly. The shim-based adapter
//! in [`isula`] implements it for all runtimes except the in-process `lcr`
//! engine, which lives outside this crate and is selected when
//! [`is_isula_runtime`] returns false.

pub mod error;
pub mod isula;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use error::{Result, RuntimeError};

/// Lifecycle states reported by `<runtime> state`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    Paused,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStatusInfo {
    pub status: ContainerStatus,
    /// Container init PID; absent when the runtime reported PID 0.
    pub pid: Option<i32>,
}

/// Resource usage sampled from `<runtime> events --stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStatsInfo {
    pub pids_current: u64,
    pub cpu_use_nanos: u64,
    pub cpu_system_use: u64,
    pub mem_used: u64,
    pub mem_limit: u64,
    pub inactive_file_total: u64,
}

/// PIDs and kernel start times captured at container start. The service
/// layer uses the (pid, start time) pairs to detect PID reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidInfo {
    pub pid: i32,
    pub start_time: u64,
    /// The supervising shim.
    pub ppid: i32,
    pub pstart_time: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciProcessUser {
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(
        default,
        rename = "additionalGids",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub additional_gids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciConsoleSize {
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciCapabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bounding: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effective: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inheritable: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permitted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambient: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OciRlimit {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub hard: u64,
    #[serde(default)]
    pub soft: u64,
}

/// The process block of an OCI runtime spec, as parsed from the bundle's
/// `config.json` (create) or from an exec request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciProcess {
    #[serde(default)]
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_size: Option<OciConsoleSize>,
    #[serde(default)]
    pub user: OciProcessUser,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<OciCapabilities>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<OciRlimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// Cgroup-related knobs of a container's host configuration, as the service
/// layer stores them. Only the fields that project into a runtime `update`
/// payload appear here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub blkio_weight: u16,
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default)]
    pub cpu_period: i64,
    #[serde(default)]
    pub cpu_quota: i64,
    #[serde(default)]
    pub cpu_realtime_period: i64,
    #[serde(default)]
    pub cpu_realtime_runtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset_cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset_mems: Option<String>,
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub memory_swap: i64,
    #[serde(default)]
    pub memory_reservation: i64,
    #[serde(default)]
    pub kernel_memory: i64,
    /// `--cpus=n` expressed as n * 1e9; takes precedence over period/quota.
    #[serde(default)]
    pub nano_cpus: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    /// OCI bundle directory, owned by the caller.
    pub bundle: String,
    /// State root; the work directory is `<state>/<id>`.
    pub state: String,
    pub tty: bool,
    pub open_stdin: bool,
    /// Daemon-side console FIFOs (stdin, stdout, stderr).
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// FIFO on which the shim signals container exit.
    pub exit_fifo: String,
    pub process: OciProcess,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct StartParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct KillParams {
    pub pid: i32,
    pub start_time: u64,
    pub signal: u32,
    pub stop_signal: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CleanParams {
    pub statepath: String,
}

#[derive(Debug, Clone, Default)]
pub struct RmParams {
    pub rootpath: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatusParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatsParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecParams {
    pub state: String,
    /// Container root; the exec bundle is `<rootpath>/<id>`.
    pub rootpath: String,
    /// Caller-chosen exec session id; generated when absent.
    pub suffix: Option<String>,
    /// Seconds to wait for the exec shim; non-positive waits forever.
    pub timeout: i64,
    /// Console FIFOs (stdin, stdout, stderr); any present FIFO makes the
    /// exec run in the foreground so its exit status can be collected.
    pub console_fifos: [Option<String>; 3],
    pub process: OciProcess,
}

#[derive(Debug, Clone, Default)]
pub struct PauseParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateParams {
    pub state: String,
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AttachParams {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPidsParams {
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResizeParams {
    pub height: u32,
    pub width: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ExecResizeParams {
    pub state: String,
    /// Exec session id; resize is a no-op for sessions without one.
    pub suffix: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// The operation set a container runtime backend offers the service layer.
///
/// Operations on distinct containers may run on distinct threads; the
/// caller serializes operations that target the same container.
pub trait RuntimeOps: Send + Sync {
    fn create(&self, id: &str, runtime: &str, params: &CreateParams) -> Result<()>;
    fn start(&self, id: &str, runtime: &str, params: &StartParams) -> Result<PidInfo>;
    fn restart(&self, id: &str, runtime: &str) -> Result<()>;
    fn kill(&self, id: &str, runtime: &str, params: &KillParams) -> Result<()>;
    fn clean_resource(&self, id: &str, runtime: &str, params: &CleanParams) -> Result<()>;
    fn rm(&self, id: &str, runtime: &str, params: &RmParams) -> Result<()>;
    fn status(&self, id: &str, runtime: &str, params: &StatusParams) -> Result<RuntimeStatusInfo>;
    fn stats(&self, id: &str, runtime: &str, params: &StatsParams) -> Result<RuntimeStatsInfo>;
    /// Runs an auxiliary process in the container; returns its exit code.
    fn exec(&self, id: &str, runtime: &str, params: &ExecParams) -> Result<i32>;
    fn pause(&self, id: &str, runtime: &str, params: &PauseParams) -> Result<()>;
    fn resume(&self, id: &str, runtime: &str, params: &ResumeParams) -> Result<()>;
    fn update(&self, id: &str, runtime: &str, params: &UpdateParams) -> Result<()>;
    fn attach(&self, id: &str, runtime: &str, params: &AttachParams) -> Result<()>;
    fn listpids(&self, id: &str, runtime: &str, params: &ListPidsParams) -> Result<Vec<i32>>;
    fn resize(&self, id: &str, runtime: &str, params: &ResizeParams) -> Result<()>;
    fn exec_resize(&self, id: &str, runtime: &str, params: &ExecResizeParams) -> Result<()>;
}

/// Selects the shim-based adapter: every runtime name except the in-process
/// `lcr` engine (matched case-insensitively) goes through a shim.
pub fn is_isula_runtime(runtime: &str) -> bool {
    !runtime.eq_ignore_ascii_case("lcr")
}

/// Returns the backend serving `runtime`, or `None` when the caller should
/// use the in-process engine instead.
pub fn runtime_ops(runtime: &str) -> Option<&'static dyn RuntimeOps> {
    static ISULA: isula::IsulaRuntime = isula::IsulaRuntime;
    if is_isula_runtime(runtime) {
        Some(&ISULA)
    } else {
        None
    }
}
