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

//! OCI runtime invocation.
//!
//! Builds the runtime argv, runs the binary from the container work
//! directory with captured output, and parses the JSON documents the
//! `state` and `events --stats` subcommands emit.

use crate::isulad::config;
use crate::isulad::runtime::error::{Result, RuntimeError};
use crate::isulad::runtime::{ContainerStatus, RuntimeStatsInfo, RuntimeStatusInfo};
use crate::isulad::util::errmsg;
use log::{debug, error, info};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Output, Stdio};

/// Upper bound on runtime argv slots (binary + prefix args + subcommand +
/// options + id + kill signal).
const MAX_RUNTIME_PARAMS: usize = 20;

/// Inspects a failed call's stderr; returning true converts the failure
/// into success.
pub type StderrCheck = fn(&str) -> bool;

/// The runtime reports a kill on a missing container as an error; nothing
/// was left to kill, so the kill did its job.
pub fn kill_output_check(stderr: &str) -> bool {
    stderr.contains("does not exist")
}

/// Surfaces stderr to the user-visible error buffer; the failure stands.
pub fn show_stderr(stderr: &str) -> bool {
    errmsg::set_error_message(stderr);
    false
}

fn assemble_argv(
    cmd: &str,
    prefix_args: &[String],
    subcmd: &str,
    opts: &[&str],
    id: Option<&str>,
) -> Result<Vec<String>> {
    let mut argv = Vec::with_capacity(MAX_RUNTIME_PARAMS);
    argv.push(cmd.to_string());
    argv.extend(prefix_args.iter().cloned());
    argv.push(subcmd.to_string());
    argv.extend(opts.iter().map(|opt| opt.to_string()));
    if let Some(id) = id {
        argv.push(id.to_string());
    }
    if subcmd == "kill" {
        argv.push("9".to_string());
    }

    if argv.len() > MAX_RUNTIME_PARAMS {
        return Err(RuntimeError::BadArgument(format!(
            "runtime {} argv needs {} slots, limit is {}",
            subcmd,
            argv.len(),
            MAX_RUNTIME_PARAMS
        )));
    }
    Ok(argv)
}

fn run_runtime(
    workdir: &Path,
    runtime: &str,
    subcmd: &str,
    opts: &[&str],
    id: Option<&str>,
) -> Result<Output> {
    let cmd = config::runtime_command(runtime)
        .ok_or_else(|| RuntimeError::ConfigMissing(runtime.to_string()))?;
    let prefix_args = config::runtime_args(runtime);
    let argv = assemble_argv(&cmd, &prefix_args, subcmd, opts, id)?;
    debug!("runtime call params {}", argv.join(" "));

    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // runc start blocks on sd_notify when the daemon's socket leaks in.
    if subcmd == "start" {
        command.env_remove("NOTIFY_SOCKET");
    }

    command.output().map_err(|err| {
        RuntimeError::ExecFailed(format!("exec {} {} failed: {}", cmd, subcmd, err))
    })
}

/// Invokes a runtime subcommand for its side effect. On a nonzero exit the
/// optional `on_stderr` callback may reinterpret the failure as success.
pub fn call_simple(
    workdir: &Path,
    runtime: &str,
    subcmd: &str,
    opts: &[&str],
    id: &str,
    on_stderr: Option<StderrCheck>,
) -> Result<()> {
    let output = run_runtime(workdir, runtime, subcmd, opts, Some(id))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    error!("call runtime {} failed stderr {}", subcmd, stderr);
    if let Some(check) = on_stderr {
        if check(&stderr) {
            return Ok(());
        }
    }

    Err(RuntimeError::RuntimeCallFailed {
        subcmd: subcmd.to_string(),
        stderr,
    })
}

pub fn call_delete_force(workdir: &Path, runtime: &str, id: &str) -> Result<()> {
    call_simple(workdir, runtime, "delete", &["--force"], id, None)
}

#[derive(Debug, Deserialize)]
struct OciState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    pid: i32,
}

fn status_from_str(status: &str) -> ContainerStatus {
    match status {
        "running" => ContainerStatus::Running,
        "stopped" => ContainerStatus::Stopped,
        "paused" => ContainerStatus::Paused,
        _ => ContainerStatus::Unknown,
    }
}

fn parse_state_output(stdout: &[u8]) -> Result<RuntimeStatusInfo> {
    if stdout.is_empty() {
        return Err(RuntimeError::ParseFailed(
            "runtime state produced no stdout".to_string(),
        ));
    }
    let state: OciState = serde_json::from_slice(stdout)
        .map_err(|err| RuntimeError::ParseFailed(format!("oci state: {}", err)))?;

    Ok(RuntimeStatusInfo {
        status: status_from_str(&state.status),
        pid: (state.pid != 0).then_some(state.pid),
    })
}

/// `<runtime> state <id>`, parsed into the container's status and init PID.
pub fn call_state(workdir: &Path, runtime: &str, id: &str) -> Result<RuntimeStatusInfo> {
    let output = run_runtime(workdir, runtime, "state", &[], Some(id))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!("call runtime state failed: {}", stderr);
        return Err(RuntimeError::RuntimeCallFailed {
            subcmd: "state".to_string(),
            stderr,
        });
    }

    let status = parse_state_output(&output.stdout)?;
    info!(
        "container {} status {:?} pid {}",
        id,
        status.status,
        status.pid.unwrap_or(0)
    );
    Ok(status)
}

#[derive(Debug, Default, Deserialize)]
struct StatsPids {
    #[serde(default)]
    current: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StatsCpuUsage {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    kernel: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StatsCpu {
    #[serde(default)]
    usage: StatsCpuUsage,
}

#[derive(Debug, Default, Deserialize)]
struct StatsMemoryUsage {
    #[serde(default)]
    usage: u64,
    #[serde(default)]
    limit: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StatsMemoryRaw {
    #[serde(default)]
    total_inactive_file: u64,
}

#[derive(Debug, Default, Deserialize)]
struct StatsMemory {
    #[serde(default)]
    usage: StatsMemoryUsage,
    #[serde(default)]
    raw: StatsMemoryRaw,
}

#[derive(Debug, Default, Deserialize)]
struct StatsData {
    #[serde(default)]
    pids: StatsPids,
    #[serde(default)]
    cpu: StatsCpu,
    #[serde(default)]
    memory: StatsMemory,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeStats {
    #[serde(default)]
    data: StatsData,
}

fn parse_stats_output(stdout: &[u8]) -> Result<RuntimeStatsInfo> {
    if stdout.is_empty() {
        return Err(RuntimeError::ParseFailed(
            "runtime events --stats produced no stdout".to_string(),
        ));
    }
    let stats: RuntimeStats = serde_json::from_slice(stdout)
        .map_err(|err| RuntimeError::ParseFailed(format!("runtime stats: {}", err)))?;

    Ok(RuntimeStatsInfo {
        pids_current: stats.data.pids.current,
        cpu_use_nanos: stats.data.cpu.usage.total,
        cpu_system_use: stats.data.cpu.usage.kernel,
        mem_used: stats.data.memory.usage.usage,
        mem_limit: stats.data.memory.usage.limit,
        inactive_file_total: stats.data.memory.raw.total_inactive_file,
    })
}

/// `<runtime> events --stats <id>`, parsed into a resource usage sample.
pub fn call_events_stats(workdir: &Path, runtime: &str, id: &str) -> Result<RuntimeStatsInfo> {
    let output = run_runtime(workdir, runtime, "events", &["--stats"], Some(id))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!("call runtime events --stats failed: {}", stderr);
        return Err(RuntimeError::RuntimeCallFailed {
            subcmd: "events".to_string(),
            stderr,
        });
    }

    parse_stats_output(&output.stdout)
}
