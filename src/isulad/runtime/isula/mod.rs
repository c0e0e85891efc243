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

//! Shim-based runtime backend.
//!
//! Each operation composes the resolver, descriptor builder, shim
//! supervisor and runtime invoker under the failure policy the service
//! layer expects: failed operations leave the work directory behind for
//! post-mortem, cleanup demotes retriable runtime failures to warnings, and
//! only the final directory removal is fatal.

pub mod errlog;
pub mod invoker;
pub mod process;
pub mod resources;
pub mod shim;

use crate::isulad::config;
use crate::isulad::runtime::error::{Result, RuntimeError};
use crate::isulad::runtime::{
    AttachParams, CleanParams, CreateParams, ExecParams, ExecResizeParams, KillParams,
    ListPidsParams, PauseParams, PidInfo, ResizeParams, ResumeParams, RmParams, RuntimeOps,
    RuntimeStatsInfo, RuntimeStatusInfo, StartParams, StatsParams, StatusParams, UpdateParams,
};
use crate::isulad::util::errmsg;
use crate::isulad::util::fs::{
    ensure_dir_with_mode, remove_dir_recursive, SECURE_DIRECTORY_MODE,
};
use crate::isulad::util::proc;
use log::{error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, Pid};
use process::ProcessState;
use rand::rngs::OsRng;
use rand::RngCore;
use resources::CgroupResources;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const RESIZE_FIFO_NAME: &str = "resize_fifo";
const EXEC_SUBDIR: &str = "exec";
const UPDATE_SUBDIR: &str = "update";
const EXEC_ID_LEN: usize = 64;

const PATH_MAX: usize = libc::PATH_MAX as usize;

pub(crate) fn ensure_path_fits(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= PATH_MAX {
        return Err(RuntimeError::PathTooLong(format!("{} bytes", len)));
    }
    Ok(())
}

fn checked_join(base: &str, name: &str) -> Result<PathBuf> {
    let path = Path::new(base).join(name);
    ensure_path_fits(&path)?;
    Ok(path)
}

fn generate_exec_id() -> String {
    let mut bytes = [0u8; EXEC_ID_LEN / 2];
    OsRng.fill_bytes(&mut bytes);
    let mut id = String::with_capacity(EXEC_ID_LEN);
    for byte in bytes {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// An exec runs in the foreground exactly when some console FIFO is
/// attached; the caller then needs the shim's exit status.
fn fg_exec(params: &ExecParams) -> bool {
    params
        .console_fifos
        .iter()
        .any(|fifo| fifo.as_deref().is_some_and(|path| !path.is_empty()))
}

fn retry_call<F: FnMut() -> bool>(attempts: u32, interval: Duration, mut call: F) -> bool {
    for attempt in 0..attempts {
        if call() {
            return true;
        }
        if attempt + 1 < attempts {
            thread::sleep(interval);
        }
    }
    false
}

// A failed kill still counts once the shim is gone: nothing was left to
// signal and delete can proceed.
fn runtime_call_kill_and_check(workdir: &Path, runtime: &str, id: &str) -> bool {
    if invoker::call_simple(
        workdir,
        runtime,
        "kill",
        &[],
        id,
        Some(invoker::kill_output_check),
    )
    .is_ok()
    {
        return true;
    }

    !shim::shim_alive(workdir)
}

fn option_from_path(path: &str) -> Option<String> {
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// The shim-based implementation of [`RuntimeOps`].
pub struct IsulaRuntime;

impl RuntimeOps for IsulaRuntime {
    fn create(&self, id: &str, runtime: &str, params: &CreateParams) -> Result<()> {
        let workdir = checked_join(&params.state, id)?;
        ensure_dir_with_mode(&workdir, SECURE_DIRECTORY_MODE).map_err(|err| {
            RuntimeError::WriteFailed(format!("mkdir {}: {}", workdir.display(), err))
        })?;

        let mut state = ProcessState::from_oci_process(&params.process);
        state.exit_fifo = option_from_path(&params.exit_fifo);
        state.open_tty = params.tty;
        state.open_stdin = params.open_stdin;
        state.isulad_stdin = params.stdin.clone();
        state.isulad_stdout = params.stdout.clone();
        state.isulad_stderr = params.stderr.clone();
        state.runtime_args = config::runtime_args(runtime);
        state.apply_annotations(&params.annotations);
        state.write_to(&workdir)?;

        let cmd = config::runtime_command(runtime)
            .ok_or_else(|| RuntimeError::ConfigMissing(runtime.to_string()))?;

        if let Err(err) = shim::shim_create(false, id, &workdir, &params.bundle, &cmd, -1) {
            error!("{}: failed create shim process", id);
            if let Err(delete_err) = invoker::call_delete_force(&workdir, runtime, id) {
                warn!("force delete after failed create: {}", delete_err);
            }
            return Err(err);
        }

        Ok(())
    }

    fn start(&self, id: &str, runtime: &str, params: &StartParams) -> Result<PidInfo> {
        let workdir = checked_join(&params.state, id)?;

        let result = (|| {
            let pid = shim::wait_container_pid(&workdir)?;

            let shim_pid = match shim::read_shim_pid(&workdir) {
                Some(shim_pid) if shim_pid > 0 => shim_pid,
                _ => {
                    error!("{}: failed to read isulad shim pid", id);
                    return Err(RuntimeError::ShimDead(workdir.display().to_string()));
                }
            };

            let start_time = proc::process_start_time(pid).ok_or_else(|| {
                error!("{}: failed to read pidinfo", id);
                RuntimeError::NotAlive(format!("container process {}", pid))
            })?;
            let pstart_time = proc::process_start_time(shim_pid).ok_or_else(|| {
                error!("{}: failed to read isulad shim pidinfo", id);
                RuntimeError::NotAlive(format!("shim process {}", shim_pid))
            })?;

            invoker::call_simple(&workdir, runtime, "start", &[], id, None)?;

            Ok(PidInfo {
                pid,
                start_time,
                ppid: shim_pid,
                pstart_time,
            })
        })();

        if result.is_err() {
            errlog::show_shim_runtime_errlog(&workdir);
            shim::shim_kill_force(&workdir);
        }
        result
    }

    fn restart(&self, _id: &str, _runtime: &str) -> Result<()> {
        error!(">>> restart not implemented");
        Err(RuntimeError::NotImplemented("restart"))
    }

    fn kill(&self, _id: &str, _runtime: &str, params: &KillParams) -> Result<()> {
        if params.pid < 0 {
            return Err(RuntimeError::BadArgument(format!(
                "negative pid {}",
                params.pid
            )));
        }

        if !proc::process_alive(params.pid, params.start_time) {
            // A stop is satisfied by an already-dead process; any other
            // signal has lost its target.
            if params.signal == params.stop_signal || params.signal == libc::SIGKILL as u32 {
                warn!("process {} is not alive", params.pid);
                return Ok(());
            }
            error!(
                "process (pid={}) is not alive, can not kill with signal {}",
                params.pid, params.signal
            );
            return Err(RuntimeError::NotAlive(format!("pid {}", params.pid)));
        }

        let signal = Signal::try_from(params.signal as i32).map_err(|_| {
            RuntimeError::BadArgument(format!("invalid signal {}", params.signal))
        })?;
        kill(Pid::from_raw(params.pid), signal).map_err(|errno| {
            error!(
                "can not kill process (pid={}) with signal {}: {}",
                params.pid, params.signal, errno
            );
            match errno {
                nix::errno::Errno::ESRCH => {
                    RuntimeError::NotAlive(format!("pid {}", params.pid))
                }
                _ => RuntimeError::BadArgument(format!(
                    "kill pid {} signal {}: {}",
                    params.pid, params.signal, errno
                )),
            }
        })
    }

    fn clean_resource(&self, id: &str, runtime: &str, params: &CleanParams) -> Result<()> {
        let workdir = checked_join(&params.statepath, id)?;

        if shim::shim_alive(&workdir) {
            shim::shim_kill_force(&workdir);
        }

        if !retry_call(10, Duration::from_millis(500), || {
            runtime_call_kill_and_check(&workdir, runtime, id)
        }) {
            warn!("call runtime force kill failed");
        }

        if !retry_call(10, Duration::from_millis(100), || {
            invoker::call_delete_force(&workdir, runtime, id).is_ok()
        }) {
            warn!("call runtime force delete failed");
        }

        remove_dir_recursive(&workdir).map_err(|err| {
            error!("failed rmdir -r shim workdir");
            RuntimeError::WriteFailed(format!("remove {}: {}", workdir.display(), err))
        })?;

        info!("rmdir -r {} done", workdir.display());
        Ok(())
    }

    fn rm(&self, id: &str, _runtime: &str, params: &RmParams) -> Result<()> {
        let libdir = checked_join(&params.rootpath, id)?;

        remove_dir_recursive(&libdir).map_err(|err| {
            error!("failed rmdir -r shim workdir");
            RuntimeError::WriteFailed(format!("remove {}: {}", libdir.display(), err))
        })?;

        info!("rmdir -r {} done", libdir.display());
        Ok(())
    }

    fn status(&self, id: &str, runtime: &str, params: &StatusParams) -> Result<RuntimeStatusInfo> {
        let workdir = checked_join(&params.state, id)?;

        if !shim::shim_alive(&workdir) {
            error!("shim dead {}", workdir.display());
            return Err(RuntimeError::ShimDead(workdir.display().to_string()));
        }

        invoker::call_state(&workdir, runtime, id)
    }

    fn stats(&self, id: &str, runtime: &str, params: &StatsParams) -> Result<RuntimeStatsInfo> {
        let workdir = checked_join(&params.state, id)?;

        if !shim::shim_alive(&workdir) {
            error!("shim dead {}", workdir.display());
            return Err(RuntimeError::ShimDead(workdir.display().to_string()));
        }

        invoker::call_events_stats(&workdir, runtime, id)
    }

    fn exec(&self, id: &str, runtime: &str, params: &ExecParams) -> Result<i32> {
        let bundle = checked_join(&params.rootpath, id)?;
        let exec_id = match &params.suffix {
            Some(suffix) => suffix.clone(),
            None => generate_exec_id(),
        };

        let workdir = checked_join(
            &params.state,
            &format!("{}/{}/{}", id, EXEC_SUBDIR, exec_id),
        )?;
        ensure_dir_with_mode(&workdir, SECURE_DIRECTORY_MODE).map_err(|err| {
            RuntimeError::WriteFailed(format!("mkdir {}: {}", workdir.display(), err))
        })?;

        let setup = (|| {
            let resize_fifo_path = workdir.join(RESIZE_FIFO_NAME);
            ensure_path_fits(&resize_fifo_path)?;
            mkfifo(&resize_fifo_path, Mode::from_bits_truncate(0o600)).map_err(|errno| {
                error!("failed create resize fifo file");
                RuntimeError::WriteFailed(format!(
                    "mkfifo {}: {}",
                    resize_fifo_path.display(),
                    errno
                ))
            })?;

            let mut state = ProcessState::from_oci_process(&params.process);
            state.exec = true;
            state.isulad_stdin = params.console_fifos[0].clone();
            state.isulad_stdout = params.console_fifos[1].clone();
            state.isulad_stderr = params.console_fifos[2].clone();
            state.resize_fifo = Some(resize_fifo_path.display().to_string());
            state.runtime_args = config::runtime_args(runtime);
            state.write_to(&workdir)?;

            config::runtime_command(runtime)
                .ok_or_else(|| RuntimeError::ConfigMissing(runtime.to_string()))
        })();

        let result = match setup {
            Ok(cmd) => {
                let run = (|| {
                    let exit_code = shim::shim_create(
                        fg_exec(params),
                        id,
                        &workdir,
                        &bundle.display().to_string(),
                        &cmd,
                        params.timeout,
                    )?;
                    shim::wait_container_pid(&workdir)?;
                    Ok(exit_code)
                })();
                if run.is_err() {
                    error!("{}: failed create shim process for exec {}", id, exec_id);
                    errlog::show_shim_runtime_errlog(&workdir);
                }
                run
            }
            Err(err) => Err(err),
        };

        if let Err(err) = remove_dir_recursive(&workdir) {
            error!("rmdir {} failed: {}", workdir.display(), err);
        }
        result
    }

    fn pause(&self, id: &str, runtime: &str, params: &PauseParams) -> Result<()> {
        let workdir = checked_join(&params.state, id)?;
        invoker::call_simple(&workdir, runtime, "pause", &[], id, None)
    }

    fn resume(&self, id: &str, runtime: &str, params: &ResumeParams) -> Result<()> {
        let workdir = checked_join(&params.state, id)?;
        invoker::call_simple(&workdir, runtime, "resume", &[], id, None)
    }

    fn update(&self, id: &str, runtime: &str, params: &UpdateParams) -> Result<()> {
        let update_dir = checked_join(&params.state, &format!("{}/{}", id, UPDATE_SUBDIR))?;
        ensure_dir_with_mode(&update_dir, SECURE_DIRECTORY_MODE).map_err(|err| {
            RuntimeError::WriteFailed(format!("mkdir {}: {}", update_dir.display(), err))
        })?;

        let result = (|| {
            let resources = CgroupResources::from_host_config(&params.host_config)?;
            let resources_path = resources.write_to(&update_dir)?;
            let resources_arg = resources_path.display().to_string();
            invoker::call_simple(
                &update_dir,
                runtime,
                "update",
                &["--resources", &resources_arg],
                id,
                Some(invoker::show_stderr),
            )
        })();

        if let Err(err) = remove_dir_recursive(&update_dir) {
            error!("rmdir {} failed: {}", update_dir.display(), err);
        }
        result
    }

    fn attach(&self, _id: &str, _runtime: &str, _params: &AttachParams) -> Result<()> {
        error!("isula attach not support on isulad-shim");
        errmsg::set_error_message("isula attach not support on isulad-shim");
        Err(RuntimeError::NotImplemented("attach"))
    }

    fn listpids(&self, _id: &str, _runtime: &str, _params: &ListPidsParams) -> Result<Vec<i32>> {
        error!("isula top/listpids not support on isulad-shim");
        errmsg::set_error_message("isula top/listpids not support on isulad-shim");
        Err(RuntimeError::NotImplemented("listpids"))
    }

    fn resize(&self, _id: &str, _runtime: &str, _params: &ResizeParams) -> Result<()> {
        error!("isula resize not support on isulad-shim");
        Err(RuntimeError::NotImplemented("resize"))
    }

    fn exec_resize(&self, id: &str, _runtime: &str, params: &ExecResizeParams) -> Result<()> {
        // CRI exec sessions carry no caller suffix and no resize channel.
        let suffix = match &params.suffix {
            Some(suffix) => suffix,
            None => {
                warn!("exec resize not support when isula not being used");
                return Ok(());
            }
        };

        let workdir = checked_join(
            &params.state,
            &format!("{}/{}/{}", id, EXEC_SUBDIR, suffix),
        )?;
        let fifo_path = workdir.join(RESIZE_FIFO_NAME);
        ensure_path_fits(&fifo_path)?;

        let data = format!("{} {}", params.width, params.height);
        let mut fifo = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&fifo_path)
            .map_err(|err| {
                error!("open exec resize fifo error");
                RuntimeError::WriteFailed(format!("open {}: {}", fifo_path.display(), err))
            })?;
        fifo.write_all(data.as_bytes()).map_err(|err| {
            error!("write exec resize data error");
            RuntimeError::WriteFailed(format!("write {}: {}", fifo_path.display(), err))
        })?;

        let pid = shim::wait_container_pid(&workdir)?;
        kill(Pid::from_raw(pid), Signal::SIGWINCH).map_err(|errno| {
            error!(
                "can't kill process (pid={}) with signal SIGWINCH: {}",
                pid, errno
            );
            RuntimeError::NotAlive(format!("pid {}", pid))
        })?;

        Ok(())
    }
}
