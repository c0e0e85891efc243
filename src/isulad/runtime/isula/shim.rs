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

//! Shim supervision.
//!
//! Launches one detached `isulad-shim` per container, tracks its liveness
//! through the `shim-pid` file, and waits for the container init PID the
//! shim publishes. The background launch double-forks: an intermediate
//! process records the shim's PID and exits so the shim reparents to init
//! and the daemon's wait returns immediately. A foreground launch (exec
//! with attached I/O) forks once so the caller can collect the shim's own
//! exit status.
//!
//! Children report pre-exec failures over a close-on-exec pipe; EOF without
//! payload is the success signal.

use super::errlog;
use crate::isulad::runtime::error::{Result, RuntimeError};
use crate::isulad::util::errmsg;
use crate::isulad::util::fs::{read_pid_file, write_pid_file};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::CString;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

pub const SHIM_BINARY: &str = "isulad-shim";
pub const SHIM_PID_FILE: &str = "shim-pid";
pub const INIT_PID_FILE: &str = "pid";

// Fixed trailing shim arguments: log level and exit-FIFO write timeout.
const SHIM_LOG_LEVEL: &str = "info";
const SHIM_EXIT_TIMEOUT: &str = "2m0s";

/// Cap on waiting for the shim to publish the container init PID.
const PID_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const EXIT_SIGNAL_OFFSET: i32 = 128;

/// Reads the supervising shim's PID recorded under `workdir`.
pub fn read_shim_pid(workdir: &Path) -> Option<i32> {
    read_pid_file(&workdir.join(SHIM_PID_FILE))
}

/// True iff `shim-pid` names a process that still accepts signal 0.
pub fn shim_alive(workdir: &Path) -> bool {
    let pid = match read_shim_pid(workdir) {
        Some(pid) if pid > 0 => pid,
        _ => {
            error!("failed read shim-pid file under {}", workdir.display());
            return false;
        }
    };

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(errno) => {
            info!("kill 0 shim-pid with error: {}", errno);
            false
        }
    }
}

/// Best-effort SIGKILL of the recorded shim; silent when no PID was written.
pub fn shim_kill_force(workdir: &Path) {
    if let Some(pid) = read_shim_pid(workdir) {
        if pid > 0 {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    info!("kill shim force {}", workdir.display());
}

/// Polls for the container init PID the shim writes to `<workdir>/pid`.
///
/// Fails fast once the shim is gone; a crashed shim will never publish a
/// PID. Total wait is capped on the monotonic clock.
pub fn wait_container_pid(workdir: &Path) -> Result<i32> {
    let pid_path = workdir.join(INIT_PID_FILE);
    let deadline = Instant::now() + PID_WAIT_TIMEOUT;

    loop {
        if Instant::now() >= deadline {
            error!("wait container process pid timeout {}", workdir.display());
            return Err(RuntimeError::Timeout(format!(
                "wait container process pid under {}",
                workdir.display()
            )));
        }

        if let Some(pid) = read_pid_file(&pid_path) {
            if pid != 0 {
                return Ok(pid);
            }
        }

        if !shim_alive(workdir) {
            error!("failed read pid from dead shim {}", workdir.display());
            return Err(RuntimeError::ShimDead(workdir.display().to_string()));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn status_to_exit_code(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => EXIT_SIGNAL_OFFSET + signal as i32,
        _ => -1,
    }
}

fn build_shim_argv(id: &str, bundle: &str, runtime_cmd: &str) -> Result<Vec<CString>> {
    [
        SHIM_BINARY,
        id,
        bundle,
        runtime_cmd,
        SHIM_LOG_LEVEL,
        SHIM_EXIT_TIMEOUT,
    ]
    .iter()
    .map(|arg| {
        CString::new(*arg)
            .map_err(|_| RuntimeError::BadArgument(format!("NUL byte in shim argument {:?}", arg)))
    })
    .collect()
}

// One read is enough: children either write a short diagnostic and exit, or
// exec and let close-on-exec deliver EOF.
fn read_preflight(fd: OwnedFd) -> String {
    let mut pipe = File::from(fd);
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf) {
            Ok(count) => return String::from_utf8_lossy(&buf[..count]).into_owned(),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return String::new(),
        }
    }
}

fn wait_shim_exit(child: Pid, timeout: i64) -> Result<WaitStatus> {
    if timeout <= 0 {
        loop {
            match waitpid(child, None) {
                Ok(status) => return Ok(status),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    return Err(RuntimeError::WaitFailed(format!(
                        "waitpid {}: {}",
                        child, errno
                    )))
                }
            }
        }
    }

    let deadline = Instant::now() + Duration::from_secs(timeout as u64);
    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                return Err(RuntimeError::WaitFailed(format!(
                    "waitpid {}: {}",
                    child, errno
                )))
            }
        }

        if Instant::now() >= deadline {
            let _ = kill(child, Signal::SIGKILL);
            let mut reaped = false;
            for _ in 0..5 {
                if !matches!(
                    waitpid(child, Some(WaitPidFlag::WNOHANG)),
                    Ok(WaitStatus::StillAlive)
                ) {
                    reaped = true;
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
            if !reaped {
                warn!("fail to wait isulad-shim {}", child);
            }
            errmsg::set_error_message("Exec container error;exec timeout");
            return Err(RuntimeError::Timeout(format!(
                "wait shim parent {} exceeded {}s",
                child, timeout
            )));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn close_inherited_fds(keep: RawFd) {
    let fds: Vec<RawFd> = match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .flatten()
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| name.parse::<RawFd>().ok())
            })
            .collect(),
        Err(_) => (3..1024).collect(),
    };

    for fd in fds {
        if fd > 2 && fd != keep {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

fn child_fail(pipe_write: &OwnedFd, message: String) -> ! {
    let _ = unistd::write(pipe_write, message.as_bytes());
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

// Runs in the forked child; never returns. In background mode this is the
// intermediate process that records the shim PID, in foreground mode it is
// the shim itself.
fn shim_child_main(
    fg: bool,
    id: &str,
    workdir: &Path,
    argv: &[CString],
    pipe_read: OwnedFd,
    pipe_write: OwnedFd,
) -> ! {
    if let Err(errno) = unistd::chdir(workdir) {
        child_fail(
            &pipe_write,
            format!("{}: failed chdir to {}: {}", id, workdir.display(), errno),
        );
    }

    if !fg {
        // runc create stalls on a leaked daemon notify socket.
        std::env::remove_var("NOTIFY_SOCKET");

        match unsafe { unistd::fork() } {
            Ok(ForkResult::Parent { child }) => {
                let shim_pid_path = workdir.join(SHIM_PID_FILE);
                if let Err(err) = write_pid_file(&shim_pid_path, child.as_raw()) {
                    let _ = unistd::write(
                        &pipe_write,
                        format!(
                            "{}: write {} with {} failed: {}",
                            id,
                            shim_pid_path.display(),
                            child,
                            err
                        )
                        .as_bytes(),
                    );
                }
                unsafe { libc::_exit(libc::EXIT_SUCCESS) }
            }
            Ok(ForkResult::Child) => {}
            Err(errno) => child_fail(
                &pipe_write,
                format!("{}: fork shim-process failed {}", id, errno),
            ),
        }
    }

    // The shim process from here on.
    drop(pipe_read);

    if let Err(errno) = unistd::setsid() {
        child_fail(
            &pipe_write,
            format!(
                "{}: failed setsid for process {}: {}",
                id,
                std::process::id(),
                errno
            ),
        );
    }

    close_inherited_fds(pipe_write.as_raw_fd());

    match unistd::execvp(&argv[0], argv) {
        Ok(infallible) => match infallible {},
        Err(errno) => child_fail(&pipe_write, format!("exec failed: {}", errno)),
    }
}

/// Launches the shim for `id` from `workdir` and waits for the forked child
/// with `timeout` (non-positive blocks indefinitely). Returns the waited
/// child's mapped exit code: the shim's own in foreground mode, the
/// intermediate process's (zero) in background mode.
///
/// On success in background mode `shim-pid` names a live, session-detached
/// shim that has become the container's reaper.
pub fn shim_create(
    fg: bool,
    id: &str,
    workdir: &Path,
    bundle: &str,
    runtime_cmd: &str,
    timeout: i64,
) -> Result<i32> {
    let argv = build_shim_argv(id, bundle, runtime_cmd)?;
    debug!(
        "shim call params {} {} {} {} {} {}",
        SHIM_BINARY, id, bundle, runtime_cmd, SHIM_LOG_LEVEL, SHIM_EXIT_TIMEOUT
    );

    let (pipe_read, pipe_write) = unistd::pipe2(OFlag::O_CLOEXEC)
        .map_err(|errno| RuntimeError::ForkFailed(format!("create preflight pipe: {}", errno)))?;

    let child = match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { child }) => child,
        Ok(ForkResult::Child) => shim_child_main(fg, id, workdir, &argv, pipe_read, pipe_write),
        Err(errno) => {
            return Err(RuntimeError::ForkFailed(format!(
                "fork shim parent: {}",
                errno
            )))
        }
    };

    drop(pipe_write);
    let result = (|| {
        let preflight = read_preflight(pipe_read);
        if !preflight.is_empty() {
            error!("exec failed: {}", preflight);
            return Err(RuntimeError::ChildPreflight(preflight));
        }

        wait_shim_exit(child, timeout).map(status_to_exit_code)
    })();

    if result.is_err() {
        errlog::show_shim_runtime_errlog(workdir);
        if timeout <= 0 {
            // Redundant once the wait has failed; the child is normally
            // already gone. Retained from the original teardown order.
            let _ = kill(child, Signal::SIGKILL);
        }
    }

    result
}
