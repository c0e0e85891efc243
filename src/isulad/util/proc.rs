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

use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;

// In /proc/<pid>/stat, starttime is field 22; 19 fields remain after the
// (possibly space-containing) comm field.
const STAT_STARTTIME_OFFSET: usize = 19;

/// Reads the kernel start time (clock ticks since boot) of `pid`.
///
/// The pair (pid, start time) identifies a process across PID reuse: a
/// recycled PID gets a fresh start time.
pub fn process_start_time(pid: i32) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces and parentheses; skip past its closing paren.
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.split_whitespace()
        .nth(STAT_STARTTIME_OFFSET)?
        .parse::<u64>()
        .ok()
}

/// Returns true iff `pid` is alive and still the process recorded at
/// `start_time`.
pub fn process_alive(pid: i32, start_time: u64) -> bool {
    if pid <= 0 || kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    process_start_time(pid) == Some(start_time)
}
