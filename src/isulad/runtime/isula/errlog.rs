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

//! Post-mortem scraping of shim and runtime diagnostic logs.
//!
//! Both the shim and the OCI runtime append line-delimited JSON logs into
//! the container work directory. When an operation fails, the first few
//! error lines of each are folded into the user-visible error message.

use crate::isulad::util::errmsg;
use log::error;
use std::fs;
use std::path::Path;

const SHIM_LOG_FILE: &str = "shim-log.json";
const RUNTIME_LOG_FILE: &str = "log.json";

// Keeping only the leading error lines bounds the message; the first errors
// name the root cause, later ones repeat it.
const MAX_ERROR_LINES: usize = 3;

/// Collects up to three `error`-bearing lines from `<workdir>/<file>`.
/// Missing or unreadable logs yield an empty string.
fn get_err_message(workdir: &Path, file: &str) -> String {
    let content = match fs::read_to_string(workdir.join(file)) {
        Ok(content) => content,
        Err(_) => return String::new(),
    };

    let mut message = String::new();
    let mut count = 0;
    for line in content.lines() {
        if !line.to_ascii_lowercase().contains("error") {
            continue;
        }
        message.push_str(line);
        message.push('\n');
        count += 1;
        if count == MAX_ERROR_LINES {
            break;
        }
    }
    message
}

/// Folds runtime and shim error lines, in that order, into the daemon error
/// buffer, unless an operation already recorded its primary failure there.
pub fn show_shim_runtime_errlog(workdir: &Path) {
    if errmsg::error_message_is_set() {
        return;
    }

    let runtime_errors = get_err_message(workdir, RUNTIME_LOG_FILE);
    let shim_errors = get_err_message(workdir, SHIM_LOG_FILE);
    error!("runtime-log: {}", runtime_errors);
    error!("shim-log: {}", shim_errors);
    errmsg::set_error_message(format!(
        "runtime-log error: {}\nshim-log error: {}\n",
        runtime_errors, shim_errors
    ));
}
