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

//! Shim process descriptor.
//!
//! Projects the OCI process spec plus the daemon's I/O wiring into the
//! `process.json` record the shim reads on startup. The record is written
//! once per container (or exec session) and never mutated.

use super::ensure_path_fits;
use crate::isulad::runtime::error::{Result, RuntimeError};
use crate::isulad::runtime::OciProcess;
use crate::isulad::util::fs::{parse_byte_size, write_file_with_mode, SECURE_FILE_MODE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const PROCESS_JSON: &str = "process.json";

// Annotation keys carrying the container's log-rotation settings.
const LOG_CONFIG_KEY_FILE: &str = "log.file";
const LOG_CONFIG_KEY_ROTATE: &str = "log.rotate";
const LOG_CONFIG_KEY_SIZE: &str = "log.size";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessUser {
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessCapabilities {
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
pub struct ProcessRlimit {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub hard: u64,
    #[serde(default)]
    pub soft: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConsoleSize {
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub width: u32,
}

/// The record the shim deserializes from `process.json`. Field names are the
/// shim's wire schema; absent options are omitted entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessState {
    #[serde(default)]
    pub exec: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub open_tty: bool,
    #[serde(default)]
    pub open_stdin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ProcessUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ProcessCapabilities>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rlimits: Vec<ProcessRlimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_size: Option<ProcessConsoleSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i32>,
    #[serde(default)]
    pub no_new_privileges: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isulad_stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isulad_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isulad_stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_fifo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_fifo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_maxfile: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_maxsize: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_args: Vec<String>,
}

impl ProcessState {
    /// Copies the passthrough fields of an OCI process spec.
    pub fn from_oci_process(process: &OciProcess) -> Self {
        ProcessState {
            args: process.args.clone(),
            env: process.env.clone(),
            cwd: process.cwd.clone(),
            terminal: process.terminal,
            user: Some(ProcessUser {
                uid: process.user.uid,
                gid: process.user.gid,
                additional_gids: process.user.additional_gids.clone(),
            }),
            capabilities: process.capabilities.as_ref().map(|caps| ProcessCapabilities {
                bounding: caps.bounding.clone(),
                effective: caps.effective.clone(),
                inheritable: caps.inheritable.clone(),
                permitted: caps.permitted.clone(),
                ambient: caps.ambient.clone(),
            }),
            rlimits: process
                .rlimits
                .iter()
                .map(|limit| ProcessRlimit {
                    kind: limit.kind.clone(),
                    hard: limit.hard,
                    soft: limit.soft,
                })
                .collect(),
            console_size: process.console_size.as_ref().map(|size| ProcessConsoleSize {
                height: size.height,
                width: size.width,
            }),
            apparmor_profile: process.apparmor_profile.clone(),
            selinux_label: process.selinux_label.clone(),
            oom_score_adj: process.oom_score_adj,
            no_new_privileges: process.no_new_privileges,
            ..ProcessState::default()
        }
    }

    /// Picks the log-rotation hints out of the container annotations.
    /// Malformed values leave the corresponding default untouched.
    pub fn apply_annotations(&mut self, annotations: &HashMap<String, String>) {
        if let Some(path) = annotations.get(LOG_CONFIG_KEY_FILE) {
            self.log_path = Some(path.clone());
        }
        if let Some(rotate) = annotations.get(LOG_CONFIG_KEY_ROTATE) {
            match rotate.trim().parse::<i32>() {
                Ok(maxfile) if maxfile > 0 => self.log_maxfile = Some(maxfile),
                _ => {}
            }
        }
        if let Some(size) = annotations.get(LOG_CONFIG_KEY_SIZE) {
            match parse_byte_size(size) {
                Some(maxsize) if maxsize > 0 => self.log_maxsize = Some(maxsize),
                _ => {}
            }
        }
    }

    /// Serializes the record to `<workdir>/process.json`, mode 0600.
    pub fn write_to(&self, workdir: &Path) -> Result<()> {
        let path = workdir.join(PROCESS_JSON);
        ensure_path_fits(&path)?;

        let data = serde_json::to_vec(self)
            .map_err(|err| RuntimeError::SerializationFailed(format!("{}: {}", PROCESS_JSON, err)))?;

        write_file_with_mode(&path, &data, SECURE_FILE_MODE)
            .map_err(|err| RuntimeError::WriteFailed(format!("{}: {}", path.display(), err)))
    }
}
