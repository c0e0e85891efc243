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

use std::error::Error;
use std::fmt;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// The failure modes of the runtime adapter layer.
#[derive(Debug)]
pub enum RuntimeError {
    /// No binary could be resolved for the named runtime.
    ConfigMissing(String),
    BadArgument(String),
    /// A state path would exceed the platform path limit.
    PathTooLong(String),
    SerializationFailed(String),
    WriteFailed(String),
    ForkFailed(String),
    ExecFailed(String),
    /// A forked child reported a pre-exec failure over the preflight pipe.
    ChildPreflight(String),
    Timeout(String),
    WaitFailed(String),
    /// The OCI runtime binary exited nonzero; carries its stderr verbatim.
    RuntimeCallFailed { subcmd: String, stderr: String },
    ParseFailed(String),
    /// The per-container shim is gone; the operation needs a live one.
    ShimDead(String),
    /// The target process is not (or no longer) the recorded one.
    NotAlive(String),
    NotImplemented(&'static str),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::ConfigMissing(runtime) => {
                write!(f, "missing match runtime config for {}", runtime)
            }
            RuntimeError::BadArgument(detail) => write!(f, "invalid argument: {}", detail),
            RuntimeError::PathTooLong(path) => write!(f, "path too long: {}", path),
            RuntimeError::SerializationFailed(detail) => {
                write!(f, "failed to generate json: {}", detail)
            }
            RuntimeError::WriteFailed(detail) => write!(f, "failed to write: {}", detail),
            RuntimeError::ForkFailed(detail) => write!(f, "failed to fork: {}", detail),
            RuntimeError::ExecFailed(detail) => write!(f, "failed to exec: {}", detail),
            RuntimeError::ChildPreflight(text) => write!(f, "child preflight error: {}", text),
            RuntimeError::Timeout(detail) => write!(f, "timed out: {}", detail),
            RuntimeError::WaitFailed(detail) => write!(f, "failed to wait: {}", detail),
            RuntimeError::RuntimeCallFailed { subcmd, stderr } => {
                write!(f, "runtime {} call failed: {}", subcmd, stderr)
            }
            RuntimeError::ParseFailed(detail) => write!(f, "failed to parse: {}", detail),
            RuntimeError::ShimDead(workdir) => write!(f, "shim dead {}", workdir),
            RuntimeError::NotAlive(detail) => write!(f, "process not alive: {}", detail),
            RuntimeError::NotImplemented(op) => write!(f, "{} not implemented", op),
        }
    }
}

impl Error for RuntimeError {}
