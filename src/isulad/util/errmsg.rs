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

//! Daemon-level error message buffer.
//!
//! Lifecycle operations deposit their user-visible diagnostics here; the
//! service layer drains the buffer when it builds a response. Writers that
//! merely scrape secondary diagnostics check `error_message_is_set` first so
//! a pending root cause is not overwritten.

use std::sync::{Mutex, MutexGuard, OnceLock};

fn buffer() -> &'static Mutex<Option<String>> {
    static BUFFER: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    BUFFER.get_or_init(|| Mutex::new(None))
}

fn lock() -> MutexGuard<'static, Option<String>> {
    buffer()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Records `message` as the pending user-visible error, replacing any
/// previous one.
pub fn set_error_message(message: impl Into<String>) {
    *lock() = Some(message.into());
}

/// True iff a message is pending.
pub fn error_message_is_set() -> bool {
    lock().is_some()
}

/// Removes and returns the pending message, if any.
pub fn take_error_message() -> Option<String> {
    lock().take()
}
