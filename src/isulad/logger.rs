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

//! Structured log sink behind the `log` facade.
//!
//! Renders one line per record, either `key=value` text or a JSON object,
//! with a millisecond UTC timestamp, the service name, the emitting module
//! and the daemon PID. Warnings and errors go to stderr, the rest to stdout.

use chrono::{SecondsFormat, Utc};
use log::{Level, LevelFilter, Metadata, Record};
use serde_json::Value;
#[cfg(not(test))]
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

const SERVICE_NAME: &str = "isulad";

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Text = 0,
    Json = 1,
}

static LOG_FORMAT: AtomicU8 = AtomicU8::new(LogFormat::Text as u8);

pub fn set_log_format(format: LogFormat) {
    LOG_FORMAT.store(format as u8, Ordering::Relaxed);
}

pub fn current_log_format() -> LogFormat {
    match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}

struct DaemonLogger;

static LOGGER: DaemonLogger = DaemonLogger;

impl log::Log for DaemonLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let component = record.module_path().unwrap_or("unknown");
        let message = record.args().to_string();

        let line = match current_log_format() {
            LogFormat::Text => {
                let mut line = String::new();
                push_field(&mut line, "ts", &timestamp);
                push_field(&mut line, "level", record.level().as_str());
                push_field(&mut line, "service", SERVICE_NAME);
                push_field(&mut line, "component", component);
                push_field(&mut line, "pid", &pid);
                push_field(&mut line, "msg", &message);
                line
            }
            LogFormat::Json => {
                let mut payload = serde_json::Map::new();
                payload.insert("ts".into(), Value::String(timestamp));
                payload.insert(
                    "level".into(),
                    Value::String(record.level().as_str().to_string()),
                );
                payload.insert("service".into(), Value::String(SERVICE_NAME.to_string()));
                payload.insert("component".into(), Value::String(component.to_string()));
                payload.insert("pid".into(), Value::String(pid));
                payload.insert("msg".into(), Value::String(message));
                Value::Object(payload).to_string()
            }
        };

        write_line(record.level(), &line);
    }

    fn flush(&self) {}
}

/// Installs the sink as the process logger. Later calls only adjust the
/// level filter; the first installed logger wins.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(not(test))]
fn write_line(level: Level, line: &str) {
    let write_result = if level <= Level::Warn {
        let mut stderr = io::stderr().lock();
        writeln!(stderr, "{}", line)
    } else {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)
    };

    if let Err(error) = write_result {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(
            stderr,
            "isulad: failed to write log line: {} (original: {})",
            error, line
        );
    }
}

#[cfg(test)]
fn write_line(level: Level, line: &str) {
    let store = test_log_store();
    let mut guard = store.lock().unwrap();
    guard.push((level, line.to_string()));
}

#[cfg(test)]
fn test_log_store() -> &'static Mutex<Vec<(Level, String)>> {
    static STORE: OnceLock<Mutex<Vec<(Level, String)>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(Vec::new()))
}

#[cfg(test)]
pub fn take_test_logs() -> Vec<(Level, String)> {
    let store = test_log_store();
    let mut guard = store.lock().unwrap();
    guard.drain(..).collect()
}
