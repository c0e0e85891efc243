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

use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// File mode for state files the daemon writes (`process.json`, pid files).
pub const SECURE_FILE_MODE: u32 = 0o600;

/// Directory mode for per-container state directories.
pub const SECURE_DIRECTORY_MODE: u32 = 0o700;

/// Writes `data` to `path`, creating or truncating the file with `mode`.
pub fn write_file_with_mode(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(data)?;
    // The mode option only applies on creation; pin it for pre-existing files.
    file.set_permissions(Permissions::from_mode(mode))?;
    Ok(())
}

/// Creates `path` and any missing parents, then pins `mode` on the leaf.
pub fn ensure_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, Permissions::from_mode(mode))
}

pub fn write_pid_file(path: &Path, pid: i32) -> io::Result<()> {
    write_file_with_mode(path, pid.to_string().as_bytes(), SECURE_FILE_MODE)
}

/// Reads an ASCII decimal PID from `path`. Missing or malformed files yield
/// `None` rather than an error; callers treat both as "no PID recorded yet".
pub fn read_pid_file(path: &Path) -> Option<i32> {
    let text = fs::read_to_string(path).ok()?;
    text.trim().parse::<i32>().ok()
}

/// Removes a directory tree. A path that is already gone counts as success.
pub fn remove_dir_recursive(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Parses a byte-size string such as `"10k"`, `"512M"` or `"1gib"` into a
/// byte count. Suffixes are powers of 1024; a bare number is taken as bytes.
pub fn parse_byte_size(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(digits_end);
    let value = digits.parse::<i64>().ok()?;

    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 0u32,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        "t" | "tb" | "tib" => 40,
        "p" | "pb" | "pib" => 50,
        _ => return None,
    };

    value.checked_mul(1i64.checked_shl(shift)?)
}
