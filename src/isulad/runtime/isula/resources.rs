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

//! Cgroup resources payload for `<runtime> update --resources`.

use super::ensure_path_fits;
use crate::isulad::runtime::error::{Result, RuntimeError};
use crate::isulad::runtime::HostConfig;
use crate::isulad::util::fs::{write_file_with_mode, SECURE_FILE_MODE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RESOURCES_JSON: &str = "resources.json";

// Period used when --cpus is expressed through nano_cpus: 0.1 s in µs.
const NANO_CPU_PERIOD: i64 = 100_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockIoResources {
    #[serde(default)]
    pub weight: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuResources {
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub period: u64,
    #[serde(default)]
    pub quota: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mems: Option<String>,
    #[serde(default)]
    pub realtime_period: i64,
    #[serde(default)]
    pub realtime_runtime: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryResources {
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub swap: u64,
    #[serde(default)]
    pub reservation: u64,
    #[serde(default)]
    pub kernel: u64,
}

/// The document handed to the OCI runtime on `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CgroupResources {
    #[serde(default)]
    pub block_io: BlockIoResources,
    #[serde(default)]
    pub cpu: CpuResources,
    #[serde(default)]
    pub memory: MemoryResources,
}

impl CgroupResources {
    /// Projects the service layer's host configuration into the runtime's
    /// resource schema. When `nano_cpus` is set it wins over any explicit
    /// period/quota pair.
    pub fn from_host_config(host_config: &HostConfig) -> Result<Self> {
        let mut resources = CgroupResources {
            block_io: BlockIoResources {
                weight: host_config.blkio_weight,
            },
            cpu: CpuResources {
                shares: host_config.cpu_shares.max(0) as u64,
                period: host_config.cpu_period.max(0) as u64,
                quota: host_config.cpu_quota,
                cpus: host_config.cpuset_cpus.clone(),
                mems: host_config.cpuset_mems.clone(),
                realtime_period: host_config.cpu_realtime_period,
                realtime_runtime: host_config.cpu_realtime_runtime,
            },
            memory: MemoryResources {
                limit: host_config.memory.max(0) as u64,
                swap: host_config.memory_swap.max(0) as u64,
                reservation: host_config.memory_reservation.max(0) as u64,
                kernel: host_config.kernel_memory.max(0) as u64,
            },
        };

        // --cpus=n arrives as nano_cpus = n * 1e9; pin the period to 0.1 s
        // and size the quota so the container can occupy n CPUs.
        if host_config.nano_cpus > 0 {
            let cpus = host_config.nano_cpus as f64 / 1e9;
            if cpus > (i64::MAX / NANO_CPU_PERIOD) as f64 {
                return Err(RuntimeError::BadArgument("overflow of quota".to_string()));
            }
            resources.cpu.period = NANO_CPU_PERIOD as u64;
            resources.cpu.quota = (cpus * NANO_CPU_PERIOD as f64) as i64;
        }

        Ok(resources)
    }

    /// Serializes the payload to `<dir>/resources.json`, mode 0600, and
    /// returns the file path for the runtime's `--resources` option.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(RESOURCES_JSON);
        ensure_path_fits(&path)?;

        let data = serde_json::to_vec(self).map_err(|err| {
            RuntimeError::SerializationFailed(format!("{}: {}", RESOURCES_JSON, err))
        })?;

        write_file_with_mode(&path, &data, SECURE_FILE_MODE)
            .map_err(|err| RuntimeError::WriteFailed(format!("{}: {}", path.display(), err)))?;
        Ok(path)
    }
}
