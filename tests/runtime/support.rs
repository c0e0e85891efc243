#![allow(dead_code)]

use isulad::isulad::config::{self, DaemonConfig, RuntimeConfig};
use isulad::isulad::util::errmsg;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use tempfile::TempDir;

/// The configuration snapshot, the error-message buffer and the process
/// environment are process-global; every test serializes on this lock.
pub fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A scripted stand-in for an OCI runtime binary. Every invocation appends
/// its argv to a log; the test-provided body decides output and exit
/// status per subcommand.
pub struct FakeRuntime {
    pub name: &'static str,
    dir: TempDir,
    pub argv_log: PathBuf,
}

impl FakeRuntime {
    /// Writes the runtime script and installs it in the daemon config under
    /// `name`. `body` is spliced in after the argv-recording line.
    pub fn install(name: &'static str, body: &str) -> Self {
        let dir = TempDir::new().expect("fake runtime tempdir");
        let argv_log = dir.path().join("argv.log");
        let bin = dir.path().join(name);

        let script = format!(
            "#!/bin/sh\necho \"$@\" >> {}\n{}\nexit 0\n",
            argv_log.display(),
            body
        );
        fs::write(&bin, script).expect("write fake runtime script");
        let mut perms = fs::metadata(&bin).expect("fake runtime metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&bin, perms).expect("chmod fake runtime script");

        let mut runtimes = HashMap::new();
        runtimes.insert(
            name.to_string(),
            RuntimeConfig {
                path: bin.display().to_string(),
                runtime_args: Vec::new(),
            },
        );
        config::overwrite_config(DaemonConfig { runtimes });

        Self {
            name,
            dir,
            argv_log,
        }
    }

    /// One recorded argv line per runtime invocation, in call order.
    pub fn calls(&self) -> Vec<String> {
        match fs::read_to_string(&self.argv_log) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// A state root holding per-container work directories.
pub struct StateRoot {
    dir: TempDir,
}

impl StateRoot {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("state root tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_string(&self) -> String {
        self.dir.path().display().to_string()
    }

    pub fn workdir(&self, id: &str) -> PathBuf {
        self.dir.path().join(id)
    }

    /// Prepares `<root>/<id>` with a `shim-pid` file, as the create path
    /// would have left it.
    pub fn seed_workdir(&self, id: &str, shim_pid: i32) -> PathBuf {
        let workdir = self.workdir(id);
        fs::create_dir_all(&workdir).expect("seed workdir");
        fs::write(workdir.join("shim-pid"), shim_pid.to_string()).expect("seed shim-pid");
        workdir
    }
}

/// Drains any diagnostics a previous failure parked in the daemon error
/// buffer so tests observe only their own.
pub fn drain_error_message() -> Option<String> {
    errmsg::take_error_message()
}

/// A PID no live process on a default kernel can hold, paired with an
/// arbitrary start time.
pub const DEAD_PID: i32 = 2_000_000_000;
