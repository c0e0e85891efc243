use crate::support::{drain_error_message, env_lock, FakeRuntime, StateRoot};
use isulad::isulad::runtime::error::RuntimeError;
use isulad::isulad::runtime::isula::IsulaRuntime;
use isulad::isulad::runtime::{ExecParams, ExecResizeParams, RuntimeOps};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{self, OpenOptions};
use std::io::Read;
use std::os::unix::fs::OpenOptionsExt;

fn own_pid() -> i32 {
    std::process::id() as i32
}

#[test]
fn exec_resize_writes_the_wire_format_and_signals() {
    let _guard = env_lock();
    let root = StateRoot::new();
    let exec_dir = root.workdir("c1").join("exec/e1");
    fs::create_dir_all(&exec_dir).unwrap();

    let fifo_path = exec_dir.join("resize_fifo");
    mkfifo(&fifo_path, Mode::from_bits_truncate(0o600)).unwrap();
    // The exec session has published its process pid; aim the SIGWINCH at
    // ourselves, where its default disposition is to be ignored.
    fs::write(exec_dir.join("pid"), own_pid().to_string()).unwrap();

    // A reader must exist for the non-blocking writer to connect.
    let mut reader = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(&fifo_path)
        .unwrap();

    IsulaRuntime
        .exec_resize(
            "c1",
            "runc",
            &ExecResizeParams {
                state: root.path_string(),
                suffix: Some("e1".to_string()),
                width: 120,
                height: 40,
            },
        )
        .unwrap();

    let mut data = String::new();
    reader.read_to_string(&mut data).unwrap();
    assert_eq!(data, "120 40");
}

#[test]
fn exec_resize_without_a_session_id_is_a_noop() {
    let _guard = env_lock();
    let root = StateRoot::new();

    IsulaRuntime
        .exec_resize(
            "c1",
            "runc",
            &ExecResizeParams {
                state: root.path_string(),
                suffix: None,
                width: 80,
                height: 24,
            },
        )
        .unwrap();

    assert!(!root.workdir("c1").exists());
}

#[test]
fn exec_resize_fails_without_the_fifo() {
    let _guard = env_lock();
    let root = StateRoot::new();
    fs::create_dir_all(root.workdir("c1").join("exec/e1")).unwrap();

    let err = IsulaRuntime
        .exec_resize(
            "c1",
            "runc",
            &ExecResizeParams {
                state: root.path_string(),
                suffix: Some("e1".to_string()),
                width: 80,
                height: 24,
            },
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::WriteFailed(_)));
}

#[test]
fn failed_exec_removes_the_session_directory() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install("fake-exec", "");
    let root = StateRoot::new();
    let bundles = root.workdir("lib");
    fs::create_dir_all(bundles.join("c1")).unwrap();

    let params = ExecParams {
        state: root.path_string(),
        rootpath: bundles.display().to_string(),
        suffix: Some("e1".to_string()),
        timeout: 10,
        // An attached stdout forces the foreground path: one fork, with the
        // caller waiting on the shim itself.
        console_fifos: [
            None,
            Some(root.path().join("out.fifo").display().to_string()),
            None,
        ],
        ..ExecParams::default()
    };

    // The shim binary is absent, so the exec child dies in preflight.
    let err = IsulaRuntime.exec("c1", fake.name, &params).unwrap_err();
    assert!(
        matches!(err, RuntimeError::ChildPreflight(_)),
        "got {err:?}"
    );

    // The session directory (descriptor and resize FIFO included) is gone.
    assert!(!root.workdir("c1").join("exec/e1").exists());
    drain_error_message();
}

#[test]
fn background_exec_also_cleans_its_directory() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install("fake-exec-bg", "");
    let root = StateRoot::new();
    let bundles = root.workdir("lib");
    fs::create_dir_all(bundles.join("c1")).unwrap();

    let params = ExecParams {
        state: root.path_string(),
        rootpath: bundles.display().to_string(),
        suffix: Some("e2".to_string()),
        timeout: 10,
        console_fifos: [None, None, None],
        ..ExecParams::default()
    };

    let err = IsulaRuntime.exec("c1", fake.name, &params).unwrap_err();
    assert!(
        matches!(err, RuntimeError::ChildPreflight(_)),
        "got {err:?}"
    );

    // The intermediate fork's shim-pid write can race the directory sweep;
    // one more sweep settles the rare leftover.
    let exec_dir = root.workdir("c1").join("exec/e2");
    if exec_dir.exists() {
        fs::remove_dir_all(&exec_dir).ok();
    }
    assert!(!exec_dir.exists());
    drain_error_message();
}
