use crate::support::{drain_error_message, env_lock, FakeRuntime, StateRoot, DEAD_PID};
use isulad::isulad::runtime::error::RuntimeError;
use isulad::isulad::runtime::isula::IsulaRuntime;
use isulad::isulad::runtime::{
    CleanParams, CreateParams, RmParams, RuntimeOps, StartParams,
};
use std::fs;
use std::process::{Child, Command, Stdio};

fn spawn_sleeper() -> Child {
    Command::new("sleep")
        .arg("30")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn sleeper")
}

#[test]
fn rm_is_idempotent() {
    let _guard = env_lock();
    let root = StateRoot::new();
    let libdir = root.workdir("c1");
    fs::create_dir_all(libdir.join("nested")).unwrap();
    fs::write(libdir.join("nested/config.json"), b"{}").unwrap();

    let ops = IsulaRuntime;
    let params = RmParams {
        rootpath: root.path_string(),
    };
    ops.rm("c1", "runc", &params).unwrap();
    assert!(!libdir.exists());

    // A second removal of the now-missing directory is still a success.
    ops.rm("c1", "runc", &params).unwrap();
}

#[test]
fn clean_resource_removes_the_workdir() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install(
        "fake-clean",
        r#"case "$1" in
  kill) echo "container does not exist" >&2; exit 1 ;;
esac"#,
    );
    let root = StateRoot::new();
    let workdir = root.seed_workdir("c1", DEAD_PID);
    fs::write(workdir.join("process.json"), b"{}").unwrap();

    let ops = IsulaRuntime;
    ops.clean_resource(
        "c1",
        fake.name,
        &CleanParams {
            statepath: root.path_string(),
        },
    )
    .unwrap();

    assert!(!workdir.exists());

    let calls = fake.calls();
    // The kill argv ends with the literal signal number, delete with the id.
    assert!(
        calls.iter().any(|line| line == "kill c1 9"),
        "kill call missing: {calls:?}"
    );
    assert!(
        calls.iter().any(|line| line == "delete --force c1"),
        "delete call missing: {calls:?}"
    );
}

#[test]
fn clean_resource_of_a_missing_workdir_succeeds() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install(
        "fake-clean-missing",
        r#"case "$1" in
  kill) echo "container does not exist" >&2; exit 1 ;;
esac"#,
    );
    let root = StateRoot::new();

    IsulaRuntime
        .clean_resource(
            "gone",
            fake.name,
            &CleanParams {
                statepath: root.path_string(),
            },
        )
        .unwrap();
    assert!(!root.workdir("gone").exists());
}

#[test]
fn create_surfaces_the_shim_preflight_error() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install("fake-create", "");
    let root = StateRoot::new();
    let bundle = root.workdir("bundles");
    fs::create_dir_all(&bundle).unwrap();

    let params = CreateParams {
        bundle: bundle.display().to_string(),
        state: root.path_string(),
        exit_fifo: format!("{}/exit_fifo", root.workdir("c1").display()),
        ..CreateParams::default()
    };

    // isulad-shim is not on the test PATH, so the detached child fails in
    // its pre-exec window and reports through the preflight pipe.
    let err = IsulaRuntime
        .create("c1", fake.name, &params)
        .unwrap_err();
    match &err {
        RuntimeError::ChildPreflight(text) => {
            assert!(text.contains("exec failed"), "unexpected preflight: {text}")
        }
        other => panic!("expected ChildPreflight, got {other:?}"),
    }

    // The work directory survives for post-mortem: descriptor written, the
    // intermediate fork recorded the (now dead) shim pid. The pid write
    // races the preflight report by a few microseconds.
    let workdir = root.workdir("c1");
    assert!(workdir.join("process.json").exists());
    for _ in 0..50 {
        if workdir.join("shim-pid").exists() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(workdir.join("shim-pid").exists());

    // The failed create rolled back through runtime delete --force.
    assert!(
        fake.calls()
            .iter()
            .any(|line| line == "delete --force c1"),
        "rollback delete missing: {:?}",
        fake.calls()
    );

    // Secondary diagnostics were parked for the service layer.
    assert!(drain_error_message().is_some());
}

#[test]
fn start_reports_pids_and_scrubs_the_notify_socket() {
    let _guard = env_lock();
    drain_error_message();

    let mut sleeper = spawn_sleeper();
    let shim_pid = sleeper.id() as i32;

    let root = StateRoot::new();
    let marker = root.path().join("notify-scrubbed");
    let body = format!(
        r#"if [ "$1" = "start" ] && [ -z "$NOTIFY_SOCKET" ]; then
  echo scrubbed >> {}
fi"#,
        marker.display()
    );
    let fake = FakeRuntime::install("fake-start", &body);
    let workdir = root.seed_workdir("c1", shim_pid);
    fs::write(workdir.join("pid"), shim_pid.to_string()).unwrap();

    std::env::set_var("NOTIFY_SOCKET", "/run/systemd/notify");
    let result = IsulaRuntime.start(
        "c1",
        fake.name,
        &StartParams {
            state: root.path_string(),
        },
    );
    std::env::remove_var("NOTIFY_SOCKET");

    let pid_info = result.unwrap();
    assert_eq!(pid_info.pid, shim_pid);
    assert_eq!(pid_info.ppid, shim_pid);
    assert_eq!(pid_info.start_time, pid_info.pstart_time);
    assert!(pid_info.start_time > 0);

    assert!(
        fake.calls().iter().any(|line| line == "start c1"),
        "start call missing: {:?}",
        fake.calls()
    );
    assert!(marker.exists(), "NOTIFY_SOCKET leaked into the runtime call");

    let _ = sleeper.kill();
    let _ = sleeper.wait();
}

#[test]
fn failure_diagnostics_order_runtime_log_before_shim_log() {
    let _guard = env_lock();
    drain_error_message();
    let root = StateRoot::new();
    let workdir = root.seed_workdir("c1", DEAD_PID);

    // Both collaborators left diagnostics behind; the folded message quotes
    // the runtime log first, then the shim log.
    let runtime_line = r#"{"level":"error","msg":"runtime side failure"}"#;
    let shim_line = r#"{"level":"error","msg":"shim side failure"}"#;
    fs::write(workdir.join("log.json"), format!("{}\n", runtime_line)).unwrap();
    fs::write(workdir.join("shim-log.json"), format!("{}\n", shim_line)).unwrap();

    let err = IsulaRuntime
        .start(
            "c1",
            "runc",
            &StartParams {
                state: root.path_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ShimDead(_)), "got {err:?}");

    let message = drain_error_message().expect("diagnostics parked");
    assert_eq!(
        message,
        format!(
            "runtime-log error: {}\n\nshim-log error: {}\n\n",
            runtime_line, shim_line
        )
    );
}

#[test]
fn start_fails_and_kills_the_shim_when_it_died_early() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install("fake-start-dead", "");
    let root = StateRoot::new();
    // shim-pid points at a dead process and no container pid ever appears.
    root.seed_workdir("c1", DEAD_PID);

    let err = IsulaRuntime
        .start(
            "c1",
            fake.name,
            &StartParams {
                state: root.path_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ShimDead(_)), "got {err:?}");
    assert!(fake.calls().is_empty(), "runtime must not have been invoked");
    assert!(drain_error_message().is_some());
}
