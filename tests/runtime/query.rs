use crate::support::{drain_error_message, env_lock, FakeRuntime, StateRoot};
use isulad::isulad::runtime::error::RuntimeError;
use isulad::isulad::runtime::isula::IsulaRuntime;
use isulad::isulad::runtime::{
    ContainerStatus, HostConfig, PauseParams, ResumeParams, RuntimeOps, StatsParams, StatusParams,
    UpdateParams,
};
use serde_json::Value;
use std::fs;

fn own_pid() -> i32 {
    std::process::id() as i32
}

#[test]
fn status_parses_the_runtime_state_document() {
    let _guard = env_lock();
    let fake = FakeRuntime::install(
        "fake-status",
        r#"if [ "$1" = "state" ]; then
  echo '{"ociVersion":"1.0.2","id":"c1","status":"running","pid":1234,"bundle":"/b"}'
fi"#,
    );
    let root = StateRoot::new();
    root.seed_workdir("c1", own_pid());

    let status = IsulaRuntime
        .status(
            "c1",
            fake.name,
            &StatusParams {
                state: root.path_string(),
            },
        )
        .unwrap();

    assert_eq!(status.status, ContainerStatus::Running);
    assert_eq!(status.pid, Some(1234));
    assert!(
        fake.calls().iter().any(|line| line == "state c1"),
        "state call missing: {:?}",
        fake.calls()
    );
}

#[test]
fn status_and_stats_refuse_a_dead_shim() {
    let _guard = env_lock();
    let fake = FakeRuntime::install("fake-dead", "");
    let root = StateRoot::new();
    // Work directory exists but no shim-pid was ever written.
    fs::create_dir_all(root.workdir("c1")).unwrap();

    let status_err = IsulaRuntime
        .status(
            "c1",
            fake.name,
            &StatusParams {
                state: root.path_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(status_err, RuntimeError::ShimDead(_)));

    let stats_err = IsulaRuntime
        .stats(
            "c1",
            fake.name,
            &StatsParams {
                state: root.path_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(stats_err, RuntimeError::ShimDead(_)));

    // The gate fires before any runtime invocation.
    assert!(fake.calls().is_empty(), "calls: {:?}", fake.calls());
}

#[test]
fn stats_extracts_the_usage_counters() {
    let _guard = env_lock();
    let fake = FakeRuntime::install(
        "fake-stats",
        r#"if [ "$1" = "events" ]; then
  echo '{"type":"stats","id":"c1","data":{"pids":{"current":5},"cpu":{"usage":{"total":900000,"kernel":1000}},"memory":{"usage":{"usage":2097152,"limit":4194304},"raw":{"total_inactive_file":8192}}}}'
fi"#,
    );
    let root = StateRoot::new();
    root.seed_workdir("c1", own_pid());

    let stats = IsulaRuntime
        .stats(
            "c1",
            fake.name,
            &StatsParams {
                state: root.path_string(),
            },
        )
        .unwrap();

    assert_eq!(stats.pids_current, 5);
    assert_eq!(stats.cpu_use_nanos, 900_000);
    assert_eq!(stats.cpu_system_use, 1_000);
    assert_eq!(stats.mem_used, 2_097_152);
    assert_eq!(stats.mem_limit, 4_194_304);
    assert_eq!(stats.inactive_file_total, 8_192);
    assert!(
        fake.calls().iter().any(|line| line == "events --stats c1"),
        "events call missing: {:?}",
        fake.calls()
    );
}

#[test]
fn pause_and_resume_pass_the_container_id_last() {
    let _guard = env_lock();
    let fake = FakeRuntime::install("fake-pause", "");
    let root = StateRoot::new();
    root.seed_workdir("c1", own_pid());

    let ops = IsulaRuntime;
    ops.pause(
        "c1",
        fake.name,
        &PauseParams {
            state: root.path_string(),
        },
    )
    .unwrap();
    ops.resume(
        "c1",
        fake.name,
        &ResumeParams {
            state: root.path_string(),
        },
    )
    .unwrap();

    assert_eq!(fake.calls(), vec!["pause c1", "resume c1"]);
}

#[test]
fn update_writes_the_projected_resources_and_cleans_up() {
    let _guard = env_lock();
    drain_error_message();
    let root = StateRoot::new();
    let capture = root.path().join("resources-capture.json");
    let fake = FakeRuntime::install(
        "fake-update",
        &format!(
            r#"if [ "$1" = "update" ]; then
  cp "$3" {}
fi"#,
            capture.display()
        ),
    );
    let ops = IsulaRuntime;
    ops.update(
        "c1",
        fake.name,
        &UpdateParams {
            state: root.path_string(),
            host_config: HostConfig {
                nano_cpus: 2_000_000_000,
                memory: 256 * 1024 * 1024,
                ..HostConfig::default()
            },
        },
    )
    .unwrap();

    // The transient update directory is gone after the call.
    assert!(!root.workdir("c1").join("update").exists());

    let calls = fake.calls();
    let update_call = calls
        .iter()
        .find(|line| line.starts_with("update --resources "))
        .expect("update call recorded");
    assert!(update_call.ends_with(" c1"), "id not last: {update_call}");

    let payload: Value =
        serde_json::from_slice(&fs::read(&capture).expect("captured resources.json")).unwrap();
    assert_eq!(payload["cpu"]["period"], 100_000);
    assert_eq!(payload["cpu"]["quota"], 200_000);
    assert_eq!(payload["memory"]["limit"], 256 * 1024 * 1024);
}

#[test]
fn update_failure_surfaces_the_runtime_stderr() {
    let _guard = env_lock();
    drain_error_message();
    let fake = FakeRuntime::install(
        "fake-update-fail",
        r#"if [ "$1" = "update" ]; then
  echo "cpu cgroup is unwritable" >&2
  exit 1
fi"#,
    );
    let root = StateRoot::new();

    let err = IsulaRuntime
        .update(
            "c1",
            fake.name,
            &UpdateParams {
                state: root.path_string(),
                host_config: HostConfig::default(),
            },
        )
        .unwrap_err();

    match &err {
        RuntimeError::RuntimeCallFailed { subcmd, stderr } => {
            assert_eq!(subcmd, "update");
            assert!(stderr.contains("cpu cgroup is unwritable"));
        }
        other => panic!("expected RuntimeCallFailed, got {other:?}"),
    }

    let message = drain_error_message().expect("stderr parked for the service layer");
    assert!(message.contains("cpu cgroup is unwritable"));

    assert!(!root.workdir("c1").join("update").exists());
}

#[test]
fn unknown_runtime_fails_with_config_missing() {
    let _guard = env_lock();
    let fake = FakeRuntime::install("fake-known", "");
    let root = StateRoot::new();
    root.seed_workdir("c1", own_pid());

    let err = IsulaRuntime
        .pause(
            "c1",
            "no-such-runtime",
            &PauseParams {
                state: root.path_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ConfigMissing(_)));
    assert!(fake.calls().is_empty());
}
