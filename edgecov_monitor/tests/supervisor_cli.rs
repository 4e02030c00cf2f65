//! End-to-end checks of the supervisor binary, driving uninstrumented
//! system targets against a freshly created shared map.

use std::{
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use edgecov::coverage::MAP_SIZE;
use edgecov_bolts::shmem::{shm_key_for_path, SysvShMem};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use serial_test::serial;

fn shm_token(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

fn monitor_cmd(token: &PathBuf, target: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_edgecov_monitor"));
    cmd.arg("--shm-path").arg(token).arg(target).args(args);
    cmd
}

#[test]
#[serial]
#[cfg_attr(miri, ignore)]
fn test_relay_and_final_report() {
    let token = shm_token("edgecov_monitor_cli_relay");
    let output = monitor_cmd(&token, "/bin/echo", &["hello"])
        .stderr(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("hello"), "target output was not relayed");
    // baseline report first, final report last; echo is uninstrumented,
    // so the freshly zeroed map stays empty
    assert_eq!(
        stdout.lines().next().unwrap(),
        "[Periodic] Branches covered: 0"
    );
    assert_eq!(stdout.lines().last().unwrap(), "Branches covered: 0");

    // normal completion removed the segment
    let key = shm_key_for_path(&token).unwrap();
    assert!(SysvShMem::attach(key, MAP_SIZE).is_err());
}

#[test]
#[serial]
#[cfg_attr(miri, ignore)]
fn test_setup_failure_exits_nonzero_before_fork() {
    // an unusable path token: ftok cannot resolve a directory that
    // cannot be created
    let output = monitor_cmd(
        &PathBuf::from("/nonexistent-dir/edgecov-token"),
        "/bin/echo",
        &["hello"],
    )
    .stderr(Stdio::null())
    .output()
    .unwrap();
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hello"), "no child may be spawned on setup failure");
}

#[test]
#[serial]
#[cfg_attr(miri, ignore)]
fn test_interrupt_reports_and_removes_map() {
    let token = shm_token("edgecov_monitor_cli_interrupt");
    let child = monitor_cmd(&token, "/bin/sleep", &["5"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_millis(500));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // the interrupt path emits the same final-report format
    assert_eq!(stdout.lines().last().unwrap(), "Branches covered: 0");

    // and the segment is gone, even though the child was not reaped
    let key = shm_key_for_path(&token).unwrap();
    assert!(SysvShMem::attach(key, MAP_SIZE).is_err());
}
