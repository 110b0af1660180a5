//! Tests for one-shot commands

use std::path::Path;
use std::time::{Duration, Instant};

use crate::error::HarnessError;
use crate::services::command_runner::{CommandSpec, helper_env, run_command};

#[test]
fn test_helper_env_appends_build_dir() {
    let env = helper_env(Path::new("/opt/updater/build"));

    assert!(env.contains(&("DBUS_STARTER_BUS_TYPE".to_string(), "session".to_string())));
    let (_, path) = env.iter().find(|(k, _)| k == "PATH").unwrap();
    assert!(path.ends_with("/opt/updater/build"));
}

#[tokio::test]
async fn test_captures_output_and_exit_code() {
    let output = run_command(
        CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]),
    )
    .await
    .unwrap();

    assert_eq!(output.stdout.trim(), "hello");
    assert_eq!(output.stderr.trim(), "oops");
    assert_eq!(output.exit_code, 3);
    assert!(!output.success());
}

#[tokio::test]
async fn test_passes_helper_environment() {
    let output = run_command(
        CommandSpec::new("sh")
            .args(["-c", "echo $DBUS_STARTER_BUS_TYPE"])
            .helper_env(Path::new("/nonexistent/build")),
    )
    .await
    .unwrap();

    assert!(output.success());
    assert_eq!(output.stdout.trim(), "session");
}

#[tokio::test]
async fn test_missing_program_is_unavailable() {
    let err = run_command(CommandSpec::new("definitely-not-a-real-binary-4711"))
        .await
        .unwrap_err();
    assert!(err.skip_reason().is_some());
}

#[tokio::test]
async fn test_timeout_kills_command() {
    let started = Instant::now();
    let err = run_command(
        CommandSpec::new("sh")
            .args(["-c", "exec sleep 30"])
            .timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HarnessError::CommandTimeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}
