//! Integration tests for the cfetch binary

use std::path::Path;
use std::process::{Command, Output};

use cfetch_cas::testutil::ContainerBuilder;
use cfetch_cas::{AuthorizedGroups, Signature};
use cfetch_config::testing::TestEnvironment;

/// Helper to run cfetch inside the test environment
fn cfetch(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cfetch"))
        .args(args)
        .current_dir(&env.project_root)
        .env_remove("RUST_LOG")
        .envs(env.cli_env())
        .output()
        .expect("Failed to execute cfetch")
}

/// Two containers on the mirror, one declared but missing.
fn stage(env: &TestEnvironment) -> (Signature, Signature, Signature) {
    let (x, x_payload) = ContainerBuilder::new("/store/x")
        .host("cdn.test")
        .chunk(b"shared ")
        .chunk(b"tail")
        .build();
    let (y, y_payload) = ContainerBuilder::new("/store/y").host("cdn.test").chunk(b"head ").build();
    let (z, _) = ContainerBuilder::new("/store/z").host("cdn.test").chunk(b"lost").build();
    env.create_blob("cdn.test", "/store/x", &x_payload).unwrap();
    env.create_blob("cdn.test", "/store/y", &y_payload).unwrap();

    let (s1, s2, s3) = (
        Signature::new(vec![0x01]),
        Signature::new(vec![0x02]),
        Signature::new(vec![0x03]),
    );
    let mut groups = AuthorizedGroups::new();
    groups.insert_container("x", &x);
    groups.insert_container("y", &y);
    groups.insert_container("z", &z);
    groups.insert_signature(&s1, &[("y", 0), ("x", 0), ("x", 1)]);
    groups.insert_signature(&s2, &[("x", 0)]);
    groups.insert_signature(&s3, &[("x", 1), ("z", 0)]);
    env.create_file("groups.json", serde_json::to_string(&groups).unwrap().as_bytes())
        .unwrap();
    (s1, s2, s3)
}

fn restore_args<'a>(env: &'a TestEnvironment, extra: &[&'a str]) -> Vec<String> {
    let mut args = vec![
        "restore".to_string(),
        "--groups".to_string(),
        "groups.json".to_string(),
        "--mirror".to_string(),
        path_str(&env.mirror_root),
        "--max-retries".to_string(),
        "1".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_restore_writes_completed_and_reports_failed() {
    let env = TestEnvironment::new().unwrap();
    let (s1, s2, s3) = stage(&env);

    let args = restore_args(&env, &["-j", "2"]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cfetch(&env, &args);
    let stdout = String::from_utf8_lossy(&output.stdout);

    // One signature failed, so the run is not clean
    assert_eq!(output.status.code(), Some(2), "stdout: {stdout}");
    assert!(stdout.contains("Restore Summary"));
    assert!(stdout.contains("Failed signatures:"));
    assert!(stdout.contains(&s3.to_hex()));

    assert_eq!(
        std::fs::read(env.output_path(&s1.to_hex())).unwrap(),
        b"head shared tail"
    );
    assert_eq!(std::fs::read(env.output_path(&s2.to_hex())).unwrap(), b"shared ");
    assert!(!env.output_path(&s3.to_hex()).exists());
}

#[test]
fn test_restore_json_summary() {
    let env = TestEnvironment::new().unwrap();
    let (s1, s2, s3) = stage(&env);

    let args = restore_args(&env, &["--json"]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cfetch(&env, &args);
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(summary["restored"], serde_json::json!([s1.to_hex(), s2.to_hex()]));
    assert_eq!(summary["failed"], serde_json::json!([s3.to_hex()]));
    assert_eq!(summary["completed_within_timeout"], true);
    assert_eq!(summary["stats"]["containers_failed"], 1);
}

#[test]
fn test_restore_rejects_malformed_groups() {
    let env = TestEnvironment::new().unwrap();
    env.create_file("groups.json", b"[]").unwrap();

    let args = restore_args(&env, &[]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cfetch(&env, &args);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("groups.json"));
}

#[test]
fn test_config_path() {
    let env = TestEnvironment::new().unwrap();
    let output = cfetch(&env, &["config", "path"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Global:"));
    assert!(stdout.contains("Project:"));
}

#[test]
fn test_config_show_contains_all_sections() {
    let env = TestEnvironment::new().unwrap();
    let output = cfetch(&env, &["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("[engine]"));
    assert!(stdout.contains("[retry]"));
    assert!(stdout.contains("[output]"));
    assert!(stdout.contains("[log]"));
}

#[test]
fn test_config_init_then_project_override() {
    let env = TestEnvironment::new().unwrap();
    let output = cfetch(&env, &["config", "init"]);
    assert!(output.status.success());
    assert!(env.project_root.join(".cfetch/config.toml").exists());

    let again = cfetch(&env, &["config", "init"]);
    assert!(!again.status.success());

    env.create_file(".cfetch/config.toml", b"[retry]\nmax_retries = 9\n").unwrap();
    let output = cfetch(&env, &["config", "show"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_retries = 9"));
}
