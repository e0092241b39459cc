#![cfg(feature = "cli")]

use assert_cmd::Command;
use igt_nav::NavigationConfig;
use predicates::prelude::*;

fn igt_nav() -> Command {
    Command::cargo_bin("igt-nav").unwrap()
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&out).unwrap()
}

#[test]
fn rectangular_grid_points() {
    let v = stdout_json(igt_nav().args([
        "grid",
        "--pattern",
        "rectangular",
        "--left",
        "20",
        "--right",
        "20",
        "--up",
        "20",
        "--down",
        "20",
    ]));
    assert_eq!(v["count"], 25);
    assert_eq!(v["points"].as_array().unwrap().len(), 25);
}

#[test]
fn grid_from_session_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nav.json");
    NavigationConfig::default().write_json(&path).unwrap();

    // two points per side, 10 mm apart, triangular
    let v = stdout_json(igt_nav().args(["grid", "--config"]).arg(&path));
    assert_eq!(v["count"], 23);
}

#[test]
fn invalid_grid_fails() {
    igt_nav()
        .args(["grid", "--horizontal", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("horizontal"));
}

#[test]
fn fixed_point_accepts_tight_cloud() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.json");
    std::fs::write(&path, "[[4.5, 0, 0], [5.5, 0, 0], [5, 0.5, 0], [5, -0.5, 0]]").unwrap();

    let v = stdout_json(igt_nav().args(["fixed-point", "--samples"]).arg(&path));
    assert_eq!(v["accepted"], true);
    assert_eq!(v["samples"], 4);
    assert_eq!(v["centroid"][0], 5.0);
    assert_eq!(v["rmse_mm"], 0.5);
}

#[test]
fn fixed_point_rejects_above_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("samples.json");
    std::fs::write(&path, "[[0, 0, 0], [20, 0, 0]]").unwrap();

    igt_nav()
        .args(["fixed-point", "--threshold", "5", "--samples"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"accepted\": false"))
        .stdout(predicate::str::contains("\"centroid\": null"));
}

#[test]
fn init_config_writes_loadable_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nav.json");
    igt_nav().arg("init-config").arg("--out").arg(&path).assert().success();
    assert_eq!(
        NavigationConfig::load_json(&path).unwrap(),
        NavigationConfig::default()
    );
}

#[test]
fn verbose_flag_enables_info_logging() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nav.json");

    igt_nav()
        .env_remove("RUST_LOG")
        .arg("init-config")
        .arg("--out")
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("default configuration written").not());

    igt_nav()
        .env_remove("RUST_LOG")
        .args(["--verbose", "init-config", "--out"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("default configuration written"));
}
