mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{Fixture, LST, NDVI};
use predicates::str::contains;

#[test]
fn help_lists_subcommands() {
    cargo_bin_cmd!("cool_routes")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("ndvi"))
        .stdout(contains("lst"))
        .stdout(contains("buildings"))
        .stdout(contains("plan"))
        .stdout(contains("sync-drive"));
}

#[test]
fn offline_lst_run_writes_export() {
    let fixture = Fixture::new();
    let config = fixture.config_without_region("lst.yaml", LST);

    cargo_bin_cmd!("cool_routes")
        .env_remove("RUST_LOG")
        .arg("lst")
        .arg("--config")
        .arg(&config)
        .args(["--region", "testville", "--offline", "--regions-dir"])
        .arg(fixture.path().join("regions"))
        .assert()
        .success()
        .stdout(contains("lst: 2 scenes"))
        .stdout(contains("cloud mask enabled"));

    assert!(fixture.path().join("out/lst/lst_testville_2024.json").exists());
}

#[test]
fn plan_prints_collection_descriptor() {
    let fixture = Fixture::new();
    let config = fixture.config("ndvi.yaml", NDVI);

    cargo_bin_cmd!("cool_routes")
        .args(["plan", "--product", "ndvi", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("\"collection_id\": \"COPERNICUS/S2_SR_HARMONIZED\""))
        .stdout(contains("\"op\": \"bit_mask\""))
        .stdout(contains("\"op\": \"normalized_difference\""));
}

#[test]
fn missing_config_fails_with_diagnostic() {
    let fixture = Fixture::new();

    cargo_bin_cmd!("cool_routes")
        .env_remove("RUST_LOG")
        .arg("ndvi")
        .arg("--config")
        .arg(fixture.path().join("absent.yaml"))
        .arg("--offline")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("config failed: configuration error: Config file not found"));
}

#[test]
fn unknown_region_slug_fails() {
    let fixture = Fixture::new();
    let config = fixture.config_without_region("lst.yaml", LST);

    cargo_bin_cmd!("cool_routes")
        .env_remove("RUST_LOG")
        .arg("lst")
        .arg("--config")
        .arg(&config)
        .args(["--region", "atlantis", "--offline", "--regions-dir"])
        .arg(fixture.path().join("regions"))
        .assert()
        .failure()
        .stderr(contains("Region 'atlantis' not found. Expected file: atlantis.yaml"));
}
