use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn cli_shows_help() {
    let mut cmd = Command::cargo_bin("imfdata").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("imfdata"))
        .stdout(predicate::str::contains("datasets"))
        .stdout(predicate::str::contains("dimensions"));
}

#[test]
fn get_help_lists_query_options() {
    let mut cmd = Command::cargo_bin("imfdata").unwrap();
    cmd.args(["get", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--search"))
        .stdout(predicate::str::contains("--countries"))
        .stdout(predicate::str::contains("--period"));
}

#[test]
fn unreachable_service_without_cache_fails_cleanly() {
    let cache = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("imfdata").unwrap();
    cmd.env("IMFDATA_BASE_URL", "http://127.0.0.1:1/")
        .env("IMFDATA_CACHE_DIR", cache.path())
        .env("IMFDATA_MAX_ATTEMPTS", "1")
        .env("IMFDATA_RETRY_DELAY_MS", "0")
        .args(["get", "--dataset", "IFS", "--search", "GDP"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no dataset matches 'IFS'"));
}

// Live test (opt-in): cargo test --features online
#[cfg(feature = "online")]
#[test]
fn fetch_online_real_gdp() {
    let mut cmd = Command::cargo_bin("imfdata").unwrap();
    cmd.args([
        "get",
        "--dataset",
        "IFS",
        "--search",
        "NGDP_R_SA_XDC",
        "--countries",
        "US",
        "--period",
        "Q",
        "--stats",
    ]);
    cmd.assert().success();
}
