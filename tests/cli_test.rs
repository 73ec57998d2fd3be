//! CLI surface tests: exit codes and the reminders round trip.

use assert_cmd::Command;

fn bantz() -> Command {
    Command::cargo_bin("bantz").expect("binary built")
}

#[test]
fn help_exits_zero() {
    bantz().arg("--help").assert().success();
}

#[test]
fn missing_subcommand_is_usage_error() {
    bantz().assert().code(1);
}

#[test]
fn unknown_subcommand_is_usage_error() {
    bantz().arg("frobnicate").assert().code(1);
}

#[test]
fn unparseable_time_is_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    bantz()
        .env("BANTZ_DATA_DIR", dir.path())
        .args(["reminders", "add", "akşam üstü gibi", "test"])
        .assert()
        .code(1);
}

#[test]
fn reminders_add_and_list_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");

    let add = bantz()
        .env("BANTZ_DATA_DIR", dir.path())
        .args(["reminders", "add", "yarın 9:00", "ilaç al"])
        .assert()
        .success();
    let add_out = String::from_utf8_lossy(&add.get_output().stdout).to_string();
    assert!(add_out.contains("ilaç al"), "add output: {add_out}");

    let list = bantz()
        .env("BANTZ_DATA_DIR", dir.path())
        .args(["reminders", "list"])
        .assert()
        .success();
    let list_out = String::from_utf8_lossy(&list.get_output().stdout).to_string();
    assert!(list_out.contains("ilaç al"), "list output: {list_out}");
}

#[test]
fn deleting_unknown_reminder_is_usage_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    bantz()
        .env("BANTZ_DATA_DIR", dir.path())
        .args(["reminders", "delete", "999"])
        .assert()
        .code(1);
}

#[test]
fn graph_stats_on_empty_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stats = bantz()
        .env("BANTZ_DATA_DIR", dir.path())
        .args(["graph", "stats"])
        .assert()
        .success();
    let out = String::from_utf8_lossy(&stats.get_output().stdout).to_string();
    assert!(out.contains("Varlık: 0"), "stats output: {out}");
}
