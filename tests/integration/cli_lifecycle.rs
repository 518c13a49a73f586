use predicates::prelude::*;

use crate::common::*;

#[test]
fn list_on_empty_home() {
    let t = TestHome::new();
    t.procrig(&["list"])
        .success()
        .stdout(predicate::str::contains("No processes registered"));

    assert_eq!(json_of(t.procrig(&["list", "--json"])), serde_json::json!([]));
}

#[test]
fn unknown_process_suggests_close_name() {
    let t = TestHome::new();
    let work = t.work_path().to_str().unwrap().to_string();
    t.procrig(&["run", "frontend", "-c", "sleep 60", "-d", &work])
        .success();
    scopeguard::defer! { t.stop_all(); }

    t.procrig(&["stop", "frontnd"])
        .failure()
        .stderr(predicate::str::contains("not found").and(predicate::str::contains("frontend")));
}

#[cfg(unix)]
#[test]
fn run_guard_stop_and_delete() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let work = t.work_path().to_str().unwrap().to_string();

    t.procrig(&["run", "api", "-c", "sleep 60", "-d", &work])
        .success()
        .stdout(predicate::str::contains("launched"));

    // A running process is not restarted without --force.
    t.procrig(&["run", "api"])
        .failure()
        .stderr(predicate::str::contains("currently running"));

    t.procrig(&["run", "api", "--force"])
        .success()
        .stdout(predicate::str::contains("restarted"));

    let v = json_of(t.procrig(&["list", "--json"]));
    assert_eq!(v[0]["name"], "api");
    assert_eq!(v[0]["running"], true);
    assert_eq!(v[0]["command"], "sleep 60");

    // Stopping twice is fine; the record survives with PID 0.
    t.procrig(&["stop", "api"]).success();
    t.procrig(&["stop", "api"])
        .success()
        .stdout(predicate::str::contains("not running"));

    let v = json_of(t.procrig(&["list", "--json"]));
    assert_eq!(v[0]["pid"], 0);
    assert_eq!(v[0]["running"], false);

    // A stopped process restarts from its stored command and directory.
    t.procrig(&["run", "api"]).success();

    t.procrig(&["delete", "api"]).success();
    assert_eq!(json_of(t.procrig(&["list", "--json"])), serde_json::json!([]));
}

#[cfg(unix)]
#[test]
fn clean_removes_only_exited_processes() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let work = t.work_path().to_str().unwrap().to_string();

    t.procrig(&["run", "alive", "-c", "sleep 60", "-d", &work])
        .success();
    // Exits on its own right away; run itself still succeeds.
    t.procrig(&["run", "oneshot", "-c", "true", "-d", &work])
        .success();

    t.procrig(&["clean"])
        .success()
        .stdout(predicate::str::contains("removed oneshot"));

    let v = json_of(t.procrig(&["list", "--json"]));
    let names: Vec<&str> = v
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alive"]);
}

#[test]
fn new_process_without_command_is_rejected() {
    let t = TestHome::new();
    t.procrig(&["run", "api"])
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
