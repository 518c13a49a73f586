use std::time::Duration;

use predicates::prelude::*;

use crate::common::*;

#[cfg(unix)]
#[tokio::test]
async fn logs_show_both_streams_and_honour_filters() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let work = t.work_path().to_str().unwrap().to_string();

    t.procrig(&[
        "run",
        "app",
        "-c",
        "printf 'hello\\nworld\\n'; echo oops >&2; sleep 60",
        "-d",
        &work,
    ])
    .success();

    let home = &t;
    let ready = eventually(Duration::from_secs(5), || async move {
        stdout_of(home.procrig(&["logs", "app"]).get_output()).contains("oops")
    })
    .await;
    assert!(ready, "log output never appeared");

    t.procrig(&["logs", "app"]).success().stdout(
        predicate::str::contains("--- stdout (")
            .and(predicate::str::contains("--- stderr ("))
            .and(predicate::str::contains("hello"))
            .and(predicate::str::contains("world")),
    );

    t.procrig(&["logs", "app", "--stderr"])
        .success()
        .stdout(predicate::str::diff("oops").trim());

    t.procrig(&["logs", "app", "--stdout", "-n", "1"])
        .success()
        .stdout(predicate::str::diff("world").trim());
}

#[cfg(unix)]
#[test]
fn restart_truncates_logs() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let work = t.work_path().to_str().unwrap().to_string();
    let marker = t.write("marker.txt", "first\n");

    let command = format!("cat {}; sleep 60", marker.display());
    t.procrig(&["run", "app", "-c", &command, "-d", &work])
        .success();
    std::fs::write(&marker, "second\n").unwrap();
    t.procrig(&["run", "app", "--force"]).success();
    std::thread::sleep(Duration::from_millis(300));

    // Old output is gone after the restart.
    t.procrig(&["logs", "app", "--stdout"])
        .success()
        .stdout(predicate::str::contains("second").and(predicate::str::contains("first").not()));
}

#[test]
fn logs_for_unknown_process_fail() {
    let t = TestHome::new();
    t.procrig(&["logs", "ghost"])
        .failure()
        .stderr(predicate::str::contains("not found"));
}
