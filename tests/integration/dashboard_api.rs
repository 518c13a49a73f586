use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use procrig::dashboard::start_dashboard_server;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::common::*;

/// Start the dashboard for `t` on a free port. Cancel the token to stop it.
async fn start(t: &TestHome) -> (String, u16, CancellationToken) {
    let port = free_port();
    let cancel = CancellationToken::new();
    tokio::spawn(start_dashboard_server(port, t.orch(), cancel.clone()));
    assert!(
        wait_for_port(port, Duration::from_secs(5)).await,
        "dashboard did not start"
    );
    (format!("http://127.0.0.1:{}", port), port, cancel)
}

#[cfg(unix)]
#[tokio::test]
async fn process_lifecycle_over_http() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let (base, _, cancel) = start(&t).await;
    let client = reqwest::Client::new();

    let list: Value = client
        .get(format!("{}/api/processes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list, json!([]));

    let body = json!({
        "name": "sleeper",
        "command": "echo ready; sleep 60",
        "directory": t.work_path(),
    });
    let resp = client
        .post(format!("{}/api/processes", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let started: Value = resp.json().await.unwrap();
    assert!(started["pid"].as_u64().unwrap() > 0);
    assert_eq!(started["restarted"], false);

    // Starting again without force conflicts and names the process.
    let resp = client
        .post(format!("{}/api/processes", base))
        .json(&json!({ "name": "sleeper" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["name"], "sleeper");
    assert!(err["error"].as_str().unwrap().contains("currently running"));

    let resp = client
        .post(format!("{}/api/processes/sleeper/restart", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let restarted: Value = resp.json().await.unwrap();
    assert_eq!(restarted["restarted"], true);

    let resp = client
        .post(format!("{}/api/processes/sleeper/stop", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let stopped: Value = resp.json().await.unwrap();
    assert_eq!(stopped["status"], "stopped");

    let resp = client
        .post(format!("{}/api/processes/sleeper/stop", base))
        .send()
        .await
        .unwrap();
    let again: Value = resp.json().await.unwrap();
    assert_eq!(again["status"], "already_stopped");

    let resp = client
        .delete(format!("{}/api/processes/sleeper", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/api/processes/sleeper/stop", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    cancel.cancel();
}

#[cfg(unix)]
#[tokio::test]
async fn config_edits_use_content_hash() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();
    orch.run(
        procrig::RunRequest::new("svc")
            .command("sleep 60")
            .directory(t.work_path()),
    )
    .await
    .unwrap();
    let (base, _, cancel) = start(&t).await;
    let client = reqwest::Client::new();
    let url = format!("{}/api/processes/svc/config", base);

    let doc: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(doc["exists"], false);
    assert_eq!(doc["content"], "");
    let hash = doc["hash"].as_str().unwrap().to_string();

    let resp = client
        .put(&url)
        .json(&json!({ "content": "[db]\nurl = \"postgres://x\"\n", "hash": hash }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["exists"], true);
    assert_ne!(updated["hash"], doc["hash"]);
    assert!(t.work_path().join(".config.toml").exists());

    // Same stale hash again: someone else's edit would be lost.
    let resp = client
        .put(&url)
        .json(&json!({ "content": "x = 1\n", "hash": hash }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .put(&url)
        .json(&json!({ "content": "not toml [", "hash": updated["hash"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    cancel.cancel();
}

#[cfg(unix)]
#[tokio::test]
async fn logs_endpoint_and_websocket_tail() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();
    orch.run(
        procrig::RunRequest::new("chatty")
            .command("printf '\\033[31mred\\033[0m\\nplain\\n'; sleep 60")
            .directory(t.work_path()),
    )
    .await
    .unwrap();
    let (base, port, cancel) = start(&t).await;
    let client = reqwest::Client::new();

    let mut chunk = Value::Null;
    for _ in 0..50 {
        chunk = client
            .get(format!("{}/api/processes/chatty/logs?stream=stdout&offset=0", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if chunk["lines"].as_array().is_some_and(|l| l.len() == 2) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let lines = chunk["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["spans"][0]["text"], "red");
    assert_eq!(lines[0]["spans"][0]["fg"], "red");
    assert!(chunk["next_offset"].as_u64().unwrap() > 0);

    let filtered: Value = client
        .get(format!("{}/api/processes/chatty/logs?filter=PLAIN", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filtered["lines"].as_array().unwrap().len(), 1);

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .unwrap();
    ws.send(Message::Text(
        json!({ "type": "tail", "name": "chatty" }).to_string().into(),
    ))
    .await
    .unwrap();

    let mut saw_snapshot = false;
    let mut saw_tail = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !(saw_snapshot && saw_tail) && tokio::time::Instant::now() < deadline {
        let Ok(Some(Ok(msg))) = tokio::time::timeout(Duration::from_secs(2), ws.next()).await
        else {
            continue;
        };
        let Ok(text) = msg.to_text() else { continue };
        let Ok(v) = serde_json::from_str::<Value>(text) else {
            continue;
        };
        match v["type"].as_str() {
            Some("snapshot") => {
                assert_eq!(v["processes"][0]["name"], "chatty");
                saw_snapshot = true;
            }
            Some("tail") => {
                assert_eq!(v["name"], "chatty");
                assert_eq!(v["appended"].as_array().unwrap().len(), 2);
                saw_tail = true;
            }
            _ => {}
        }
    }
    assert!(saw_snapshot, "no snapshot pushed over the websocket");
    assert!(saw_tail, "no log tail pushed over the websocket");

    cancel.cancel();
}
