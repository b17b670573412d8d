//! Streaming `tools/call` behavior for onemcp.run.

use onemcp::ChatCompletion;
use serde_json::json;

use super::common::{normalize_reply, parse_sse, plan_reply, spawn_mcp_server};

fn call_body(prompt: &str) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {
            "name": "onemcp.run",
            "arguments": { "prompt": prompt }
        }
    })
}

/// **Scenario**: a run streams progress notifications (stage events with an
/// injected envelope) and finishes with one result message carrying the
/// summary text.
#[tokio::test]
async fn run_streams_events_then_result() {
    let base = spawn_mcp_server(vec![
        ChatCompletion::text(normalize_reply()),
        ChatCompletion::text(plan_reply()),
        ChatCompletion::text("Total sales for 2024 were $123,450.50."),
    ])
    .await;

    let response = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .json(&call_body("Show total sales for 2024"))
        .send()
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .starts_with("text/event-stream"));

    let body = response.text().await.unwrap();
    let messages = parse_sse(&body);
    assert!(!messages.is_empty());

    let notifications: Vec<_> = messages
        .iter()
        .filter(|m| m["method"] == "notifications/onemcp/run")
        .collect();
    assert!(notifications
        .iter()
        .any(|n| n["params"]["type"] == "stage_enter" && n["params"]["stage"] == "normalize"));
    assert!(notifications
        .iter()
        .any(|n| n["params"]["type"] == "step_end" && n["params"]["ok"] == true));

    // Envelope: request id constant, event ids monotonically increasing.
    let mut last_event_id = 0u64;
    for n in &notifications {
        let id = n["params"]["event_id"].as_u64().unwrap();
        assert!(id > last_event_id, "event ids must increase");
        last_event_id = id;
        assert!(n["params"]["request_id"].as_str().unwrap().starts_with("run-"));
    }

    let result = messages
        .iter()
        .find(|m| m.get("result").is_some())
        .expect("final result message");
    assert_eq!(result["id"], 7);
    assert_eq!(result["result"]["isError"], false);
    assert!(result["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("123,450.50"));
}

/// **Scenario**: a failing run (unknown dictionary tokens) still ends with a
/// result message whose payload carries the NORMALIZATION error envelope.
#[tokio::test]
async fn failed_run_reports_error_envelope() {
    let bad_normalize = json!({
        "action": "aggregate",
        "entities": ["warehouse"],
        "fields": []
    })
    .to_string();
    let base = spawn_mcp_server(vec![ChatCompletion::text(bad_normalize)]).await;

    let body = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .json(&call_body("Count warehouses"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let messages = parse_sse(&body);

    let result = messages
        .iter()
        .find(|m| m.get("result").is_some())
        .expect("final result message");
    assert_eq!(result["result"]["isError"], true);
    let text = result["result"]["content"][0]["text"].as_str().unwrap();
    let envelope: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(envelope["code"], "NORMALIZATION");
    assert_eq!(envelope["stage"], "normalize");
}

/// **Scenario**: calling an unknown tool is a -32602 JSON error, not a
/// stream.
#[tokio::test]
async fn unknown_tool_rejected() {
    let base = spawn_mcp_server(vec![]).await;
    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{base}/mcp"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": {"name": "other.tool", "arguments": {"prompt": "x"}}
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["error"]["code"], -32602);
}
