//! Handshake, tool listing, and malformed-request behavior.

use serde_json::json;

use super::common::spawn_mcp_server;

/// **Scenario**: initialize answers with the protocol version and server
/// info; tools/list advertises exactly onemcp.run.
#[tokio::test]
async fn initialize_and_tools_list() {
    let base = spawn_mcp_server(vec![]).await;
    let client = reqwest::Client::new();

    let init: serde_json::Value = client
        .post(format!("{base}/mcp"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": serve::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "e2e", "version": "0"}
            }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(init["result"]["protocolVersion"], serve::MCP_PROTOCOL_VERSION);
    assert_eq!(init["result"]["serverInfo"]["name"], "onemcp");
    assert_eq!(init["id"], 1);

    let tools: serde_json::Value = client
        .post(format!("{base}/mcp"))
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let list = tools["result"]["tools"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "onemcp.run");
}

/// **Scenario**: invalid JSON is a -32700 parse error; an unknown method is
/// -32601.
#[tokio::test]
async fn malformed_requests() {
    let base = spawn_mcp_server(vec![]).await;
    let client = reqwest::Client::new();

    let parse_err: serde_json::Value = client
        .post(format!("{base}/mcp"))
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(parse_err["error"]["code"], -32700);

    let unknown: serde_json::Value = client
        .post(format!("{base}/mcp"))
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unknown["error"]["code"], -32601);
}

/// **Scenario**: the liveness probe answers 200.
#[tokio::test]
async fn healthz() {
    let base = spawn_mcp_server(vec![]).await;
    let status = reqwest::get(format!("{base}/healthz")).await.unwrap().status();
    assert_eq!(status, 200);
}
