//! End-to-end manager flows against scripted stdio MCP servers.
//!
//! Each mock server is a bash loop speaking newline-delimited JSON-RPC:
//! it answers the handshake, advertises one tool, and stamps tool-call
//! results with its own label so the tests can assert which server a
//! routed call actually reached. Environments without bash skip.

use peso_mcp::{Manager, McpError, Registry, ServerEntry, ServerSpec};
use std::collections::HashMap;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

/// Mock server; `$1` is the label stamped into results, `$2` the tool name.
const SCRIPTED_SERVER: &str = r#"label="$1"
tool="$2"
while IFS= read -r line; do
    id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
    case "$line" in
        *'"method":"initialize"'*)
            printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"%s","version":"0.1.0"},"capabilities":{"tools":{}}}}\n' "$id" "$label"
            ;;
        *'"method":"notifications/initialized"'*)
            ;;
        *'"method":"tools/list"'*)
            printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"%s","description":"Scripted tool"}]}}\n' "$id" "$tool"
            ;;
        *'"method":"resources/list"'*)
            printf '{"jsonrpc":"2.0","id":%s,"result":{"resources":[]}}\n' "$id"
            ;;
        *'"method":"tools/call"'*)
            printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"handled-by-%s"}]}}\n' "$id" "$label"
            ;;
    esac
done"#;

fn scripted_spec(
    name: &str,
    tool: &str,
    capability: &str,
    priority: i32,
    auto_connect: bool,
) -> ServerSpec {
    ServerSpec::from_entry(
        name,
        ServerEntry {
            description: format!("Scripted {name}"),
            command: vec![
                "bash".to_string(),
                "-c".to_string(),
                SCRIPTED_SERVER.to_string(),
                "mock".to_string(),
                name.to_string(),
                tool.to_string(),
            ],
            environment: HashMap::new(),
            capabilities: vec![capability.to_string()],
            priority,
            auto_connect,
            timeout_ms: None,
            docker_config: None,
        },
    )
}

fn manager_for(specs: Vec<ServerSpec>) -> Manager {
    let mut registry = Registry::with_env(std::sync::Arc::new(peso_mcp::SystemEnv));
    for spec in specs {
        registry.register(spec);
    }
    Manager::with_workdir(registry, PathBuf::from("."))
}

async fn bash_available() -> bool {
    tokio::process::Command::new("bash")
        .args(["-c", "exit 0"])
        .status()
        .await
        .is_ok()
}

fn result_text(value: &serde_json::Value) -> &str {
    value["content"][0]["text"].as_str().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_connect_follows_priority_order() {
    if !bash_available().await {
        return;
    }
    let mut manager = manager_for(vec![
        scripted_spec("alpha", "ping", "testing", 5, true),
        scripted_spec("beta", "pong", "testing", 10, true),
        scripted_spec("gamma", "hum", "testing", 99, false),
    ]);

    let outcomes = manager.auto_connect_servers().await;
    let names: Vec<&str> = outcomes.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["beta", "alpha"]);
    assert!(outcomes.iter().all(|(_, ok)| *ok));

    let stats = manager.get_connection_stats();
    assert_eq!(stats.connected_servers, 2);
    assert_eq!(stats.total_tools, 2);
    assert_eq!(
        stats.servers_by_capability["testing"],
        vec!["alpha".to_string(), "beta".to_string()]
    );
    assert_eq!(manager.connected_names(), vec!["alpha", "beta"]);

    manager.disconnect_all().await;
}

#[tokio::test]
async fn qualified_routing_prefers_the_tool_owner() {
    if !bash_available().await {
        return;
    }
    // serverA_extra's name embeds serverA's name plus the separator, so
    // "serverA_extra_toolY" is prefix-ambiguous between the two.
    let mut manager = manager_for(vec![
        scripted_spec("serverA", "toolX", "testing", 1, true),
        scripted_spec("serverA_extra", "toolY", "testing", 1, true),
    ]);
    manager.auto_connect_servers().await;

    let result = manager
        .call_tool_by_function_name("serverA_toolX", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "handled-by-serverA");

    let result = manager
        .call_tool_by_function_name("serverA_extra_toolY", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "handled-by-serverA_extra");

    let err = manager
        .call_tool_by_function_name("unrelated_tool", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NoRoute { .. }));

    manager.disconnect_all().await;
}

#[tokio::test]
async fn smart_call_connects_on_demand_and_routes_by_priority() {
    if !bash_available().await {
        return;
    }
    let mut manager = manager_for(vec![
        scripted_spec("fast", "lookup", "search", 10, false),
        scripted_spec("slow", "lookup", "search", 1, false),
    ]);
    assert_eq!(manager.get_connection_stats().connected_servers, 0);

    let result = manager
        .call_tool_smart("search", "lookup", serde_json::json!({"q": "x"}))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "handled-by-fast");
    assert_eq!(manager.get_connection_stats().connected_servers, 2);

    let err = manager
        .call_tool_smart("search", "missing", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ToolNotFound { .. }));

    manager.disconnect_all().await;
}

#[tokio::test]
async fn failed_server_does_not_block_the_rest() {
    if !bash_available().await {
        return;
    }
    let mut broken = scripted_spec("broken", "none", "testing", 50, true);
    broken.command = vec!["bash".to_string(), "-c".to_string(), "exit 0".to_string()];
    let mut manager = manager_for(vec![
        broken,
        scripted_spec("steady", "ping", "testing", 1, true),
    ]);

    let outcomes = manager.auto_connect_servers().await;
    assert_eq!(
        outcomes,
        vec![("broken".to_string(), false), ("steady".to_string(), true)]
    );

    // The failed attempt leaves no connection behind.
    let stats = manager.get_connection_stats();
    assert_eq!(stats.total_servers, 1);
    assert_eq!(stats.connected_servers, 1);
    assert!(!stats.server_details.contains_key("broken"));

    let result = manager
        .call_tool_by_function_name("steady_ping", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "handled-by-steady");

    manager.disconnect_all().await;
}

#[tokio::test]
async fn disconnect_all_clears_every_connection() {
    if !bash_available().await {
        return;
    }
    let mut manager = manager_for(vec![scripted_spec("solo", "ping", "testing", 1, true)]);
    manager.auto_connect_servers().await;
    assert_eq!(manager.get_connection_stats().connected_servers, 1);

    manager.disconnect_all().await;

    let stats = manager.get_connection_stats();
    assert_eq!(stats.total_servers, 0);
    assert_eq!(stats.connected_servers, 0);
    assert!(!manager.disconnect_server("solo").await);
    let err = manager
        .call_tool_by_function_name("solo_ping", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::NoRoute { .. }));
}

#[tokio::test]
async fn tool_catalog_qualifies_names_per_server() {
    if !bash_available().await {
        return;
    }
    let mut manager = manager_for(vec![
        scripted_spec("files", "read_file", "fs", 1, true),
        scripted_spec("web", "search", "search", 1, true),
    ]);
    manager.auto_connect_servers().await;

    let catalog = manager.tool_catalog();
    let names: Vec<&str> = catalog.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["files_read_file", "web_search"]);
    assert_eq!(catalog[0].server, "files");
    assert_eq!(catalog[1].description, "Scripted tool");

    let tools = manager.get_available_tools();
    assert_eq!(tools["files"], vec!["read_file".to_string()]);
    assert_eq!(tools["web"], vec!["search".to_string()]);

    manager.disconnect_all().await;
}
