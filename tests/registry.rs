//! Registry tests running several `mock-provider` processes.

use serde_json::json;

use mcp_stdio_bridge::mcp_client::{CancelSignal, McpError, ServerConfig, ServerRegistry, SessionOptions};

const MOCK: &str = env!("CARGO_BIN_EXE_mock-provider");
const MOCK_TOOLS: usize = 8;

fn mock(name: &str, mode: &str) -> ServerConfig {
    ServerConfig::command(name, MOCK, &[mode])
}

#[tokio::test]
async fn test_start_execute_stop() {
    let registry = ServerRegistry::new(SessionOptions::default());
    let never = CancelSignal::never();

    assert_eq!(registry.start_server(&mock("beta", "tools"), &never).await.unwrap(), MOCK_TOOLS);
    assert_eq!(registry.start_server(&mock("alpha", "tools"), &never).await.unwrap(), MOCK_TOOLS);
    assert_eq!(registry.server_names().await, vec!["alpha", "beta"]);
    assert_eq!(registry.tool_count().await, 2 * MOCK_TOOLS);
    assert_eq!(registry.server_tool_count("beta").await, MOCK_TOOLS);

    // Both expose `answer`; the first by name wins.
    assert_eq!(registry.server_for_tool("answer").await.as_deref(), Some("alpha"));
    assert_eq!(registry.execute_tool("answer", json!({})).await.unwrap(), "42");
    assert_eq!(
        registry
            .execute_tool_on("beta", "echo", json!({"text": "hi"}))
            .await
            .unwrap(),
        "hi"
    );

    let tools = registry.all_tools().await;
    assert_eq!(tools.first().map(|(s, _)| s.as_str()), Some("alpha"));
    assert_eq!(tools.last().map(|(s, _)| s.as_str()), Some("beta"));

    let alpha = registry.session("alpha").await.unwrap();
    registry.stop_server("alpha").await.unwrap();
    assert!(!alpha.is_alive());
    assert_eq!(registry.server_for_tool("answer").await.as_deref(), Some("beta"));

    registry.stop_all().await;
    assert_eq!(registry.server_count().await, 0);
}

#[tokio::test]
async fn test_duplicate_start_rejected() {
    let registry = ServerRegistry::new(SessionOptions::default());
    let never = CancelSignal::never();
    registry.start_server(&mock("dup", "tools"), &never).await.unwrap();

    let err = registry
        .start_server(&mock("dup", "tools"), &never)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::AlreadyRunning { .. }));
    assert_eq!(registry.server_count().await, 1);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_failed_discovery_closes_session() {
    let registry = ServerRegistry::new(SessionOptions::default());
    let err = registry
        .start_server(&mock("listless", "list-error"), &CancelSignal::never())
        .await
        .unwrap_err();
    match err {
        McpError::ToolError { method, code, .. } => {
            assert_eq!(method, "tools/list");
            assert_eq!(code, -32001);
        }
        other => panic!("expected ToolError, got {other:?}"),
    }
    assert_eq!(registry.server_count().await, 0);
}

#[tokio::test]
async fn test_restart_and_refresh() {
    let registry = ServerRegistry::new(SessionOptions::default());
    registry
        .start_server(&mock("svc", "tools"), &CancelSignal::never())
        .await
        .unwrap();
    let first_pid = registry.session("svc").await.unwrap().pid();

    assert_eq!(registry.restart_server("svc").await.unwrap(), MOCK_TOOLS);
    let second_pid = registry.session("svc").await.unwrap().pid();
    assert_ne!(first_pid, second_pid);

    assert_eq!(registry.refresh_tools("svc").await.unwrap(), MOCK_TOOLS);
    registry.stop_all().await;
}

#[tokio::test]
async fn test_cancelled_registry_start() {
    let registry = ServerRegistry::new(SessionOptions::default());
    let (handle, cancel) = CancelSignal::pair();
    handle.cancel();

    let errors = registry
        .start_enabled(&[mock("a", "tools"), mock("b", "tools")], &cancel)
        .await;
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|(_, e)| matches!(e, McpError::Cancelled { .. })));
    assert_eq!(registry.server_count().await, 0);
}
