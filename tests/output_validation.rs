//! Output Contract Validation Tests
//!
//! Validates that everything procheck writes to stdout follows a fixed JSON
//! shape:
//! - CLI envelopes carry exactly the documented fields
//! - Error codes are stable
//! - RPC responses are JSON-RPC 2.0 with the error code in `data.code`
//! - Saved connections never expose credentials

#![cfg(feature = "sqlite")]

use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use procheck::rpc::{handle_request, JsonRpcRequest};
use procheck::{
    AgeCipher, EngineConnector, ErrorEnvelope, ErrorInfo, Metadata, ProcheckError, Procheck,
    Settings, Store, SuccessEnvelope,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn keys(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    keys
}

fn app() -> (TempDir, Procheck) {
    let dir = tempfile::tempdir().unwrap();
    Connection::open(dir.path().join("shop.db"))
        .unwrap()
        .execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);
             INSERT INTO users (email) VALUES ('a@b.com');",
        )
        .unwrap();

    let app = Procheck::from_parts(
        &Settings::with_data_dir(dir.path()),
        Arc::new(Store::open_in_memory().unwrap()),
        Arc::new(AgeCipher::generate()),
        Arc::new(EngineConnector),
    );
    (dir, app)
}

async fn call(app: &Procheck, id: u64, method: &str, params: Value) -> Value {
    let request: JsonRpcRequest =
        serde_json::from_value(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .unwrap();
    serde_json::to_value(handle_request(app, request).await).unwrap()
}

// ============================================================================
// Envelope Schema Tests
// ============================================================================

#[test]
fn test_success_envelope_structure() {
    let envelope =
        SuccessEnvelope::new("sqlite", "run", json!({ "outcome": "pass" }), Metadata::with_tests(42, 3));
    let value = serde_json::to_value(&envelope).unwrap();

    assert_eq!(keys(&value), vec!["command", "data", "meta", "ok", "provider"]);
    assert_eq!(value["ok"], true);
    assert_eq!(value["provider"], "sqlite");
    assert_eq!(value["command"], "run");
    assert_eq!(value["meta"]["execution_ms"], 42);
    assert_eq!(value["meta"]["tests_evaluated"], 3);
}

#[test]
fn test_metadata_omits_test_count_outside_runs() {
    let envelope = SuccessEnvelope::new("", "connection list", json!([]), Metadata::new(1));
    let value = serde_json::to_value(&envelope).unwrap();

    assert_eq!(keys(&value["meta"]), vec!["execution_ms"]);
    assert_eq!(value["provider"], "");
}

#[test]
fn test_error_envelope_structure() {
    let err = ProcheckError::no_hosts_parsed("postgres connection string contains no host");
    let value = serde_json::to_value(ErrorEnvelope::from_error("postgres", "connection add", &err)).unwrap();

    assert_eq!(keys(&value), vec!["command", "error", "ok", "provider"]);
    assert_eq!(value["ok"], false);
    assert_eq!(keys(&value["error"]), vec!["code", "message"]);
    assert_eq!(value["error"]["code"], "NO_HOSTS_PARSED");

    let custom = ErrorEnvelope::new("", "keygen", ErrorInfo::new("CUSTOM", "message"));
    assert_eq!(serde_json::to_value(custom).unwrap()["error"]["code"], "CUSTOM");
}

#[test]
fn test_error_codes_are_stable() {
    let cases = [
        (ProcheckError::encryption_unavailable("x"), "ENCRYPTION_UNAVAILABLE"),
        (ProcheckError::decryption_failed("x"), "DECRYPTION_FAILED"),
        (ProcheckError::no_hosts_parsed("x"), "NO_HOSTS_PARSED"),
        (ProcheckError::malformed_connection_string("x"), "MALFORMED_CONNECTION_STRING"),
        (ProcheckError::invalid_connection("x"), "INVALID_CONNECTION"),
        (ProcheckError::NoActiveConnection, "NO_ACTIVE_CONNECTION"),
        (ProcheckError::connection_failed("x"), "CONNECTION_FAILED"),
        (ProcheckError::query_failed("x"), "QUERY_FAILED"),
        (ProcheckError::engine_error("mysql", "x"), "ENGINE_ERROR"),
        (ProcheckError::invalid_input("x"), "INVALID_INPUT"),
        (ProcheckError::not_found("x"), "NOT_FOUND"),
        (ProcheckError::store_error("x"), "STORE_ERROR"),
        (ProcheckError::config_error("x"), "CONFIG_ERROR"),
        (ProcheckError::timeout("x"), "TIMEOUT"),
    ];

    for (err, code) in cases {
        let info = ErrorInfo::from(&err);
        assert_eq!(info.code, code);
        assert!(!info.message.is_empty(), "{code} has an empty message");
    }
}

// ============================================================================
// RPC Response Tests
// ============================================================================

#[tokio::test]
async fn test_rpc_success_shape() {
    let (_dir, app) = app();

    let response = call(&app, 1, "connections.status", Value::Null).await;
    assert_eq!(keys(&response), vec!["id", "jsonrpc", "result"]);
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["active"], false);
    assert_eq!(response["result"]["validity"], "unknown");
}

#[tokio::test]
async fn test_rpc_error_shape() {
    let (_dir, app) = app();

    let response = call(&app, 2, "procedures.listDatabases", Value::Null).await;
    assert_eq!(keys(&response), vec!["error", "id", "jsonrpc"]);
    assert_eq!(response["error"]["code"], -32000);
    assert_eq!(response["error"]["data"]["code"], "NO_ACTIVE_CONNECTION");
    assert!(response["error"]["message"].is_string());
}

#[tokio::test]
async fn test_rpc_sqlite_session() {
    let (dir, app) = app();
    let path = dir.path().join("shop.db");

    let created = call(
        &app,
        1,
        "connections.create",
        json!({
            "nickname": "shop",
            "provider": "sqlite",
            "connectionConfig": { "config": "string", "connectionString": format!("sqlite:{}", path.display()) }
        }),
    )
    .await;
    let saved = &created["result"];
    assert_eq!(saved["nickname"], "shop");
    assert_eq!(saved["provider"], "sqlite");
    assert_eq!(saved["usable"], true);
    assert!(saved.get("password").is_none());
    assert!(saved.get("passwordCiphertext").is_none());

    let databases = call(&app, 2, "procedures.listDatabases", Value::Null).await;
    assert_eq!(databases["result"], json!(["main"]));

    let run = call(
        &app,
        3,
        "executions.checkPassFail",
        json!({
            "execution": {
                "name": "smoke",
                "database": "main",
                "procedure": "none",
                "ruleGroups": [{
                    "name": "users",
                    "unitTests": [{
                        "name": "email",
                        "level": "RowStringOperations",
                        "operation": "EXACTLY",
                        "table": "users",
                        "column": "email",
                        "value": "a@b.com"
                    }]
                }]
            }
        }),
    )
    .await;
    let result = &run["result"];
    assert_eq!(result["outcome"], "pass");
    assert_eq!(result["ruleGroups"][0]["unitTests"][0]["outcome"], json!({ "status": "pass" }));
    assert!(result["timestamp"].is_string());

    let listed = call(&app, 4, "executions.list", Value::Null).await;
    assert_eq!(listed["result"][0]["id"], result["id"]);
    assert_eq!(listed["result"][0]["outcome"], "pass");

    let procedure = call(&app, 5, "procedures.fetchContent", json!({ "name": "anything" })).await;
    assert_eq!(procedure["error"]["data"]["code"], "ENGINE_ERROR");

    let disconnected = call(&app, 6, "connections.disconnect", Value::Null).await;
    assert_eq!(disconnected["result"], json!({ "disconnected": true }));
}
