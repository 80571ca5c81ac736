//! RPC Server
//!
//! Line-delimited JSON-RPC 2.0 over stdio. Every exposed operation is one
//! method; the server keeps a single [`Procheck`] for its whole lifetime, so
//! the connection selected by `connections.select` stays active until
//! `connections.disconnect`, another select, or end of input.
//!
//! # Methods
//! - `initialize`, `methods/list`
//! - `connections.{fetch,create,select,update,delete,disconnect,switch,verify,status}`
//! - `procedures.{listProcedures,listDatabases,fetchContent,getProcedureParameters}`
//! - `executions.{checkPassFail,rerunRuleGroup,list,load,delete}`
//!
//! # Errors
//! Operation failures are JSON-RPC errors whose `data.code` carries the
//! stable error code (`NO_HOSTS_PARSED`, `INVALID_CONNECTION`, ...).
//! Invalid params use `-32602`; other operation errors use `-32000`.
//!
//! # Usage
//! ```text
//! $ procheck serve
//! {"jsonrpc":"2.0","id":1,"method":"connections.select","params":{"id":3}}
//! ```

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::app::Procheck;
use crate::descriptor::ConnectionInput;
use crate::error::ProcheckError;
use crate::rules::Execution;
use crate::service::ConnectionUpdate;

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;
const OPERATION_FAILED: i32 = -32000;

/// Every method the server answers
pub const METHODS: &[&str] = &[
    "initialize",
    "methods/list",
    "connections.fetch",
    "connections.create",
    "connections.select",
    "connections.update",
    "connections.delete",
    "connections.disconnect",
    "connections.switch",
    "connections.verify",
    "connections.status",
    "procedures.listProcedures",
    "procedures.listDatabases",
    "procedures.fetchContent",
    "procedures.getProcedureParameters",
    "executions.checkPassFail",
    "executions.rerunRuleGroup",
    "executions.list",
    "executions.load",
    "executions.delete",
];

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn failure(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data }),
        }
    }

    fn from_error(id: Option<Value>, err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ProcheckError>() {
            Some(e) => {
                let code = match e {
                    ProcheckError::InvalidInput(_) => INVALID_PARAMS,
                    _ => OPERATION_FAILED,
                };
                Self::failure(id, code, e.message(), Some(serde_json::json!({ "code": e.error_code() })))
            }
            None => Self::failure(id, INTERNAL_ERROR, err.to_string(), None),
        }
    }
}

// ============================================================================
// Params
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdParams {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SwitchParams {
    database: String,
}

#[derive(Debug, Deserialize)]
struct ProcedureParams {
    #[serde(default)]
    database: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckParams {
    execution: Execution,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RerunParams {
    id: i64,
    rule_group: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| ProcheckError::invalid_input(format!("Invalid params: {e}")).into())
}

fn json(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

// ============================================================================
// Server
// ============================================================================

/// Run the server loop until stdin closes.
///
/// Each request is a single line of JSON; each response is a single line of
/// JSON. The active session is torn down on exit.
#[allow(clippy::future_not_send)]
pub async fn serve(app: &Procheck) -> Result<()> {
    let stdin = io::stdin();
    let reader = stdin.lock();
    let mut stdout = io::stdout();

    tracing::info!("RPC server listening on stdio");

    for line in reader.lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => handle_request(app, request).await,
            Err(e) => JsonRpcResponse::failure(None, PARSE_ERROR, format!("Parse error: {e}"), None),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    app.shutdown().await;
    tracing::info!("RPC server stopped");
    Ok(())
}

/// Route one request to its operation
pub async fn handle_request(app: &Procheck, request: JsonRpcRequest) -> JsonRpcResponse {
    if !METHODS.contains(&request.method.as_str()) {
        return JsonRpcResponse::failure(
            request.id,
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
            None,
        );
    }

    tracing::debug!(method = %request.method, "RPC request");
    match dispatch(app, &request.method, request.params).await {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(e) => {
            tracing::debug!(method = %request.method, error = %e, "RPC request failed");
            JsonRpcResponse::from_error(request.id, &e)
        }
    }
}

async fn dispatch(app: &Procheck, method: &str, raw: Option<Value>) -> Result<Value> {
    match method {
        "initialize" => Ok(serde_json::json!({
            "serverInfo": {
                "name": "procheck",
                "version": env!("CARGO_PKG_VERSION")
            },
            "methods": METHODS
        })),
        "methods/list" => Ok(serde_json::json!({ "methods": METHODS })),

        "connections.fetch" => json(app.connections.fetch()?),
        "connections.create" => {
            let input: ConnectionInput = params(raw)?;
            json(app.connections.create(input).await?)
        }
        "connections.select" => {
            let IdParams { id } = params(raw)?;
            json(app.connections.select(id).await?)
        }
        "connections.update" => {
            let update: ConnectionUpdate = params(raw)?;
            json(app.connections.update(update)?)
        }
        "connections.delete" => {
            let IdParams { id } = params(raw)?;
            app.connections.delete(id)?;
            Ok(serde_json::json!({ "deleted": id }))
        }
        "connections.disconnect" => {
            app.connections.disconnect().await;
            Ok(serde_json::json!({ "disconnected": true }))
        }
        "connections.switch" => {
            let SwitchParams { database } = params(raw)?;
            json(app.connections.switch(&database).await?)
        }
        "connections.verify" => json(app.connections.verify().await),
        "connections.status" => json(app.connections.status().await),

        "procedures.listProcedures" => json(app.procedures.list_procedures().await?),
        "procedures.listDatabases" => json(app.procedures.list_databases().await?),
        "procedures.fetchContent" => {
            let ProcedureParams { database, name } = params(raw)?;
            json(app.procedures.fetch_content(&database, &name).await?)
        }
        "procedures.getProcedureParameters" => {
            let ProcedureParams { database, name } = params(raw)?;
            json(app.procedures.get_procedure_parameters(&database, &name).await?)
        }

        "executions.checkPassFail" => {
            let CheckParams { execution, timeout_ms } = params(raw)?;
            let timeout = timeout_ms.map(Duration::from_millis);
            json(app.executions.check_pass_fail(execution, timeout).await?)
        }
        "executions.rerunRuleGroup" => {
            let RerunParams { id, rule_group, timeout_ms } = params(raw)?;
            let timeout = timeout_ms.map(Duration::from_millis);
            json(app.executions.rerun_rule_group(id, &rule_group, timeout).await?)
        }
        "executions.list" => json(app.executions.list()?),
        "executions.load" => {
            let IdParams { id } = params(raw)?;
            json(app.executions.load(id)?)
        }
        "executions.delete" => {
            let IdParams { id } = params(raw)?;
            app.executions.delete(id)?;
            Ok(serde_json::json!({ "deleted": id }))
        }

        other => Err(anyhow!("Unknown method: {other}")),
    }
}
