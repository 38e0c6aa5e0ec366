//! JSON-RPC 2.0 over HTTP

use crate::methods::{
    handle_get_consensus_nodes, handle_get_graph, handle_get_health, handle_get_round, handle_submit_snapshot,
    RpcContext, RpcError, SubmitSnapshotRequest,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn from_result(id: Value, result: Result<Value, RpcError>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => (
                None,
                Some(JsonRpcError {
                    code: error_code(&e),
                    message: e.to_string(),
                }),
            ),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        }
    }
}

/// Serves the kernel JSON-RPC methods on `POST /`
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    pub fn router(self) -> Router {
        // browser clients may call the node directly
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Kernel RPC listening on {}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let result = dispatch_method(&context, &request.method, request.params);
    if let Err(e) = &result {
        tracing::debug!("RPC {} failed: {}", request.method, e);
    }
    (StatusCode::OK, Json(JsonRpcResponse::from_result(request.id, result)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}

/// Positional params; the first is the primary argument
pub(crate) fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    match method {
        "getGraph" => to_value(handle_get_graph(ctx)?),

        "getConsensusNodes" => to_value(handle_get_consensus_nodes(ctx)?),

        "getRound" => {
            let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();
            let node_id = params
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::InvalidParams("Missing node id".to_string()))?;

            to_value(handle_get_round(ctx, node_id)?)
        }

        "submitSnapshot" => {
            let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();
            let snapshot = params
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::InvalidParams("Missing snapshot".to_string()))?;
            let transaction = params.get(1).and_then(|v| v.as_str()).map(String::from);

            let request = SubmitSnapshotRequest {
                snapshot: snapshot.to_string(),
                transaction,
            };
            to_value(handle_submit_snapshot(ctx, request)?)
        }

        "getHealth" => Ok(json!(handle_get_health(ctx)?)),

        "getVersion" => Ok(json!({
            "kernel-version": env!("CARGO_PKG_VERSION"),
            "network": ctx.network_id,
        })),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

/// Map error to JSON-RPC error code
fn error_code(error: &RpcError) -> i32 {
    match error {
        RpcError::InvalidParams(_) => -32602,
        RpcError::MethodNotFound(_) => -32601,
        RpcError::InternalError(_) => -32603,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use ed25519_dalek::SigningKey;
    use kernel::{Genesis, GenesisNode, Kernel, KernelConfig, ManualClock, ProcessorConfig, SnapshotProcessor, SECOND};
    use kernel_common::transaction::xin_asset_id;
    use kernel_common::{Integer, Key, OutputType, Snapshot, Transaction};
    use kernel_storage::MemoryStore;
    use std::sync::atomic::Ordering;

    const EPOCH: u64 = 1_700_000_000 * SECOND;

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn setup() -> (SnapshotProcessor, Arc<RpcContext>) {
        let keys: Vec<SigningKey> = (1..=2).map(signing_key).collect();
        let genesis = Genesis {
            epoch: EPOCH,
            nodes: keys
                .iter()
                .map(|k| {
                    let signer = Key::from_signing_key(k);
                    GenesisNode {
                        signer,
                        payee: Key(*signer.hash().as_bytes()),
                    }
                })
                .collect(),
        };
        let kernel = Kernel::new(
            Arc::new(MemoryStore::new()),
            &genesis,
            &Key::from_signing_key(&keys[0]),
            KernelConfig::default(),
            Arc::new(ManualClock::new(EPOCH)),
        )
        .unwrap();

        let processor = SnapshotProcessor::new(kernel, ProcessorConfig::default());
        processor.running_flag().store(true, Ordering::SeqCst);
        let context = Arc::new(RpcContext {
            reader: processor.reader(),
            snapshot_sender: processor.snapshot_sender(),
            network_id: processor.kernel().network_id(),
            processor_running: processor.running_flag(),
        });
        (processor, context)
    }

    fn script_snapshot(ctx: &RpcContext) -> (Snapshot, Transaction) {
        let signer = signing_key(1);
        let mut tx = Transaction::new(xin_asset_id());
        tx.add_output(OutputType::Script, Integer::new(1), vec![]);
        let node_id = Key::from_signing_key(&signer).node_id(&ctx.network_id);
        let mut snapshot = Snapshot::new(node_id, 1, EPOCH + 10 * SECOND, tx.hash());
        snapshot.sign(&signer);
        (snapshot, tx)
    }

    #[test]
    fn test_get_graph_lists_genesis_rounds() {
        let (_processor, ctx) = setup();
        let graph = dispatch_method(&ctx, "getGraph", Value::Null).unwrap();

        let nodes = graph["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        for node in nodes {
            assert_eq!(node["finalRound"]["number"], 0);
            assert_eq!(node["cacheRound"]["number"], 1);
        }
    }

    #[test]
    fn test_get_round_by_node_id() {
        let (_processor, ctx) = setup();
        let node_id = Key::from_signing_key(&signing_key(2)).node_id(&ctx.network_id);

        let round = dispatch_method(&ctx, "getRound", json!([node_id.to_string()])).unwrap();
        assert_eq!(round["nodeId"], json!(node_id.to_string()));
        assert_eq!(round["cacheRound"]["number"], 1);

        let unknown = Key::from_signing_key(&signing_key(9)).node_id(&ctx.network_id);
        let missing = dispatch_method(&ctx, "getRound", json!([unknown.to_string()])).unwrap();
        assert!(missing.is_null());

        let err = dispatch_method(&ctx, "getRound", json!(["zz"])).unwrap_err();
        assert_eq!(error_code(&err), -32602);
    }

    #[test]
    fn test_get_consensus_nodes() {
        let (_processor, ctx) = setup();
        let nodes = dispatch_method(&ctx, "getConsensusNodes", Value::Null).unwrap();

        assert_eq!(nodes["epoch"], 1);
        assert_eq!(nodes["nodes"].as_array().unwrap().len(), 2);
        assert!(nodes["pledging"].is_null());
        assert_eq!(nodes["nodes"][0]["state"], json!("Accepted"));
    }

    #[test]
    fn test_submit_snapshot_is_queued_and_applied() {
        let (mut processor, ctx) = setup();
        let (snapshot, tx) = script_snapshot(&ctx);

        let params = json!([BASE64.encode(snapshot.to_bytes()), BASE64.encode(tx.to_bytes())]);
        let result = dispatch_method(&ctx, "submitSnapshot", params).unwrap();
        assert_eq!(result["snapshot"], json!(snapshot.hash().to_string()));

        let outcomes = processor.drain().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_accepted());

        let round = dispatch_method(&ctx, "getRound", json!([snapshot.node_id.to_string()])).unwrap();
        assert_eq!(round["cacheRound"]["snapshots"], json!([snapshot.hash().to_string()]));
    }

    #[test]
    fn test_submit_snapshot_rejects_bad_payloads() {
        let (_processor, ctx) = setup();
        let (snapshot, _) = script_snapshot(&ctx);

        let err = dispatch_method(&ctx, "submitSnapshot", json!(["not base64!"])).unwrap_err();
        assert_eq!(error_code(&err), -32602);

        let err = dispatch_method(&ctx, "submitSnapshot", json!([BASE64.encode([1u8, 2, 3])])).unwrap_err();
        assert_eq!(error_code(&err), -32602);

        let mut other = Transaction::new(xin_asset_id());
        other.add_output(OutputType::Script, Integer::new(2), vec![]);
        let params = json!([BASE64.encode(snapshot.to_bytes()), BASE64.encode(other.to_bytes())]);
        let err = dispatch_method(&ctx, "submitSnapshot", params).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = JsonRpcResponse::from_result(json!(7), Err(RpcError::MethodNotFound("getSlot".to_string())));
        let value = serde_json::to_value(response).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_health_and_unknown_method() {
        let (processor, ctx) = setup();
        assert_eq!(dispatch_method(&ctx, "getHealth", Value::Null).unwrap(), json!("ok"));

        processor.stop();
        let err = dispatch_method(&ctx, "getHealth", Value::Null).unwrap_err();
        assert_eq!(error_code(&err), -32603);

        let err = dispatch_method(&ctx, "getSlot", Value::Null).unwrap_err();
        assert_eq!(error_code(&err), -32601);
    }
}
