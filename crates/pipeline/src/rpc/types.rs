//! JSON-RPC 2.0 envelopes and the block shape the replay reads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request envelope. `params` is whatever the method takes, usually a JSON
/// array.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<T> {
    // Always "2.0".
    pub jsonrpc: &'static str,
    // Echoed back by the node.
    pub id: u64,
    pub method: &'static str,
    pub params: T,
}

impl<T> JsonRpcRequest<T> {
    pub fn new(id: u64, method: &'static str, params: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Response envelope. Exactly one of `result` and `error` is set by a
/// well-behaved node; a `null` result (unknown block) is not an error.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// The parts of `eth_getBlockByNumber` (full transactions) the replay uses.
#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    // Both quantities stay hex strings; the normalizer decodes them.
    pub number: String,
    pub timestamp: String,
    // Full transaction objects, kept untyped so unknown fields pass through.
    #[serde(default)]
    pub transactions: Vec<Map<String, Value>>,
}
