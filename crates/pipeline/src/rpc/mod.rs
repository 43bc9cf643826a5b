//! Ethereum JSON-RPC chain reader used by the replay scheduler. Each chain
//! id maps to its own node endpoint; requests for an unmapped chain fail
//! instead of silently reading another chain.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    normalizer::hex_to_decimal,
    replay::{ReplayError, ReplaySource},
};

mod types;

pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcBlock};

pub struct RpcReplaySource {
    client: reqwest::Client,
    endpoints: BTreeMap<u64, String>,
    next_id: AtomicU64,
}

impl RpcReplaySource {
    pub fn new(endpoints: BTreeMap<u64, String>, timeout: Duration) -> Result<Self, ReplayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoints,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self, chain_id: u64) -> Result<&str, ReplayError> {
        self.endpoints
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(ReplayError::UnknownChain(chain_id))
    }

    /// Sends one request to `chain_id`'s node. A `null` result comes back
    /// as `None`.
    async fn call<P, R>(
        &self,
        chain_id: u64,
        method: &'static str,
        params: P,
    ) -> Result<Option<R>, ReplayError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let url = self.endpoint(chain_id)?;
        let request = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let result = self.send(url, &request).await;
        let label = if result.is_ok() { "ok" } else { "error" };
        counter!(
            "replay_rpc_calls_total",
            "chain" => chain_id.to_string(),
            "method" => method,
            "result" => label
        )
        .increment(1);
        result
    }

    async fn send<P, R>(&self, url: &str, request: &JsonRpcRequest<P>) -> Result<Option<R>, ReplayError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let response: JsonRpcResponse<R> = self
            .client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ReplayError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result)
    }
}

#[async_trait]
impl ReplaySource for RpcReplaySource {
    async fn latest_block(&self, chain_id: u64) -> Result<u64, ReplayError> {
        let hex: String = self
            .call(chain_id, "eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| ReplayError::Source("eth_blockNumber returned no result".into()))?;
        let block = parse_quantity(&hex)?;
        debug!(chain_id, block, "latest block");
        Ok(block)
    }

    async fn fetch_events(
        &self,
        chain_id: u64,
        start: u64,
        end: u64,
    ) -> Result<Vec<Value>, ReplayError> {
        let mut events = Vec::new();
        // One request per block; pruned or future blocks come back `null`
        // and are skipped rather than failing the slice.
        for number in start..=end {
            let block: Option<RpcBlock> = self
                .call(
                    chain_id,
                    "eth_getBlockByNumber",
                    json!([format!("0x{number:x}"), true]),
                )
                .await?;
            let Some(block) = block else {
                debug!(chain_id, block = number, "block not available");
                continue;
            };
            events.extend(block_events(block));
        }
        Ok(events)
    }
}

/// Turns the block's transactions into normalizer input: the block timestamp
/// is attached and the hex `value` becomes a decimal string.
pub fn block_events(block: RpcBlock) -> Vec<Value> {
    block
        .transactions
        .into_iter()
        .map(|mut tx| {
            tx.insert("timestamp".into(), Value::String(block.timestamp.clone()));
            tx.entry("blockNumber")
                .or_insert_with(|| Value::String(block.number.clone()));
            if let Some(decimal) = tx
                .get("value")
                .and_then(Value::as_str)
                .and_then(hex_to_decimal)
            {
                tx.insert("value".into(), Value::String(decimal));
            }
            Value::Object(tx)
        })
        .collect()
}

fn parse_quantity(hex: &str) -> Result<u64, ReplayError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    u64::from_str_radix(digits, 16)
        .map_err(|err| ReplayError::Source(format!("invalid quantity `{hex}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::EventNormalizer;

    fn block() -> RpcBlock {
        serde_json::from_value(json!({
            "number": "0x10",
            "timestamp": "0x659e5fc0",
            "transactions": [
                {
                    "hash": "0xabc",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": "0x2222222222222222222222222222222222222222",
                    "value": "0xde0b6b3a7640000",
                    "input": "0x"
                },
                {
                    "hash": "0xdef",
                    "from": "0x1111111111111111111111111111111111111111",
                    "to": null,
                    "value": "0x0",
                    "blockNumber": "0x10"
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn block_transactions_become_normalizer_input() {
        let events = block_events(block());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["value"], "1000000000000000000");
        assert_eq!(events[0]["timestamp"], "0x659e5fc0");
        assert_eq!(events[0]["blockNumber"], "0x10");

        let normalizer = EventNormalizer::new();
        let first = normalizer.normalize(1, &events[0]).unwrap();
        assert_eq!(first.timestamp, 0x659e5fc0);
        assert_eq!(first.block_number, 16);
        assert_eq!(first.value, "1000000000000000000");

        let creation = normalizer.normalize(1, &events[1]).unwrap();
        assert!(creation.is_contract_creation);
        assert_eq!(creation.value, "0");
    }

    #[test]
    fn request_serializes_as_json_rpc() {
        let request = JsonRpcRequest::new(7, "eth_blockNumber", json!([]));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "eth_blockNumber", "params": []})
        );
    }

    #[test]
    fn error_responses_deserialize() {
        let response: JsonRpcResponse<String> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "header not found"}
        }))
        .unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32000);
    }

    #[tokio::test]
    async fn unmapped_chain_is_rejected_before_any_request() {
        let source = RpcReplaySource::new(
            BTreeMap::from([
                (1, "http://mainnet:8545".to_string()),
                (56, "http://bsc:8545".to_string()),
            ]),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(source.endpoint(1).unwrap(), "http://mainnet:8545");
        assert_eq!(source.endpoint(56).unwrap(), "http://bsc:8545");
        assert!(matches!(
            source.latest_block(137).await.unwrap_err(),
            ReplayError::UnknownChain(137)
        ));
        assert!(matches!(
            source.fetch_events(137, 0, 1).await.unwrap_err(),
            ReplayError::UnknownChain(137)
        ));
    }

    #[test]
    fn quantities_parse_from_hex() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert!(parse_quantity("0xzz").is_err());
    }
}
