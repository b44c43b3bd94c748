use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use ico_chain_client::{Eip1193Provider, ProviderModalOptions, WalletConnector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

mod contracts;

pub use contracts::{CryptoDevTokenLedger, CryptoDevsNftLedger};

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// EIP-1193 provider speaking JSON-RPC 2.0 over HTTP.
///
/// Reads `ICO_RPC_URL` from environment when no endpoint is given
/// (default: `http://localhost:8545`).
pub struct JsonRpcProvider {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for JsonRpcProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl JsonRpcProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("ICO_RPC_URL").ok())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ── JSON-RPC envelope ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

fn decode_response(expected_id: u64, method: &str, body: &str) -> Result<Value> {
    let response: RpcResponse = serde_json::from_str(body)
        .with_context(|| format!("{method}: malformed JSON-RPC response"))?;

    if response.jsonrpc != "2.0" {
        bail!("{method}: wrong jsonrpc version {}", response.jsonrpc);
    }
    if response.id.as_u64() != Some(expected_id) {
        bail!("{method}: response id {} does not match request {expected_id}", response.id);
    }
    if let Some(err) = response.error {
        bail!("{method}: provider error {}: {}", err.code, err.message);
    }

    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl Eip1193Provider for JsonRpcProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} transport"))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("{method} response body"))?;
        if !status.is_success() {
            bail!("{method} HTTP {status}: {text}");
        }

        decode_response(id, method, &text)
    }
}

/// Wallet selection backed by JSON-RPC endpoints.
///
/// An explicit entry in `provider_options` wins; otherwise the injected
/// endpoint is used unless the modal disables it.
pub struct HttpWalletConnector {
    injected_endpoint: Option<String>,
}

impl HttpWalletConnector {
    pub fn new(injected_endpoint: Option<String>) -> Self {
        Self { injected_endpoint }
    }

    pub fn select_endpoint(&self, options: &ProviderModalOptions) -> Result<String> {
        for (name, entry) in &options.provider_options {
            if let Some(url) = endpoint_from_entry(entry) {
                info!(provider = %name, network = %options.network, "using configured wallet provider");
                return Ok(url.to_owned());
            }
            warn!(provider = %name, "provider option has no usable endpoint, skipping");
        }

        if options.disable_injected_provider {
            return Err(anyhow!(
                "no wallet provider available: injected provider disabled and no provider options configured"
            ));
        }

        self.injected_endpoint
            .clone()
            .ok_or_else(|| anyhow!("no injected wallet provider detected"))
    }
}

fn endpoint_from_entry(entry: &Value) -> Option<&str> {
    if let Some(url) = entry.get("url").and_then(Value::as_str) {
        return Some(url);
    }
    entry
        .get("options")
        .and_then(|options| options.get("rpc"))
        .and_then(Value::as_object)
        .and_then(|rpc| rpc.values().find_map(Value::as_str))
}

#[async_trait]
impl WalletConnector for HttpWalletConnector {
    async fn connect(&self, options: &ProviderModalOptions) -> Result<Arc<dyn Eip1193Provider>> {
        let endpoint = self.select_endpoint(options)?;
        info!(%endpoint, network = %options.network, "wallet provider selected");
        Ok(Arc::new(JsonRpcProvider::new(Some(endpoint))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn modal(provider_options: Value, disable_injected_provider: bool) -> ProviderModalOptions {
        ProviderModalOptions {
            network: "rinkeby".to_owned(),
            provider_options: provider_options.as_object().cloned().unwrap_or_default(),
            disable_injected_provider,
        }
    }

    #[test]
    fn decode_response_returns_result() {
        let body = r#"{"jsonrpc":"2.0","id":7,"result":"0x4"}"#;
        assert_eq!(decode_response(7, "eth_chainId", body).unwrap(), json!("0x4"));
    }

    #[test]
    fn decode_response_rejects_mismatched_id_and_errors() {
        let body = r#"{"jsonrpc":"2.0","id":8,"result":"0x4"}"#;
        assert!(decode_response(7, "eth_chainId", body).is_err());

        let body = r#"{"jsonrpc":"2.0","id":7,"error":{"code":4001,"message":"User rejected the request."}}"#;
        let err = decode_response(7, "eth_requestAccounts", body).unwrap_err();
        assert!(err.to_string().contains("4001"));

        let body = r#"{"jsonrpc":"1.0","id":7,"result":null}"#;
        assert!(decode_response(7, "eth_call", body).is_err());
    }

    #[tokio::test]
    async fn truncated_body_is_a_read_failure() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"jsonrpc\"",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let provider = JsonRpcProvider::new(Some(format!("http://{addr}")));
        let err = provider.request("eth_chainId", json!([])).await.unwrap_err();
        let chain = format!("{err:#}");

        assert!(chain.contains("eth_chainId response body"), "{chain}");
        assert!(!chain.contains("malformed"), "{chain}");
    }

    #[test]
    fn null_result_is_passed_through() {
        let body = r#"{"jsonrpc":"2.0","id":3,"result":null}"#;
        assert!(decode_response(3, "eth_getTransactionReceipt", body)
            .unwrap()
            .is_null());
    }

    #[test]
    fn injected_endpoint_is_the_default() {
        let connector = HttpWalletConnector::new(Some("http://node:8545".to_owned()));
        let endpoint = connector.select_endpoint(&modal(json!({}), false)).unwrap();
        assert_eq!(endpoint, "http://node:8545");
    }

    #[test]
    fn provider_options_take_precedence() {
        let connector = HttpWalletConnector::new(Some("http://node:8545".to_owned()));
        let options = modal(
            json!({ "walletconnect": { "options": { "rpc": { "4": "http://wc:8545" } } } }),
            false,
        );
        assert_eq!(connector.select_endpoint(&options).unwrap(), "http://wc:8545");

        let options = modal(json!({ "custom": { "url": "http://custom:8545" } }), true);
        assert_eq!(
            connector.select_endpoint(&options).unwrap(),
            "http://custom:8545"
        );
    }

    #[test]
    fn disabled_injected_provider_without_options_fails() {
        let connector = HttpWalletConnector::new(Some("http://node:8545".to_owned()));
        assert!(connector.select_endpoint(&modal(json!({}), true)).is_err());

        let connector = HttpWalletConnector::new(None);
        assert!(connector.select_endpoint(&modal(json!({}), false)).is_err());
    }
}
