use alloy_primitives::{Address, B256, Bytes, U256, hex};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use ico_api_types::{NetworkId, TokenAmount};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// EIP-1193 style request surface of a wallet provider.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// Options handed to the provider modal when it is first built.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderModalOptions {
    pub network: String,
    #[serde(default)]
    pub provider_options: serde_json::Map<String, Value>,
    #[serde(default)]
    pub disable_injected_provider: bool,
}

/// Wallet selection: turns modal options into a live provider.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect(&self, options: &ProviderModalOptions) -> Result<Arc<dyn Eip1193Provider>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Read-only accessor over a connected provider.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Arc<dyn Eip1193Provider>,
}

impl ProviderHandle {
    pub fn new(provider: Arc<dyn Eip1193Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Eip1193Provider> {
        &self.provider
    }

    pub async fn chain_id(&self) -> Result<NetworkId> {
        let raw = self
            .provider
            .request("eth_chainId", json!([]))
            .await
            .context("eth_chainId")?;
        Ok(NetworkId(parse_quantity(&raw)?))
    }

    pub async fn request_accounts(&self) -> Result<Vec<Address>> {
        let raw = self
            .provider
            .request("eth_requestAccounts", json!([]))
            .await
            .context("eth_requestAccounts")?;
        let accounts: Vec<String> =
            serde_json::from_value(raw).context("eth_requestAccounts response")?;
        accounts
            .iter()
            .map(|account| {
                account
                    .parse::<Address>()
                    .with_context(|| format!("invalid account address {account}"))
            })
            .collect()
    }

    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let params = json!([
            { "to": to.to_string(), "data": hex::encode_prefixed(&data) },
            "latest"
        ]);
        let raw = self
            .provider
            .request("eth_call", params)
            .await
            .context("eth_call")?;
        parse_bytes(&raw)
    }

    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<TxReceipt>> {
        let raw = self
            .provider
            .request("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
            .await
            .context("eth_getTransactionReceipt")?;
        if raw.is_null() {
            return Ok(None);
        }

        let status = raw
            .get("status")
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(1);
        let block_number = match raw.get("blockNumber") {
            Some(value) if !value.is_null() => Some(parse_quantity(value)?),
            _ => None,
        };

        Ok(Some(TxReceipt {
            tx_hash,
            success: status == 1,
            block_number,
        }))
    }
}

/// Accessor able to authorize transactions for one account.
#[derive(Clone)]
pub struct SignerHandle {
    reader: ProviderHandle,
    address: Address,
}

impl SignerHandle {
    pub fn new(reader: ProviderHandle, address: Address) -> Self {
        Self { reader, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn reader(&self) -> &ProviderHandle {
        &self.reader
    }

    pub async fn send_transaction(&self, to: Address, data: Bytes, value: U256) -> Result<B256> {
        let params = json!([{
            "from": self.address.to_string(),
            "to": to.to_string(),
            "data": hex::encode_prefixed(&data),
            "value": format!("{value:#x}"),
        }]);
        let raw = self
            .reader
            .provider
            .request("eth_sendTransaction", params)
            .await
            .context("eth_sendTransaction")?;
        let hash = raw
            .as_str()
            .ok_or_else(|| anyhow!("eth_sendTransaction returned a non-string hash"))?;
        hash.parse::<B256>()
            .with_context(|| format!("invalid transaction hash {hash}"))
    }

    /// Polls for the receipt until the transaction is mined.
    pub async fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        poll_interval: Duration,
    ) -> Result<TxReceipt> {
        loop {
            if let Some(receipt) = self.reader.transaction_receipt(tx_hash).await? {
                return Ok(receipt);
            }
            debug!(%tx_hash, "transaction pending");
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Either kind of accessor handed out by the session.
#[derive(Clone)]
pub enum Accessor {
    Provider(ProviderHandle),
    Signer(SignerHandle),
}

impl Accessor {
    pub fn reader(&self) -> &ProviderHandle {
        match self {
            Self::Provider(reader) => reader,
            Self::Signer(signer) => signer.reader(),
        }
    }

    pub fn into_signer(self) -> Option<SignerHandle> {
        match self {
            Self::Provider(_) => None,
            Self::Signer(signer) => Some(signer),
        }
    }
}

/// Fungible token ledger with NFT-backed free claims.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance_of(&self, reader: &ProviderHandle, owner: Address) -> Result<TokenAmount>;
    async fn total_supply(&self, reader: &ProviderHandle) -> Result<TokenAmount>;
    async fn token_ids_claimed(&self, reader: &ProviderHandle, token_id: U256) -> Result<bool>;
    async fn mint(&self, signer: &SignerHandle, amount: TokenAmount, payment: U256) -> Result<B256>;
    async fn claim(&self, signer: &SignerHandle) -> Result<B256>;
}

/// Enumerable NFT ledger.
#[async_trait]
pub trait NftLedger: Send + Sync {
    async fn balance_of(&self, reader: &ProviderHandle, owner: Address) -> Result<U256>;
    async fn token_of_owner_by_index(
        &self,
        reader: &ProviderHandle,
        owner: Address,
        index: U256,
    ) -> Result<U256>;
}

/// Parses a JSON-RPC hex quantity (`"0x4"`) into a `u64`.
pub fn parse_quantity(value: &Value) -> Result<u64> {
    let text = value
        .as_str()
        .ok_or_else(|| anyhow!("expected hex quantity, got {value}"))?;
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("hex quantity without 0x prefix: {text}"))?;
    if digits.is_empty() {
        bail!("empty hex quantity");
    }
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {text}"))
}

pub fn parse_bytes(value: &Value) -> Result<Bytes> {
    let text = value
        .as_str()
        .ok_or_else(|| anyhow!("expected hex data, got {value}"))?;
    let decoded = hex::decode(text).with_context(|| format!("invalid hex data {text}"))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct ScriptedProvider {
        receipts: Mutex<Vec<Value>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Eip1193Provider for ScriptedProvider {
        async fn request(&self, method: &str, params: Value) -> Result<Value> {
            self.requests
                .lock()
                .await
                .push((method.to_owned(), params.clone()));
            match method {
                "eth_chainId" => Ok(json!("0x4")),
                "eth_requestAccounts" => {
                    Ok(json!(["0x00000000000000000000000000000000000000aa"]))
                }
                "eth_sendTransaction" => Ok(json!(format!("{}", B256::repeat_byte(0x11)))),
                "eth_getTransactionReceipt" => {
                    let mut receipts = self.receipts.lock().await;
                    Ok(if receipts.is_empty() {
                        Value::Null
                    } else {
                        receipts.remove(0)
                    })
                }
                other => bail!("unexpected method {other}"),
            }
        }
    }

    fn scripted(receipts: Vec<Value>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            receipts: Mutex::new(receipts),
            requests: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn parse_quantity_accepts_hex_and_rejects_decimal() {
        assert_eq!(parse_quantity(&json!("0x4")).unwrap(), 4);
        assert_eq!(parse_quantity(&json!("0xaa36a7")).unwrap(), 11_155_111);
        assert!(parse_quantity(&json!("4")).is_err());
        assert!(parse_quantity(&json!("0x")).is_err());
        assert!(parse_quantity(&json!(4)).is_err());
    }

    #[tokio::test]
    async fn chain_id_and_accounts_are_decoded() {
        let provider = scripted(Vec::new());
        let handle = ProviderHandle::new(provider);

        assert_eq!(handle.chain_id().await.unwrap(), NetworkId(4));
        let accounts = handle.request_accounts().await.unwrap();
        assert_eq!(accounts, vec![Address::with_last_byte(0xaa)]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_confirmation_polls_until_receipt() {
        let provider = scripted(vec![
            Value::Null,
            json!({ "status": "0x0", "blockNumber": "0x10" }),
        ]);
        let signer = SignerHandle::new(
            ProviderHandle::new(provider.clone()),
            Address::with_last_byte(0xaa),
        );

        let tx_hash = signer
            .send_transaction(Address::with_last_byte(0x01), Bytes::new(), U256::from(1000u64))
            .await
            .unwrap();
        let receipt = signer
            .wait_for_confirmation(tx_hash, Duration::from_millis(500))
            .await
            .unwrap();

        assert!(!receipt.success);
        assert_eq!(receipt.block_number, Some(16));

        let requests = provider.requests.lock().await;
        let sent = &requests[0].1[0];
        assert_eq!(sent["value"], json!("0x3e8"));
        let receipt_polls = requests
            .iter()
            .filter(|(method, _)| method == "eth_getTransactionReceipt")
            .count();
        assert_eq!(receipt_polls, 2);
    }
}
