//! In-memory chain used by tests across the workspace.
//!
//! One `InMemoryChain` plays every external collaborator at once: the
//! wallet connector, the EIP-1193 provider it hands out, the token ledger
//! and the NFT ledger. Transactions are mined immediately.

use crate::{
    Eip1193Provider, NftLedger, ProviderHandle, ProviderModalOptions, SignerHandle, TokenLedger,
    WalletConnector,
};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ico_api_types::TokenAmount;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// 10^18, one whole token in its smallest unit.
pub fn one_token() -> U256 {
    U256::from(10u64).pow(U256::from(18u64))
}

#[derive(Debug, Default)]
pub struct ChainState {
    pub chain_id: u64,
    pub accounts: Vec<Address>,
    pub balances: HashMap<Address, U256>,
    pub total_supply: U256,
    pub claimed_ids: HashSet<U256>,
    pub nfts: HashMap<Address, Vec<U256>>,
    pub receipts: HashMap<B256, bool>,
    /// Receipts are reported as pending while set.
    pub hold_receipts: bool,
    pub reject_connect: bool,
    pub fail_token_reads: bool,
    pub fail_nft_reads: bool,
    pub revert_transactions: bool,
    pub connect_calls: usize,
    pub account_requests: usize,
    pub submitted: Vec<SubmittedTx>,
    pub nft_reads: usize,
    next_tx: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmittedTx {
    Mint {
        from: Address,
        amount: TokenAmount,
        payment: U256,
    },
    Claim {
        from: Address,
    },
}

#[derive(Clone, Default)]
pub struct InMemoryChain {
    state: Arc<Mutex<ChainState>>,
}

impl InMemoryChain {
    pub fn new(chain_id: u64, account: Address) -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state();
            state.chain_id = chain_id;
            state.accounts = vec![account];
        }
        chain
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().expect("in-memory chain state poisoned")
    }

    pub fn give_nfts(&self, owner: Address, ids: &[u64]) {
        self.state()
            .nfts
            .entry(owner)
            .or_default()
            .extend(ids.iter().map(|id| U256::from(*id)));
    }

    pub fn mark_claimed(&self, ids: &[u64]) {
        self.state()
            .claimed_ids
            .extend(ids.iter().map(|id| U256::from(*id)));
    }

    pub fn set_balance(&self, owner: Address, amount: U256) {
        let mut state = self.state();
        let previous = state.balances.insert(owner, amount).unwrap_or_default();
        state.total_supply = state.total_supply - previous + amount;
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state().submitted.clone()
    }

    /// Marks every held transaction as mined.
    pub fn release_receipts(&self) {
        self.state().hold_receipts = false;
    }

    fn record(&self, tx: SubmittedTx) -> B256 {
        let mut state = self.state();
        state.next_tx += 1;
        let hash = B256::left_padding_from(&state.next_tx.to_be_bytes());
        let success = !state.revert_transactions;
        state.receipts.insert(hash, success);
        state.submitted.push(tx);
        hash
    }
}

#[async_trait]
impl Eip1193Provider for InMemoryChain {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.state();
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", state.chain_id))),
            "eth_requestAccounts" => {
                state.account_requests += 1;
                let accounts: Vec<String> =
                    state.accounts.iter().map(ToString::to_string).collect();
                Ok(json!(accounts))
            }
            "eth_getTransactionReceipt" => {
                let raw = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("missing tx hash"))?;
                let hash: B256 = raw.parse()?;
                if state.hold_receipts {
                    return Ok(Value::Null);
                }
                match state.receipts.get(&hash) {
                    Some(success) => Ok(json!({
                        "status": if *success { "0x1" } else { "0x0" },
                        "blockNumber": "0x1",
                    })),
                    None => Ok(Value::Null),
                }
            }
            other => bail!("in-memory chain does not serve {other}"),
        }
    }
}

#[async_trait]
impl WalletConnector for InMemoryChain {
    async fn connect(&self, _options: &ProviderModalOptions) -> Result<Arc<dyn Eip1193Provider>> {
        let mut state = self.state();
        state.connect_calls += 1;
        if state.reject_connect {
            bail!("user rejected the connection request");
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl TokenLedger for InMemoryChain {
    async fn balance_of(&self, _reader: &ProviderHandle, owner: Address) -> Result<TokenAmount> {
        let state = self.state();
        if state.fail_token_reads {
            bail!("token ledger unavailable");
        }
        Ok(TokenAmount(
            state.balances.get(&owner).copied().unwrap_or_default(),
        ))
    }

    async fn total_supply(&self, _reader: &ProviderHandle) -> Result<TokenAmount> {
        let state = self.state();
        if state.fail_token_reads {
            bail!("token ledger unavailable");
        }
        Ok(TokenAmount(state.total_supply))
    }

    async fn token_ids_claimed(&self, _reader: &ProviderHandle, token_id: U256) -> Result<bool> {
        let state = self.state();
        if state.fail_token_reads {
            bail!("token ledger unavailable");
        }
        Ok(state.claimed_ids.contains(&token_id))
    }

    async fn mint(&self, signer: &SignerHandle, amount: TokenAmount, payment: U256) -> Result<B256> {
        let from = signer.address();
        let hash = self.record(SubmittedTx::Mint {
            from,
            amount,
            payment,
        });
        let mut state = self.state();
        if !state.revert_transactions {
            let minted = amount.0 * one_token();
            *state.balances.entry(from).or_default() += minted;
            state.total_supply += minted;
        }
        Ok(hash)
    }

    async fn claim(&self, signer: &SignerHandle) -> Result<B256> {
        let from = signer.address();
        let hash = self.record(SubmittedTx::Claim { from });
        let mut state = self.state();
        if !state.revert_transactions {
            let owned = state.nfts.get(&from).cloned().unwrap_or_default();
            let unclaimed: Vec<U256> = owned
                .into_iter()
                .filter(|id| !state.claimed_ids.contains(id))
                .collect();
            let minted = U256::from(unclaimed.len() as u64 * 10) * one_token();
            state.claimed_ids.extend(unclaimed);
            *state.balances.entry(from).or_default() += minted;
            state.total_supply += minted;
        }
        Ok(hash)
    }
}

#[async_trait]
impl NftLedger for InMemoryChain {
    async fn balance_of(&self, _reader: &ProviderHandle, owner: Address) -> Result<U256> {
        let mut state = self.state();
        state.nft_reads += 1;
        if state.fail_nft_reads {
            bail!("nft ledger unavailable");
        }
        Ok(U256::from(state.nfts.get(&owner).map_or(0, Vec::len) as u64))
    }

    async fn token_of_owner_by_index(
        &self,
        _reader: &ProviderHandle,
        owner: Address,
        index: U256,
    ) -> Result<U256> {
        let mut state = self.state();
        state.nft_reads += 1;
        if state.fail_nft_reads {
            bail!("nft ledger unavailable");
        }
        let index: usize = index
            .try_into()
            .map_err(|_| anyhow!("owner index out of range"))?;
        state
            .nfts
            .get(&owner)
            .and_then(|ids| ids.get(index))
            .copied()
            .ok_or_else(|| anyhow!("owner index out of bounds"))
    }
}
