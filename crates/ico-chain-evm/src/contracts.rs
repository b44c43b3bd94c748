use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolCall, sol};
use anyhow::{Context, Result};
use async_trait::async_trait;
use ico_api_types::TokenAmount;
use ico_chain_client::{NftLedger, ProviderHandle, SignerHandle, TokenLedger};
use tracing::info;

sol! {
    interface ICryptoDevToken {
        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function tokenIdsClaimed(uint256 tokenId) external view returns (bool);
        function mint(uint256 amount) external payable;
        function claim() external;
    }

    interface ICryptoDevs {
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
    }
}

/// Crypto Dev token contract reached through the session's provider.
pub struct CryptoDevTokenLedger {
    address: Address,
}

impl CryptoDevTokenLedger {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl TokenLedger for CryptoDevTokenLedger {
    async fn balance_of(&self, reader: &ProviderHandle, owner: Address) -> Result<TokenAmount> {
        let call = ICryptoDevToken::balanceOfCall { account: owner };
        let out = reader.call(self.address, call.abi_encode().into()).await?;
        let balance = ICryptoDevToken::balanceOfCall::abi_decode_returns(&out)
            .context("token balanceOf decode")?;
        Ok(TokenAmount(balance))
    }

    async fn total_supply(&self, reader: &ProviderHandle) -> Result<TokenAmount> {
        let call = ICryptoDevToken::totalSupplyCall {};
        let out = reader.call(self.address, call.abi_encode().into()).await?;
        let supply = ICryptoDevToken::totalSupplyCall::abi_decode_returns(&out)
            .context("token totalSupply decode")?;
        Ok(TokenAmount(supply))
    }

    async fn token_ids_claimed(&self, reader: &ProviderHandle, token_id: U256) -> Result<bool> {
        let call = ICryptoDevToken::tokenIdsClaimedCall { tokenId: token_id };
        let out = reader.call(self.address, call.abi_encode().into()).await?;
        ICryptoDevToken::tokenIdsClaimedCall::abi_decode_returns(&out)
            .context("token tokenIdsClaimed decode")
    }

    async fn mint(&self, signer: &SignerHandle, amount: TokenAmount, payment: U256) -> Result<B256> {
        let call = ICryptoDevToken::mintCall { amount: amount.0 };
        let tx_hash = signer
            .send_transaction(self.address, call.abi_encode().into(), payment)
            .await?;
        info!(%tx_hash, %amount, %payment, "mint submitted");
        Ok(tx_hash)
    }

    async fn claim(&self, signer: &SignerHandle) -> Result<B256> {
        let call = ICryptoDevToken::claimCall {};
        let tx_hash = signer
            .send_transaction(self.address, call.abi_encode().into(), U256::ZERO)
            .await?;
        info!(%tx_hash, "claim submitted");
        Ok(tx_hash)
    }
}

/// Crypto Devs NFT collection (ERC-721 enumerable).
pub struct CryptoDevsNftLedger {
    address: Address,
}

impl CryptoDevsNftLedger {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl NftLedger for CryptoDevsNftLedger {
    async fn balance_of(&self, reader: &ProviderHandle, owner: Address) -> Result<U256> {
        let call = ICryptoDevs::balanceOfCall { owner };
        let out = reader.call(self.address, call.abi_encode().into()).await?;
        ICryptoDevs::balanceOfCall::abi_decode_returns(&out).context("nft balanceOf decode")
    }

    async fn token_of_owner_by_index(
        &self,
        reader: &ProviderHandle,
        owner: Address,
        index: U256,
    ) -> Result<U256> {
        let call = ICryptoDevs::tokenOfOwnerByIndexCall { owner, index };
        let out = reader.call(self.address, call.abi_encode().into()).await?;
        ICryptoDevs::tokenOfOwnerByIndexCall::abi_decode_returns(&out)
            .context("nft tokenOfOwnerByIndex decode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use anyhow::bail;
    use ico_chain_client::Eip1193Provider;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    /// Answers `eth_call` by selector with fixed ABI words.
    #[derive(Default)]
    struct SelectorProvider {
        calls: Mutex<Vec<Value>>,
    }

    fn word(value: u64) -> String {
        format!("0x{:064x}", value)
    }

    #[async_trait]
    impl Eip1193Provider for SelectorProvider {
        async fn request(&self, method: &str, params: Value) -> Result<Value> {
            self.calls.lock().unwrap().push(params.clone());
            match method {
                "eth_call" => {
                    let data = params[0]["data"].as_str().unwrap_or_default().to_owned();
                    let selector = &data[..10];
                    let answer = match selector {
                        s if s == hex::encode_prefixed(ICryptoDevToken::balanceOfCall::SELECTOR) => {
                            word(5)
                        }
                        s if s == hex::encode_prefixed(ICryptoDevToken::totalSupplyCall::SELECTOR) => {
                            word(1_000)
                        }
                        s if s == hex::encode_prefixed(ICryptoDevToken::tokenIdsClaimedCall::SELECTOR) => {
                            word(1)
                        }
                        s if s == hex::encode_prefixed(ICryptoDevs::tokenOfOwnerByIndexCall::SELECTOR) => {
                            word(9)
                        }
                        other => bail!("unexpected selector {other}"),
                    };
                    Ok(json!(answer))
                }
                "eth_sendTransaction" => Ok(json!(B256::repeat_byte(0x22).to_string())),
                other => bail!("unexpected method {other}"),
            }
        }
    }

    #[test]
    fn selectors_match_the_deployed_abi() {
        assert_eq!(ICryptoDevToken::balanceOfCall::SELECTOR, [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(ICryptoDevToken::totalSupplyCall::SELECTOR, [0x18, 0x16, 0x0d, 0xdd]);
        assert_eq!(ICryptoDevToken::mintCall::SELECTOR, [0xa0, 0x71, 0x2d, 0x68]);
        assert_eq!(
            ICryptoDevToken::tokenIdsClaimedCall::SELECTOR,
            [0x5f, 0x36, 0x90, 0xaf]
        );
        assert_eq!(ICryptoDevToken::claimCall::SELECTOR, [0x4e, 0x71, 0xd9, 0x2d]);
        assert_eq!(
            ICryptoDevs::tokenOfOwnerByIndexCall::SELECTOR,
            [0x2f, 0x74, 0x5c, 0x59]
        );
    }

    #[tokio::test]
    async fn token_reads_decode_return_words() {
        let provider = Arc::new(SelectorProvider::default());
        let reader = ProviderHandle::new(provider.clone());
        let ledger = CryptoDevTokenLedger::new(Address::with_last_byte(0x10));

        let balance = ledger
            .balance_of(&reader, Address::with_last_byte(0xaa))
            .await
            .unwrap();
        assert_eq!(balance, TokenAmount::from_u64(5));
        assert_eq!(
            ledger.total_supply(&reader).await.unwrap(),
            TokenAmount::from_u64(1_000)
        );
        assert!(ledger.token_ids_claimed(&reader, U256::from(7u64)).await.unwrap());

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0][0]["to"], json!(Address::with_last_byte(0x10).to_string()));
        assert_eq!(calls[0][1], json!("latest"));
    }

    #[tokio::test]
    async fn nft_index_lookup_decodes_token_id() {
        let provider = Arc::new(SelectorProvider::default());
        let reader = ProviderHandle::new(provider);
        let ledger = CryptoDevsNftLedger::new(Address::with_last_byte(0x20));

        let id = ledger
            .token_of_owner_by_index(&reader, Address::with_last_byte(0xaa), U256::from(0u64))
            .await
            .unwrap();
        assert_eq!(id, U256::from(9u64));
    }

    #[tokio::test]
    async fn mint_attaches_payment_to_the_transaction() {
        let provider = Arc::new(SelectorProvider::default());
        let signer = SignerHandle::new(
            ProviderHandle::new(provider.clone()),
            Address::with_last_byte(0xaa),
        );
        let ledger = CryptoDevTokenLedger::new(Address::with_last_byte(0x10));

        let payment = U256::from(5_000_000_000_000_000u64);
        ledger
            .mint(&signer, TokenAmount::from_u64(5), payment)
            .await
            .unwrap();

        let calls = provider.calls.lock().unwrap();
        let tx = &calls[0][0];
        assert_eq!(tx["value"], json!("0x11c37937e08000"));
        assert!(tx["data"].as_str().unwrap().starts_with("0xa0712d68"));
    }
}
