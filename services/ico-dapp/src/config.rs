use alloy_primitives::Address;
use anyhow::{Context, Result, anyhow};
use ico_api_types::{NetworkId, TokenAmount};
use ico_chain_client::ProviderModalOptions;
use ico_chain_evm::DEFAULT_RPC_URL;
use ico_refresher::{PRICE_PER_TOKEN_WEI, RefresherConfig};
use ico_session::SessionConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Runtime settings, read from `ICO_*` environment variables.
#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) rpc_url: String,
    pub(crate) network: String,
    pub(crate) required_chain_id: NetworkId,
    pub(crate) disable_injected_provider: bool,
    pub(crate) provider_options: serde_json::Map<String, serde_json::Value>,
    pub(crate) token_contract: Address,
    pub(crate) nft_contract: Address,
    pub(crate) poll_interval: Duration,
    pub(crate) receipt_poll_interval: Duration,
}

impl AppConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let bind_addr = var("ICO_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_owned())
            .parse::<SocketAddr>()
            .context("ICO_BIND_ADDR must be host:port")?;

        let required_chain_id = match var("ICO_REQUIRED_CHAIN_ID") {
            Some(raw) => NetworkId(
                raw.parse()
                    .with_context(|| format!("ICO_REQUIRED_CHAIN_ID is not a number: {raw}"))?,
            ),
            None => ico_session::RINKEBY_CHAIN_ID,
        };

        let disable_injected_provider = match var("ICO_DISABLE_INJECTED_PROVIDER") {
            Some(raw) => raw
                .parse::<bool>()
                .with_context(|| format!("ICO_DISABLE_INJECTED_PROVIDER must be true/false: {raw}"))?,
            None => false,
        };

        let provider_options = match var("ICO_PROVIDER_OPTIONS") {
            Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw)
                .context("ICO_PROVIDER_OPTIONS is not valid JSON")?
            {
                serde_json::Value::Object(map) => map,
                _ => return Err(anyhow!("ICO_PROVIDER_OPTIONS must be a JSON object")),
            },
            None => serde_json::Map::new(),
        };

        let token_contract = contract_address(var("ICO_TOKEN_CONTRACT"), "ICO_TOKEN_CONTRACT")?;
        let nft_contract = contract_address(var("ICO_NFT_CONTRACT"), "ICO_NFT_CONTRACT")?;

        Ok(Self {
            bind_addr,
            rpc_url: var("ICO_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_owned()),
            network: var("ICO_NETWORK").unwrap_or_else(|| "rinkeby".to_owned()),
            required_chain_id,
            disable_injected_provider,
            provider_options,
            token_contract,
            nft_contract,
            poll_interval: millis(var("ICO_POLL_INTERVAL_MS"), "ICO_POLL_INTERVAL_MS", 2_000)?,
            receipt_poll_interval: millis(
                var("ICO_RECEIPT_POLL_MS"),
                "ICO_RECEIPT_POLL_MS",
                1_000,
            )?,
        })
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            required_network: self.required_chain_id,
            modal: ProviderModalOptions {
                network: self.network.clone(),
                provider_options: self.provider_options.clone(),
                disable_injected_provider: self.disable_injected_provider,
            },
        }
    }

    pub(crate) fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig {
            poll_interval: self.poll_interval,
            receipt_poll_interval: self.receipt_poll_interval,
            price_per_token: TokenAmount::from_u64(PRICE_PER_TOKEN_WEI),
        }
    }
}

fn contract_address(raw: Option<String>, key: &str) -> Result<Address> {
    let raw = raw.ok_or_else(|| anyhow!("{key} is required"))?;
    raw.parse::<Address>()
        .with_context(|| format!("{key} is not a valid address: {raw}"))
}

fn millis(raw: Option<String>, key: &str, default: u64) -> Result<Duration> {
    let value = match raw {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{key} must be milliseconds: {raw}"))?,
        None => default,
    };
    if value == 0 {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKEN: &str = "0x00000000000000000000000000000000000000a1";
    const NFT: &str = "0x00000000000000000000000000000000000000b2";

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_target_rinkeby_with_two_second_polling() {
        let config = load(&[("ICO_TOKEN_CONTRACT", TOKEN), ("ICO_NFT_CONTRACT", NFT)]).unwrap();

        assert_eq!(config.required_chain_id, NetworkId(4));
        assert_eq!(config.network, "rinkeby");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert!(!config.disable_injected_provider);
        assert!(config.provider_options.is_empty());
        assert_eq!(config.token_contract, Address::with_last_byte(0xa1));
        assert_eq!(config.session_config().modal.network, "rinkeby");
    }

    #[test]
    fn contract_addresses_are_required() {
        let err = load(&[("ICO_NFT_CONTRACT", NFT)]).unwrap_err();
        assert!(err.to_string().contains("ICO_TOKEN_CONTRACT"));

        let err = load(&[("ICO_TOKEN_CONTRACT", TOKEN), ("ICO_NFT_CONTRACT", "nope")]).unwrap_err();
        assert!(err.to_string().contains("ICO_NFT_CONTRACT"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("ICO_TOKEN_CONTRACT", TOKEN),
            ("ICO_NFT_CONTRACT", NFT),
            ("ICO_REQUIRED_CHAIN_ID", "11155111"),
            ("ICO_NETWORK", "sepolia"),
            ("ICO_DISABLE_INJECTED_PROVIDER", "true"),
            ("ICO_PROVIDER_OPTIONS", r#"{"custom":{"url":"http://rpc:8545"}}"#),
            ("ICO_POLL_INTERVAL_MS", "500"),
        ])
        .unwrap();

        assert_eq!(config.required_chain_id, NetworkId(11_155_111));
        assert!(config.disable_injected_provider);
        assert!(config.provider_options.contains_key("custom"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let base = [("ICO_TOKEN_CONTRACT", TOKEN), ("ICO_NFT_CONTRACT", NFT)];

        let mut pairs = base.to_vec();
        pairs.push(("ICO_PROVIDER_OPTIONS", "[1,2]"));
        assert!(load(&pairs).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("ICO_POLL_INTERVAL_MS", "0"));
        assert!(load(&pairs).is_err());

        let mut pairs = base.to_vec();
        pairs.push(("ICO_REQUIRED_CHAIN_ID", "four"));
        assert!(load(&pairs).is_err());
    }
}
