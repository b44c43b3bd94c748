use alloy_primitives::U256;
use alloy_primitives::utils::format_ether;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Numeric chain identity reported by `eth_chainId`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkId(pub u64);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("amount is required")]
    Empty,
    #[error("amount cannot be negative")]
    Negative,
    #[error("amount must be a base-10 integer: {0}")]
    Invalid(String),
}

/// Token quantity in the smallest unit (18 decimals).
///
/// Backed by a 256-bit unsigned integer; all arithmetic is checked.
/// Serialized as a decimal string so JSON clients never lose precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: Self = Self(U256::ZERO);

    pub fn from_u64(value: u64) -> Self {
        Self(U256::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        self.0.checked_mul(rhs.0).map(Self)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Decimal rendering with 18 fractional digits, e.g. `5.000000000000000000`.
    pub fn format_ether(&self) -> String {
        format_ether(self.0)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AmountParseError::Empty);
        }
        if trimmed.starts_with('-') {
            return Err(AmountParseError::Negative);
        }
        let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Invalid(trimmed.to_owned()));
        }
        U256::from_str_radix(digits, 10)
            .map(Self)
            .map_err(|err| AmountParseError::Invalid(err.to_string()))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of a single remote read.
///
/// A failed read is kept apart from a value that is legitimately zero,
/// even though the page renders both as `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading<T> {
    Value(T),
    Failed { reason: String },
}

impl<T> Reading<T> {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

impl<T: Clone + Default> Reading<T> {
    pub fn or_zero(&self) -> T {
        self.value().cloned().unwrap_or_default()
    }
}

impl<T: Default> Default for Reading<T> {
    fn default() -> Self {
        Self::Value(T::default())
    }
}

/// Snapshot of everything the page derives from the ledgers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshedState {
    /// Owned NFTs whose free-token claim is still open.
    pub tokens_to_be_claimed: Reading<TokenAmount>,
    /// Total supply of the token ledger.
    pub tokens_minted: Reading<TokenAmount>,
    pub balance_of_crypto_dev_tokens: Reading<TokenAmount>,
    /// A mint or claim transaction is in flight.
    pub loading: bool,
    /// Number of completed read passes.
    pub refresh_epoch: u64,
}

impl RefreshedState {
    /// Compares the ledger-derived fields only.
    pub fn same_readings(&self, other: &Self) -> bool {
        self.tokens_to_be_claimed == other.tokens_to_be_claimed
            && self.tokens_minted == other.tokens_minted
            && self.balance_of_crypto_dev_tokens == other.balance_of_crypto_dev_tokens
    }
}

// ── HTTP payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingView {
    pub amount: TokenAmount,
    pub formatted: String,
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&Reading<TokenAmount>> for ReadingView {
    fn from(reading: &Reading<TokenAmount>) -> Self {
        let amount = reading.or_zero();
        Self {
            amount,
            formatted: amount.format_ether(),
            failed: reading.is_failed(),
            reason: reading.failure_reason().map(ToOwned::to_owned),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at_epoch_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    pub connected: bool,
    pub network_id: Option<NetworkId>,
    pub account: Option<String>,
    pub loading: bool,
    pub tokens_to_be_claimed: ReadingView,
    pub tokens_minted: ReadingView,
    pub balance_of_crypto_dev_tokens: ReadingView,
    pub refresh_epoch: u64,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub connected: bool,
    pub network_id: NetworkId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    pub tx_hash: String,
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_parsing_rejects_negative_and_garbage() {
        assert_eq!("-5".parse::<TokenAmount>(), Err(AmountParseError::Negative));
        assert_eq!("  ".parse::<TokenAmount>(), Err(AmountParseError::Empty));
        assert!(matches!(
            "1.5".parse::<TokenAmount>(),
            Err(AmountParseError::Invalid(_))
        ));
        assert!(matches!(
            "0x10".parse::<TokenAmount>(),
            Err(AmountParseError::Invalid(_))
        ));
        assert_eq!("42".parse::<TokenAmount>(), Ok(TokenAmount::from_u64(42)));
    }

    #[test]
    fn amount_parsing_handles_values_beyond_u64() {
        let parsed: TokenAmount = "340282366920938463463374607431768211456".parse().unwrap();
        assert_eq!(parsed.0, U256::from(1u8) << 128);
    }

    #[test]
    fn checked_mul_reports_overflow() {
        let max = TokenAmount(U256::MAX);
        assert_eq!(max.checked_mul(TokenAmount::from_u64(2)), None);
        assert_eq!(
            TokenAmount::from_u64(3).checked_mul(TokenAmount::from_u64(4)),
            Some(TokenAmount::from_u64(12))
        );
    }

    #[test]
    fn format_ether_uses_eighteen_decimals() {
        let five_tokens = TokenAmount(U256::from(5u64) * U256::from(10u64).pow(U256::from(18u64)));
        assert!(five_tokens.format_ether().starts_with("5."));
        assert!(TokenAmount::ZERO.format_ether().starts_with("0."));
    }

    #[test]
    fn failed_reading_renders_as_zero_but_stays_distinct() {
        let failed: Reading<TokenAmount> = Reading::failed("rpc down");
        let zero: Reading<TokenAmount> = Reading::Value(TokenAmount::ZERO);

        assert_eq!(failed.or_zero(), zero.or_zero());
        assert_ne!(failed, zero);

        let view = ReadingView::from(&failed);
        assert!(view.failed);
        assert_eq!(view.reason.as_deref(), Some("rpc down"));
        assert!(view.amount.is_zero());
    }

    #[test]
    fn token_amount_serializes_as_decimal_string() {
        let json = serde_json::to_string(&TokenAmount::from_u64(1_000)).unwrap();
        assert_eq!(json, "\"1000\"");
        let back: TokenAmount = serde_json::from_str("\"1000\"").unwrap();
        assert_eq!(back, TokenAmount::from_u64(1_000));
    }
}
