//! Derived-state refresh loop and the two mutating actions.

use alloy_primitives::{B256, U256};
use anyhow::Context;
use ico_api_types::{NoticeLevel, Reading, RefreshedState, TokenAmount};
use ico_chain_client::{NftLedger, SignerHandle, TokenLedger};
use ico_session::{Notifier, SessionError, SessionManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 0.001 ether per token, in wei.
pub const PRICE_PER_TOKEN_WEI: u64 = 1_000_000_000_000_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RefresherConfig {
    pub poll_interval: Duration,
    pub receipt_poll_interval: Duration,
    pub price_per_token: TokenAmount,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            price_per_token: TokenAmount::from_u64(PRICE_PER_TOKEN_WEI),
        }
    }
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("payment for {amount} tokens overflows")]
    PaymentOverflow { amount: TokenAmount },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("transaction failed")]
    TransactionFailure(#[source] anyhow::Error),
    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This call ran the pass; `passes` > 1 when triggers arrived meanwhile.
    Completed { passes: u32 },
    /// A pass was already running and will repeat once more.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

#[derive(Default)]
struct RefreshGate {
    running: bool,
    rerun: bool,
}

/// Clears the gate if a pass is dropped half way.
struct PassGuard<'a> {
    gate: &'a StdMutex<RefreshGate>,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut gate = lock(self.gate);
            gate.running = false;
            gate.rerun = false;
        }
    }
}

/// Holds `loading` up while at least one transaction is in flight.
struct LoadingGuard<'a> {
    in_flight: &'a AtomicUsize,
    state: &'a watch::Sender<RefreshedState>,
}

impl<'a> LoadingGuard<'a> {
    fn raise(in_flight: &'a AtomicUsize, state: &'a watch::Sender<RefreshedState>) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        state.send_modify(|s| s.loading = true);
        Self { in_flight, state }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.state.send_modify(|s| s.loading = remaining > 0);
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StateRefresher {
    session: Arc<SessionManager>,
    token: Arc<dyn TokenLedger>,
    nft: Arc<dyn NftLedger>,
    notifier: Arc<dyn Notifier>,
    config: RefresherConfig,
    state: watch::Sender<RefreshedState>,
    gate: StdMutex<RefreshGate>,
    in_flight: AtomicUsize,
}

impl StateRefresher {
    pub fn new(
        session: Arc<SessionManager>,
        token: Arc<dyn TokenLedger>,
        nft: Arc<dyn NftLedger>,
        notifier: Arc<dyn Notifier>,
        config: RefresherConfig,
    ) -> Self {
        let (state, _) = watch::channel(RefreshedState::default());
        Self {
            session,
            token,
            nft,
            notifier,
            config,
            state,
            gate: StdMutex::new(RefreshGate::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn snapshot(&self) -> RefreshedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshedState> {
        self.state.subscribe()
    }

    /// Back to the zeroed page state, e.g. after disconnect.
    pub fn reset(&self) {
        self.state.send_modify(|s| {
            let loading = s.loading;
            let refresh_epoch = s.refresh_epoch;
            *s = RefreshedState {
                loading,
                refresh_epoch,
                ..RefreshedState::default()
            };
        });
    }

    // ── reads ────────────────────────────────────────────────────────

    pub async fn get_balance(&self) -> Reading<TokenAmount> {
        let reading = settle("balance", self.read_balance().await);
        self.state
            .send_modify(|s| s.balance_of_crypto_dev_tokens = reading.clone());
        reading
    }

    pub async fn get_total_minted(&self) -> Reading<TokenAmount> {
        let reading = settle("total minted", self.read_total_minted().await);
        self.state.send_modify(|s| s.tokens_minted = reading.clone());
        reading
    }

    pub async fn get_claimable(&self) -> Reading<TokenAmount> {
        let reading = settle("claimable", self.read_claimable().await);
        self.state
            .send_modify(|s| s.tokens_to_be_claimed = reading.clone());
        reading
    }

    async fn read_balance(&self) -> anyhow::Result<TokenAmount> {
        let signer = self.session.signer().await?;
        self.token
            .balance_of(signer.reader(), signer.address())
            .await
    }

    async fn read_total_minted(&self) -> anyhow::Result<TokenAmount> {
        let reader = self.session.reader().await?;
        self.token.total_supply(&reader).await
    }

    /// One `tokenOfOwnerByIndex` and one `tokenIdsClaimed` call per owned NFT.
    async fn read_claimable(&self) -> anyhow::Result<TokenAmount> {
        let signer = self.session.signer().await?;
        let reader = signer.reader();
        let owner = signer.address();

        let owned = self.nft.balance_of(reader, owner).await?;
        let owned: u64 = owned
            .try_into()
            .map_err(|_| anyhow::anyhow!("owned NFT count {owned} does not fit in u64"))?;

        let mut unclaimed = 0u64;
        for index in 0..owned {
            let token_id = self
                .nft
                .token_of_owner_by_index(reader, owner, U256::from(index))
                .await
                .with_context(|| format!("tokenOfOwnerByIndex({index})"))?;
            let claimed = self
                .token
                .token_ids_claimed(reader, token_id)
                .await
                .with_context(|| format!("tokenIdsClaimed({token_id})"))?;
            if !claimed {
                unclaimed += 1;
            }
        }

        Ok(TokenAmount::from_u64(unclaimed))
    }

    /// Runs the read pass, coalescing overlapping triggers.
    ///
    /// A call arriving while a pass is running returns `Coalesced` and makes
    /// the running pass go around once more, so the last trigger always
    /// observes a pass that started after it.
    pub async fn refresh(&self) -> RefreshOutcome {
        {
            let mut gate = lock(&self.gate);
            if gate.running {
                gate.rerun = true;
                return RefreshOutcome::Coalesced;
            }
            gate.running = true;
        }

        let mut guard = PassGuard {
            gate: &self.gate,
            armed: true,
        };
        let mut passes = 0;
        loop {
            self.read_pass().await;
            passes += 1;

            let again = {
                let mut gate = lock(&self.gate);
                if gate.rerun {
                    gate.rerun = false;
                    true
                } else {
                    gate.running = false;
                    false
                }
            };
            if !again {
                break;
            }
        }
        guard.armed = false;

        RefreshOutcome::Completed { passes }
    }

    /// Refresh that is abandoned once the session is torn down, so a
    /// disconnect is never followed by stale or failed readings.
    async fn refresh_within_session(&self) {
        let Some(cancel) = self.session.cancellation().await else {
            debug!("session gone, skipping post-transaction refresh");
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("session ended during post-transaction refresh"),
            _ = self.refresh() => {}
        }
    }

    async fn read_pass(&self) {
        let balance = self.get_balance().await;
        let minted = self.get_total_minted().await;
        let claimable = self.get_claimable().await;
        self.state.send_modify(|s| s.refresh_epoch += 1);
        debug!(
            balance = %balance.or_zero(),
            minted = %minted.or_zero(),
            claimable = %claimable.or_zero(),
            "refresh pass complete"
        );
    }

    // ── actions ──────────────────────────────────────────────────────

    pub async fn mint(&self, amount: TokenAmount) -> Result<TxOutcome, ActionError> {
        let result = self.submit_mint(amount).await;
        match &result {
            Ok(outcome) => {
                self.notifier
                    .notify(NoticeLevel::Info, "Successfully minted cryptoDev token 🎊");
                info!(tx_hash = %outcome.tx_hash, %amount, "mint confirmed");
                self.refresh_within_session().await;
            }
            Err(err) => warn!(error = %err, %amount, "mint failed"),
        }
        result
    }

    async fn submit_mint(&self, amount: TokenAmount) -> Result<TxOutcome, ActionError> {
        if amount.is_zero() {
            return Err(ActionError::InvalidAmount);
        }
        let payment = self
            .config
            .price_per_token
            .checked_mul(amount)
            .ok_or(ActionError::PaymentOverflow { amount })?;

        let signer = self.session.signer().await?;
        let _loading = LoadingGuard::raise(&self.in_flight, &self.state);
        let tx_hash = self
            .token
            .mint(&signer, amount, payment.0)
            .await
            .map_err(ActionError::TransactionFailure)?;
        self.confirm(&signer, tx_hash).await
    }

    /// Claims every eligible token in one transaction.
    ///
    /// Not gated on the claimable count; the ledger decides.
    pub async fn claim(&self) -> Result<TxOutcome, ActionError> {
        let result = self.submit_claim().await;
        match &result {
            Ok(outcome) => {
                self.notifier
                    .notify(NoticeLevel::Info, "Successfully claimed Crypto Dev Tokens");
                info!(tx_hash = %outcome.tx_hash, "claim confirmed");
                self.refresh_within_session().await;
            }
            Err(err) => warn!(error = %err, "claim failed"),
        }
        result
    }

    async fn submit_claim(&self) -> Result<TxOutcome, ActionError> {
        let _loading = LoadingGuard::raise(&self.in_flight, &self.state);
        let signer = self.session.signer().await?;
        let tx_hash = self
            .token
            .claim(&signer)
            .await
            .map_err(ActionError::TransactionFailure)?;
        self.confirm(&signer, tx_hash).await
    }

    async fn confirm(&self, signer: &SignerHandle, tx_hash: B256) -> Result<TxOutcome, ActionError> {
        let receipt = signer
            .wait_for_confirmation(tx_hash, self.config.receipt_poll_interval)
            .await
            .map_err(ActionError::TransactionFailure)?;
        if !receipt.success {
            return Err(ActionError::Reverted { tx_hash });
        }
        Ok(TxOutcome {
            tx_hash,
            block_number: receipt.block_number,
        })
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Initial pass, then one pass per tick until `cancel` fires.
    pub async fn run_polling(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.refresh() => {}
                    }
                }
            }
        }
        info!("polling stopped");
    }

    /// Spawns polling bound to the current session, if there is one.
    pub async fn spawn_polling(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let cancel = self.session.cancellation().await?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move { this.run_polling(cancel).await }))
    }

    /// Page activation: connect, then poll for the life of the session.
    pub async fn activate(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if let Err(err) = self.session.connect().await {
            warn!(error = %err, "wallet connection failed on activation");
            self.reset();
            return None;
        }
        self.spawn_polling().await
    }

    /// Tears the session down; the polling task ends with it.
    pub async fn deactivate(&self) {
        self.session.disconnect().await;
        self.reset();
    }
}

fn settle(what: &str, result: anyhow::Result<TokenAmount>) -> Reading<TokenAmount> {
    match result {
        Ok(value) => Reading::Value(value),
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(read = what, error = %reason, "read failed, showing zero");
            Reading::failed(reason)
        }
    }
}
