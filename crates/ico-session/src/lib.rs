//! Wallet session lifecycle.
//!
//! A [`SessionManager`] owns the one provider modal of the page, enforces
//! the required network and hands out read-only or signing accessors.
//! Tearing a session down cancels its [`CancellationToken`], which ends
//! every task tied to it.

use ico_api_types::{NetworkId, NoticeLevel};
use ico_chain_client::{
    Accessor, Eip1193Provider, ProviderHandle, ProviderModalOptions, SignerHandle, WalletConnector,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const RINKEBY_CHAIN_ID: NetworkId = NetworkId(4);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("wrong network: expected chain {expected}, wallet is on chain {actual}")]
    NetworkMismatch { expected: NetworkId, actual: NetworkId },
    #[error("wallet provider error")]
    Provider(#[source] anyhow::Error),
    #[error("wallet is not connected")]
    NotConnected,
    #[error("wallet authorized no accounts")]
    NoAccounts,
}

/// User-visible notices (the page's alert box).
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Notifier that only logs.
#[derive(Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!(notice = message),
            NoticeLevel::Warning => warn!(notice = message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub required_network: NetworkId,
    pub modal: ProviderModalOptions,
}

impl SessionConfig {
    pub fn rinkeby() -> Self {
        Self {
            required_network: RINKEBY_CHAIN_ID,
            modal: ProviderModalOptions {
                network: "rinkeby".to_owned(),
                ..ProviderModalOptions::default()
            },
        }
    }
}

/// One connected wallet.
#[derive(Clone)]
pub struct Session {
    pub connected: bool,
    pub network_id: NetworkId,
    id: u64,
    reader: ProviderHandle,
    signer: Option<SignerHandle>,
    cancel: CancellationToken,
}

impl Session {
    pub fn reader(&self) -> &ProviderHandle {
        &self.reader
    }

    pub fn signer(&self) -> Option<&SignerHandle> {
        self.signer.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.connected)
            .field("network_id", &self.network_id)
            .field("signer", &self.signer.as_ref().map(SignerHandle::address))
            .finish_non_exhaustive()
    }
}

/// Built once, then reused for every connect until disconnect.
struct ProviderModal {
    options: ProviderModalOptions,
    connector: Arc<dyn WalletConnector>,
    cached: StdMutex<Option<Arc<dyn Eip1193Provider>>>,
}

impl ProviderModal {
    /// Callers are serialized by the manager's connect lock.
    async fn connect(&self) -> anyhow::Result<Arc<dyn Eip1193Provider>> {
        if let Some(provider) = lock(&self.cached).clone() {
            return Ok(provider);
        }
        let provider = self.connector.connect(&self.options).await?;
        *lock(&self.cached) = Some(provider.clone());
        Ok(provider)
    }

    fn clear_cached_provider(&self) {
        lock(&self.cached).take();
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the page's wallet session.
///
/// The session slot is only ever locked for plain reads and writes, never
/// across a provider round trip, so `current` and `disconnect` stay
/// responsive while a wallet prompt or RPC call hangs.
pub struct SessionManager {
    config: SessionConfig,
    connector: Arc<dyn WalletConnector>,
    notifier: Arc<dyn Notifier>,
    modal: OnceCell<ProviderModal>,
    session: StdMutex<Option<Session>>,
    /// Serializes connect attempts.
    connecting: Mutex<()>,
    /// Serializes account requests.
    escalating: Mutex<()>,
    /// Bumped by every disconnect; identifies sessions.
    generation: AtomicU64,
    connected: watch::Sender<bool>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn WalletConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            connector,
            notifier,
            modal: OnceCell::new(),
            session: StdMutex::new(None),
            connecting: Mutex::new(()),
            escalating: Mutex::new(()),
            generation: AtomicU64::new(0),
            connected,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub async fn current(&self) -> Option<Session> {
        lock(&self.session).clone()
    }

    /// Connects the wallet, or returns the live session if one exists.
    ///
    /// Concurrent callers queue on the connect lock, so a second call made
    /// while the first is still prompting gets the same session. A
    /// disconnect that lands mid-prompt wins: the attempt is discarded.
    pub async fn connect(&self) -> Result<Session, SessionError> {
        let _connecting = self.connecting.lock().await;
        if let Some(session) = lock(&self.session).clone() {
            return Ok(session);
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let modal = self
            .modal
            .get_or_init(|| async {
                ProviderModal {
                    options: self.config.modal.clone(),
                    connector: self.connector.clone(),
                    cached: StdMutex::new(None),
                }
            })
            .await;

        let provider = modal.connect().await.map_err(SessionError::Provider)?;
        let reader = ProviderHandle::new(provider);
        let network_id = reader.chain_id().await.map_err(SessionError::Provider)?;
        self.ensure_network(network_id)?;

        let session = Session {
            connected: true,
            network_id,
            id: generation,
            reader,
            signer: None,
            cancel: CancellationToken::new(),
        };
        {
            let mut slot = lock(&self.session);
            if self.generation.load(Ordering::SeqCst) != generation {
                warn!("disconnected while connecting, dropping the new session");
                modal.clear_cached_provider();
                return Err(SessionError::NotConnected);
            }
            *slot = Some(session.clone());
        }
        self.connected.send_replace(true);
        info!(%network_id, network = %self.config.modal.network, "wallet connected");

        Ok(session)
    }

    /// Read-only accessor by default, signing accessor on request.
    ///
    /// The wallet's network is checked on every call. Signing escalation
    /// asks the wallet for accounts once per session.
    pub async fn get_accessor(&self, require_signing: bool) -> Result<Accessor, SessionError> {
        let (id, reader) = {
            let slot = lock(&self.session);
            let session = slot.as_ref().ok_or(SessionError::NotConnected)?;
            (session.id, session.reader.clone())
        };

        let network_id = reader.chain_id().await.map_err(SessionError::Provider)?;
        self.ensure_network(network_id)?;

        if !require_signing {
            return Ok(Accessor::Provider(reader));
        }

        let _escalating = self.escalating.lock().await;
        if let Some(signer) = self.live_session(id)?.signer {
            return Ok(Accessor::Signer(signer));
        }

        let accounts = reader
            .request_accounts()
            .await
            .map_err(SessionError::Provider)?;
        let address = accounts.first().copied().ok_or(SessionError::NoAccounts)?;
        let signer = SignerHandle::new(reader, address);

        {
            let mut slot = lock(&self.session);
            match slot.as_mut() {
                Some(session) if session.id == id => session.signer = Some(signer.clone()),
                _ => return Err(SessionError::NotConnected),
            }
        }
        info!(%address, "signing authorized");

        Ok(Accessor::Signer(signer))
    }

    /// The session with `id`, unless it was torn down meanwhile.
    fn live_session(&self, id: u64) -> Result<Session, SessionError> {
        lock(&self.session)
            .as_ref()
            .filter(|session| session.id == id)
            .cloned()
            .ok_or(SessionError::NotConnected)
    }

    pub async fn reader(&self) -> Result<ProviderHandle, SessionError> {
        Ok(self.get_accessor(false).await?.reader().clone())
    }

    pub async fn signer(&self) -> Result<SignerHandle, SessionError> {
        self.get_accessor(true)
            .await?
            .into_signer()
            .ok_or(SessionError::NoAccounts)
    }

    /// Token cancelled when the current session is torn down.
    pub async fn cancellation(&self) -> Option<CancellationToken> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.cancel.child_token())
    }

    pub async fn disconnect(&self) {
        let previous = {
            let mut slot = lock(&self.session);
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Some(modal) = self.modal.get() {
            modal.clear_cached_provider();
        }
        self.connected.send_replace(false);

        if let Some(session) = previous {
            session.cancel.cancel();
            info!(network_id = %session.network_id, "wallet disconnected");
        }
    }

    fn ensure_network(&self, actual: NetworkId) -> Result<(), SessionError> {
        let expected = self.config.required_network;
        if actual == expected {
            return Ok(());
        }

        warn!(%expected, %actual, "wallet is on the wrong network");
        self.notifier.notify(
            NoticeLevel::Warning,
            &format!(
                "Change the network to {}",
                display_network_name(&self.config.modal.network)
            ),
        );
        Err(SessionError::NetworkMismatch { expected, actual })
    }
}

fn display_network_name(network: &str) -> String {
    let mut chars = network.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
