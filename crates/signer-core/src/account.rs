//! The account abstraction the application signs and sends through.
//!
//! An [`Account`] is either backed by an NFC tap-card ([`CardAccount`]) or
//! delegates to a software wallet provider ([`DelegatedAccount`]). Both
//! expose the same operations, so the rest of the application never cares
//! which one the user connected.
//!
//! # Example
//!
//! ```ignore
//! use nfc_evm_signer_core::{Account, CardAccount, TransactionIntent};
//!
//! let account = CardAccount::tap_to_connect(transport, 1, Abort::never()).await?;
//! let account = account.connect(rpc_client);
//!
//! let intent = TransactionIntent::new(recipient, 545).with_value(amount);
//! let tx_hash = account.send_transaction(&intent).await?;
//! ```

use std::fmt;
use std::rc::Rc;

use alloy_primitives::{B256, Bytes, U256};
use async_trait::async_trait;
use futures::future::{LocalBoxFuture, try_join3};
use tracing::{debug, info};

use crate::address::Address;
use crate::card::{Abort, CardTransport, ChallengeSigner, SigningEvents, identify_card};
use crate::eip712::TypedData;
use crate::error::{Error, Result};
use crate::message::hash_personal_message;
use crate::rpc::{
    BlockNumberOrTag, Filter, Log, RpcClient, TransactionReceipt, TransactionRequest, message_call,
};
use crate::session::WalletSession;
use crate::signature::Signature;
use crate::transaction::{TransactionIntent, build_digest, finalize};

/// Builds a fresh deadline future for each card challenge.
pub type DeadlineFactory = Rc<dyn Fn() -> LocalBoxFuture<'static, ()>>;

/// A connected account able to sign and send.
#[async_trait(?Send)]
pub trait Account {
    /// The account address, fixed for the lifetime of the account.
    fn address(&self) -> Address;

    /// Signs `message` as an EIP-191 personal message.
    ///
    /// # Errors
    ///
    /// Returns the backend's signing error.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature>;

    /// Signs EIP-712 typed data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypedData`] if the data cannot be hashed, or
    /// the backend's signing error.
    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature>;

    /// Signs a transaction and returns the raw broadcast payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid intent, or the backend's
    /// signing error.
    async fn sign_transaction(&self, intent: &TransactionIntent) -> Result<Vec<u8>>;

    /// Signs and broadcasts a transaction, returning its hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid intent before any I/O,
    /// the backend's signing error, or [`Error::Rpc`] if broadcasting fails.
    async fn send_transaction(&self, intent: &TransactionIntent) -> Result<B256>;
}

/// Marker for a card account with no RPC client bound.
///
/// Such an account can sign but not send; see [`CardAccount::connect`].
#[derive(Debug, Clone, Copy)]
pub enum Unbound {}

#[async_trait(?Send)]
impl RpcClient for Unbound {
    async fn chain_id(&self) -> Result<u64> {
        match *self {}
    }

    async fn block_number(&self) -> Result<u64> {
        match *self {}
    }

    async fn call(&self, _request: &TransactionRequest, _block: BlockNumberOrTag) -> Result<Bytes> {
        match *self {}
    }

    async fn estimate_gas(&self, _request: &TransactionRequest) -> Result<u64> {
        match *self {}
    }

    async fn gas_price(&self) -> Result<U256> {
        match *self {}
    }

    async fn transaction_count(&self, _address: Address, _block: BlockNumberOrTag) -> Result<u64> {
        match *self {}
    }

    async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<B256> {
        match *self {}
    }

    async fn transaction_receipt(&self, _hash: B256) -> Result<Option<TransactionReceipt>> {
        match *self {}
    }

    async fn wait_for_transaction_receipt(&self, _hash: B256) -> Result<TransactionReceipt> {
        match *self {}
    }

    async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>> {
        match *self {}
    }
}

/// An account whose key lives on an NFC tap-card.
///
/// The challenge signer is shared between an account and every adapter
/// derived from it with [`CardAccount::connect`], so the single-flight guard
/// holds across all of them.
pub struct CardAccount<T, C = Unbound> {
    signer: Rc<ChallengeSigner<T>>,
    public_key: Option<String>,
    client: Option<C>,
    deadline: Option<DeadlineFactory>,
}

impl<T: CardTransport, C> fmt::Debug for CardAccount<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardAccount")
            .field("address", &self.signer.account())
            .field("key_slot", &self.signer.key_slot())
            .field("connected", &self.client.is_some())
            .field("tap_timeout", &self.deadline.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: CardTransport> CardAccount<T, Unbound> {
    /// Creates an account for a card whose address is already known.
    #[must_use]
    pub fn new(transport: T, address: Address, key_slot: u8) -> Self {
        Self::from_signer(ChallengeSigner::new(transport, address, key_slot), None)
    }

    /// Wraps a configured challenge signer, e.g. one sharing an event fan-out.
    #[must_use]
    pub fn from_signer(signer: ChallengeSigner<T>, public_key: Option<String>) -> Self {
        Self {
            signer: Rc::new(signer),
            public_key,
            client: None,
            deadline: None,
        }
    }

    /// Asks the user to tap a card and creates an account for it.
    ///
    /// # Errors
    ///
    /// Returns the challenge errors of [`identify_card`].
    pub async fn tap_to_connect(transport: T, key_slot: u8, abort: Abort) -> Result<Self> {
        let events = SigningEvents::default();
        let identity = identify_card(&transport, key_slot, &events, abort).await?;
        info!(address = %identity.address, "card connected");

        let signer = ChallengeSigner::new(transport, identity.address, key_slot).with_events(events);
        Ok(Self::from_signer(signer, identity.public_key))
    }

    /// Recreates an account from a restored session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the session is not connected.
    pub fn from_session(transport: T, session: &WalletSession, key_slot: u8) -> Result<Self> {
        if !session.is_connected {
            return Err(Error::Validation("session is not connected".to_string()));
        }
        let mut account = Self::new(transport, session.address, key_slot);
        account.public_key.clone_from(&session.public_key);
        Ok(account)
    }
}

impl<T: CardTransport, C> CardAccount<T, C> {
    /// Returns a new adapter bound to `client`; `self` is left as it was.
    #[must_use]
    pub fn connect<R: RpcClient>(&self, client: R) -> CardAccount<T, R> {
        CardAccount {
            signer: Rc::clone(&self.signer),
            public_key: self.public_key.clone(),
            client: Some(client),
            deadline: self.deadline.clone(),
        }
    }

    /// Applies a fresh deadline from `factory` to every challenge.
    #[must_use]
    pub fn with_tap_timeout(mut self, factory: DeadlineFactory) -> Self {
        self.deadline = Some(factory);
        self
    }

    /// Returns the card's public key hex, when it was reported on connect.
    #[must_use]
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// Returns the progress events of this account's card challenges.
    #[must_use]
    pub fn events(&self) -> &SigningEvents {
        self.signer.events()
    }

    /// Returns the bound RPC client.
    #[must_use]
    pub const fn client(&self) -> Option<&C> {
        self.client.as_ref()
    }

    /// Returns the session record to persist for this account.
    #[must_use]
    pub fn session(&self) -> WalletSession {
        WalletSession {
            address: self.signer.account(),
            public_key: self.public_key.clone(),
            is_connected: true,
        }
    }

    fn default_abort(&self) -> Abort {
        match &self.deadline {
            Some(factory) => Abort::never().with_deadline(factory()),
            None => Abort::never(),
        }
    }

    /// Signs `digest` on the card under `abort`.
    ///
    /// # Errors
    ///
    /// See [`ChallengeSigner::sign_digest`].
    pub async fn sign_digest_with(&self, digest: B256, abort: Abort) -> Result<Signature> {
        self.signer.sign_digest(digest, abort).await
    }

    /// Signs a transaction under `abort` and returns the raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid intent, or the challenge
    /// errors of [`ChallengeSigner::sign_digest`].
    pub async fn sign_transaction_with(
        &self,
        intent: &TransactionIntent,
        abort: Abort,
    ) -> Result<Vec<u8>> {
        let (tx, digest) = build_digest(intent)?;
        debug!(%digest, chain_id = tx.chain_id(), nonce = tx.nonce(), "transaction digest");
        let signature = self.signer.sign_digest(digest, abort).await?;
        Ok(finalize(&tx, &signature))
    }
}

impl<T: CardTransport, C: RpcClient> CardAccount<T, C> {
    fn bound_client(&self) -> Result<&C> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Configuration("no RPC client bound to the card account".to_string()))
    }

    /// Queries the values the intent leaves open.
    ///
    /// Gas, fee and nonce are read concurrently. Nothing is cached beyond
    /// the returned intent, so each submission attempt reads them afresh.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid intent, or [`Error::Rpc`]
    /// if a read fails.
    pub async fn fill_parameters(&self, intent: &TransactionIntent) -> Result<TransactionIntent> {
        let (to, _) = intent.validate()?;
        let client = self.bound_client()?;
        let from = self.signer.account();

        let request = TransactionRequest {
            from: Some(from.inner()),
            value: Some(intent.value),
            ..message_call(to, intent.data.clone())
        };

        let gas = async {
            match intent.gas {
                Some(gas) => Ok(gas),
                None => client.estimate_gas(&request).await,
            }
        };
        let gas_price = async {
            if intent.gas_price.is_some() || intent.is_eip1559() {
                Ok(None)
            } else {
                client.gas_price().await.map(Some)
            }
        };
        let nonce = async {
            match intent.nonce {
                Some(nonce) => Ok(nonce),
                None => client.transaction_count(from, BlockNumberOrTag::Pending).await,
            }
        };

        let (gas, gas_price, nonce) = try_join3(gas, gas_price, nonce).await?;
        debug!(gas, ?gas_price, nonce, "filled transaction parameters");

        let mut filled = intent.clone();
        filled.gas = Some(gas);
        filled.nonce = Some(nonce);
        if gas_price.is_some() {
            filled.gas_price = gas_price;
        }
        Ok(filled)
    }

    /// Fills, signs and broadcasts a transaction under `abort`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before any I/O for an invalid intent,
    /// [`Error::Configuration`] if no client is bound, the challenge errors
    /// of [`ChallengeSigner::sign_digest`], or [`Error::Rpc`].
    pub async fn send_transaction_with(
        &self,
        intent: &TransactionIntent,
        abort: Abort,
    ) -> Result<B256> {
        intent.validate()?;
        let client = self.bound_client()?;

        let filled = self.fill_parameters(intent).await?;
        let raw = self.sign_transaction_with(&filled, abort).await?;

        let hash = client.send_raw_transaction(&raw).await?;
        info!(%hash, from = %self.signer.account(), "transaction broadcast");
        Ok(hash)
    }
}

#[async_trait(?Send)]
impl<T: CardTransport, C: RpcClient> Account for CardAccount<T, C> {
    fn address(&self) -> Address {
        self.signer.account()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        let digest = hash_personal_message(message);
        self.signer.sign_digest(digest, self.default_abort()).await
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature> {
        let digest = data.signing_hash()?;
        self.signer.sign_digest(digest, self.default_abort()).await
    }

    async fn sign_transaction(&self, intent: &TransactionIntent) -> Result<Vec<u8>> {
        self.sign_transaction_with(intent, self.default_abort()).await
    }

    async fn send_transaction(&self, intent: &TransactionIntent) -> Result<B256> {
        self.send_transaction_with(intent, self.default_abort()).await
    }
}

/// A software wallet supplied by an embedded-wallet provider.
#[async_trait(?Send)]
pub trait WalletProvider {
    /// Returns the wallet's current address.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if no wallet is available.
    async fn current_address(&self) -> Result<Address>;

    /// Signs an EIP-191 personal message.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature>;

    /// Signs EIP-712 typed data.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature>;

    /// Signs a transaction without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless the provider supports it.
    async fn sign_transaction(&self, _intent: &TransactionIntent) -> Result<Vec<u8>> {
        Err(Error::Configuration(
            "wallet provider does not sign transactions without sending".to_string(),
        ))
    }

    /// Signs and sends a transaction.
    ///
    /// # Errors
    ///
    /// Returns the provider's error.
    async fn send_transaction(&self, intent: &TransactionIntent) -> Result<B256>;
}

/// An [`Account`] backed by a [`WalletProvider`].
pub struct DelegatedAccount<P> {
    provider: P,
    address: Address,
}

impl<P> fmt::Debug for DelegatedAccount<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl<P: WalletProvider> DelegatedAccount<P> {
    /// Reads the provider's address once and wraps it.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if it has no address.
    pub async fn connect(provider: P) -> Result<Self> {
        let address = provider.current_address().await?;
        info!(%address, "software wallet connected");
        Ok(Self { provider, address })
    }

    /// Returns the wrapped provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait(?Send)]
impl<P: WalletProvider> Account for DelegatedAccount<P> {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature> {
        self.provider.sign_message(message).await
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<Signature> {
        self.provider.sign_typed_data(data).await
    }

    async fn sign_transaction(&self, intent: &TransactionIntent) -> Result<Vec<u8>> {
        intent.validate()?;
        self.provider.sign_transaction(intent).await
    }

    async fn send_transaction(&self, intent: &TransactionIntent) -> Result<B256> {
        intent.validate()?;
        let hash = self.provider.send_transaction(intent).await?;
        info!(%hash, from = %self.address, "transaction sent through wallet provider");
        Ok(hash)
    }
}
