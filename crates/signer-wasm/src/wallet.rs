//! The `CardWallet` class exported to JavaScript.
//!
//! A wallet owns the configuration, the persisted session, the optional
//! JSON-RPC client and the connected card account. One card operation runs
//! at a time: connecting, signing, sending and the multi-step flows all
//! share a single gate, and anything started while it is held is refused
//! with `SigningInProgress`. Every card challenge honours the configured
//! tap timeout and can be cancelled with [`CardWallet::cancel`].
//!
//! # Example
//!
//! ```javascript
//! import { CardWallet } from 'nfc-evm-signer-wasm';
//!
//! const wallet = new CardWallet(JSON.stringify({
//!     chainId: 545,
//!     rpcUrl: "https://testnet.evm.nodes.onflow.org",
//!     tapTimeoutMs: 30000,
//! }));
//!
//! wallet.subscribe((event, detail) => console.log(event, detail));
//!
//! const address = wallet.restore() ?? await wallet.connect();
//! const hash = await wallet.sendTransaction(JSON.stringify({
//!     to: "0x...",
//!     value: "1000000000000000",
//!     chainId: 545,
//! }));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use alloy_primitives::{U256, hex};
use futures::StreamExt;
use futures::future::LocalBoxFuture;
use js_sys::Function;
use nfc_evm_signer_core::calls::{ContractCall, Contracts, format_token_amount, parse_token_amount};
use nfc_evm_signer_core::card::{SigningEvents, identify_card};
use nfc_evm_signer_core::flow::{send_and_confirm_with, send_sequence_with};
use nfc_evm_signer_core::{
    Account, Address, CardAccount, ChallengeSigner, JsonRpcClient, SessionStore, SignerConfig,
    SigningEvent, TransactionIntent, TypedData, hash_personal_message,
};
use serde_json::json;
use tracing::{info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::error::{WasmError, WasmResult};
use crate::fetch::{FetchTransport, TimeoutSleep, deadline};
use crate::gate::ChallengeGate;
use crate::halo::HaloTransport;
use crate::storage::LocalStorage;

type NodeClient = Rc<JsonRpcClient<FetchTransport, TimeoutSleep>>;

/// Splits an event into the name and detail passed to JavaScript listeners.
pub(crate) fn describe_event(event: &SigningEvent) -> (&'static str, Option<String>) {
    match event {
        SigningEvent::AwaitingTap => ("awaitingTap", None),
        SigningEvent::CardScanned => ("cardScanned", None),
        SigningEvent::RetryRequested => ("retryRequested", None),
        SigningEvent::DeviceMessage(cause) => ("deviceMessage", Some(cause.clone())),
        SigningEvent::VerifyingAddress => ("verifyingAddress", None),
        SigningEvent::Signed => ("signed", None),
        SigningEvent::Failed(reason) => ("failed", Some(reason.clone())),
    }
}

/// A browser wallet backed by an NFC tap-card.
#[wasm_bindgen]
pub struct CardWallet {
    config: SignerConfig,
    sessions: SessionStore<LocalStorage>,
    client: Option<NodeClient>,
    events: SigningEvents,
    transport: HaloTransport,
    account: RefCell<Option<Rc<CardAccount<HaloTransport>>>>,
    gate: ChallengeGate,
}

impl fmt::Debug for CardWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardWallet")
            .field("chain_id", &self.config.chain_id)
            .field("account", &self.account.borrow())
            .field("has_client", &self.client.is_some())
            .field("busy", &self.gate.is_busy())
            .finish_non_exhaustive()
    }
}

#[wasm_bindgen]
impl CardWallet {
    /// Creates a wallet from a JSON configuration; omit it for defaults.
    ///
    /// Nothing is restored or tapped yet; see `restore()` and `connect()`.
    ///
    /// # Errors
    ///
    /// Throws `InvalidConfig` for a bad configuration, or
    /// `StorageUnavailable` when `localStorage` cannot be opened.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<Self, JsValue> {
        Self::new_internal(config_json.as_deref()).map_err(JsValue::from)
    }

    fn new_internal(config_json: Option<&str>) -> WasmResult<Self> {
        let config = match config_json {
            Some(json) => SignerConfig::from_json(json)?,
            None => SignerConfig::default(),
        };
        let client = config.rpc_url.as_ref().map(|url| {
            Rc::new(
                JsonRpcClient::new(FetchTransport::new(url.clone()), TimeoutSleep)
                    .with_poll_policy(config.poll_policy()),
            )
        });
        let sessions =
            SessionStore::with_prefix(LocalStorage::open()?, config.session_key_prefix.clone());

        Ok(Self {
            config,
            sessions,
            client,
            events: SigningEvents::default(),
            transport: HaloTransport::default(),
            account: RefCell::new(None),
            gate: ChallengeGate::default(),
        })
    }

    /// Returns the effective configuration as JSON.
    ///
    /// # Errors
    ///
    /// Throws `CoreError` if serialization fails.
    #[wasm_bindgen(js_name = "configJson")]
    pub fn config_json(&self) -> Result<String, JsValue> {
        self.config
            .to_json()
            .map_err(|e| JsValue::from(WasmError::from(e)))
    }

    /// The connected account's checksummed address, if any.
    #[wasm_bindgen(getter)]
    pub fn address(&self) -> Option<String> {
        self.account
            .borrow()
            .as_ref()
            .map(|account| account.address().to_checksum_hex())
    }

    /// The card's public key hex, when it was reported on connect.
    #[wasm_bindgen(getter, js_name = "publicKey")]
    pub fn public_key(&self) -> Option<String> {
        self.account
            .borrow()
            .as_ref()
            .and_then(|account| account.public_key().map(str::to_string))
    }

    /// Checks whether a card account is connected.
    #[wasm_bindgen(js_name = "isConnected")]
    pub fn is_connected(&self) -> bool {
        self.account.borrow().is_some()
    }

    /// Calls `callback(event, detail)` for every challenge progress event.
    ///
    /// Event names are `awaitingTap`, `cardScanned`, `retryRequested`,
    /// `deviceMessage`, `verifyingAddress`, `signed` and `failed`.
    pub fn subscribe(&self, callback: Function) {
        let mut events = self.events.subscribe();
        spawn_local(async move {
            while let Some(event) = events.next().await {
                let (name, detail) = describe_event(&event);
                let detail = detail.map_or(JsValue::UNDEFINED, JsValue::from);
                if let Err(err) = callback.call2(&JsValue::NULL, &JsValue::from_str(name), &detail)
                {
                    warn!(error = ?err, event = name, "event listener threw");
                }
            }
        });
    }

    /// Restores the persisted session without a tap.
    ///
    /// Returns the restored address, or `undefined` when nothing usable is
    /// stored.
    pub fn restore(&self) -> Option<String> {
        let session = self.sessions.load()?;
        let account = self.install(session.address, session.public_key);
        Some(account.address().to_checksum_hex())
    }

    /// Asks the user to tap their card and connects it.
    ///
    /// # Errors
    ///
    /// Throws `SigningInProgress` while another operation runs, or
    /// `TapFailed`, `DeviceFailure`, `MalformedResponse`, `Timeout` or
    /// `Cancelled`.
    pub async fn connect(&self) -> Result<String, JsValue> {
        self.connect_internal().await.map_err(JsValue::from)
    }

    async fn connect_internal(&self) -> WasmResult<String> {
        let pass = self.gate.enter()?;
        let abort = pass.abort(self.tap_deadline())?;
        let identity =
            identify_card(&self.transport, self.config.key_slot, &self.events, abort).await?;
        let account = self.install(identity.address, identity.public_key);

        if let Err(err) = self.sessions.save(&account.session()) {
            warn!(%err, "connected card could not be persisted");
        }
        info!(address = %identity.address, "card wallet connected");
        Ok(identity.address.to_checksum_hex())
    }

    /// Forgets the connected card and clears the persisted session.
    ///
    /// # Errors
    ///
    /// Throws `StorageUnavailable` if the session cannot be removed.
    pub fn disconnect(&self) -> Result<(), JsValue> {
        self.account.borrow_mut().take();
        self.sessions
            .clear()
            .map_err(|e| JsValue::from(WasmError::from(e)))
    }

    /// Cancels the running card operation.
    ///
    /// A challenge waiting for a tap fails with `Cancelled`. A multi-step
    /// flow or `sendAndConfirm` stops before its next challenge; what was
    /// already broadcast stays broadcast. Returns `false` when nothing is
    /// running.
    pub fn cancel(&self) -> bool {
        self.gate.cancel()
    }

    /// Signs an EIP-191 personal message and returns the 65-byte signature hex.
    ///
    /// # Errors
    ///
    /// Throws `NotConnected`, or any challenge error.
    #[wasm_bindgen(js_name = "signMessage")]
    pub async fn sign_message(&self, message: String) -> Result<String, JsValue> {
        self.sign_message_internal(&message)
            .await
            .map_err(JsValue::from)
    }

    async fn sign_message_internal(&self, message: &str) -> WasmResult<String> {
        let account = self.current()?;
        let digest = hash_personal_message(message);
        let pass = self.gate.enter()?;
        let signature = account
            .sign_digest_with(digest, pass.abort(self.tap_deadline())?)
            .await?;
        Ok(signature.to_hex())
    }

    /// Signs EIP-712 typed data given as JSON.
    ///
    /// # Errors
    ///
    /// Throws `InvalidTypedData`, `NotConnected`, or any challenge error.
    #[wasm_bindgen(js_name = "signTypedData")]
    pub async fn sign_typed_data(&self, typed_data_json: String) -> Result<String, JsValue> {
        self.sign_typed_data_internal(&typed_data_json)
            .await
            .map_err(JsValue::from)
    }

    async fn sign_typed_data_internal(&self, typed_data_json: &str) -> WasmResult<String> {
        let account = self.current()?;
        let digest = TypedData::from_json(typed_data_json)?.signing_hash()?;
        let pass = self.gate.enter()?;
        let signature = account
            .sign_digest_with(digest, pass.abort(self.tap_deadline())?)
            .await?;
        Ok(signature.to_hex())
    }

    /// Signs a transaction intent and returns the raw payload hex.
    ///
    /// The intent must carry every parameter; nothing is filled from the
    /// node.
    ///
    /// # Errors
    ///
    /// Throws `InvalidTransaction`, `NotConnected`, or any challenge error.
    #[wasm_bindgen(js_name = "signTransaction")]
    pub async fn sign_transaction(&self, intent_json: String) -> Result<String, JsValue> {
        self.sign_transaction_internal(&intent_json)
            .await
            .map_err(JsValue::from)
    }

    async fn sign_transaction_internal(&self, intent_json: &str) -> WasmResult<String> {
        let account = self.current()?;
        let intent = TransactionIntent::from_json(intent_json)?;
        let pass = self.gate.enter()?;
        let raw = account
            .sign_transaction_with(&intent, pass.abort(self.tap_deadline())?)
            .await?;
        Ok(hex::encode_prefixed(raw))
    }

    /// Fills, signs and broadcasts a transaction intent; returns its hash.
    ///
    /// # Errors
    ///
    /// Throws `InvalidTransaction` before any tap, `InvalidConfig` without
    /// an `rpcUrl`, any challenge error, or an RPC error code.
    #[wasm_bindgen(js_name = "sendTransaction")]
    pub async fn send_transaction(&self, intent_json: String) -> Result<String, JsValue> {
        self.send_transaction_internal(&intent_json)
            .await
            .map_err(JsValue::from)
    }

    async fn send_transaction_internal(&self, intent_json: &str) -> WasmResult<String> {
        let intent = TransactionIntent::from_json(intent_json)?;
        let account = self.current()?.connect(self.client()?);
        let pass = self.gate.enter()?;
        let hash = account
            .send_transaction_with(&intent, pass.abort(self.tap_deadline())?)
            .await?;
        Ok(hash.to_string())
    }

    /// Sends a transaction intent and waits for it to be mined.
    ///
    /// Resolves with `{ transactionHash, blockNumber, gasUsed }`.
    ///
    /// # Errors
    ///
    /// As `sendTransaction`, plus `Reverted` if the receipt reports failure.
    /// `cancel()` aborts the challenge; once broadcast, the receipt is
    /// still awaited.
    #[wasm_bindgen(js_name = "sendAndConfirm")]
    pub async fn send_and_confirm(&self, intent_json: String) -> Result<String, JsValue> {
        self.send_and_confirm_internal(&intent_json)
            .await
            .map_err(JsValue::from)
    }

    async fn send_and_confirm_internal(&self, intent_json: &str) -> WasmResult<String> {
        let intent = TransactionIntent::from_json(intent_json)?;
        let client = self.client()?;
        let account = self.current()?.connect(Rc::clone(&client));
        let pass = self.gate.enter()?;
        let send = account.send_transaction_with(&intent, pass.abort(self.tap_deadline())?);
        let receipt = send_and_confirm_with(&client, send).await?;
        Ok(json!({
            "transactionHash": receipt.transaction_hash.to_string(),
            "blockNumber": receipt.block_number,
            "gasUsed": receipt.gas_used,
        })
        .to_string())
    }

    /// Reads a stablecoin balance, formatted with the token's decimals.
    ///
    /// Defaults to the connected account.
    ///
    /// # Errors
    ///
    /// Throws `InvalidConfig` without contracts or an `rpcUrl`,
    /// `NotConnected` without an owner, or an RPC error code.
    #[wasm_bindgen(js_name = "tokenBalance")]
    pub async fn token_balance(&self, owner: Option<String>) -> Result<String, JsValue> {
        self.token_balance_internal(owner.as_deref())
            .await
            .map_err(JsValue::from)
    }

    async fn token_balance_internal(&self, owner: Option<&str>) -> WasmResult<String> {
        let owner = match owner {
            Some(owner) => Address::parse(owner)?,
            None => self.current()?.address(),
        };
        let balance = self
            .contracts()?
            .token_balance(&*self.client()?, owner)
            .await?;
        Ok(format_token_amount(balance))
    }

    /// Approves the vaults and opens a credit line backed by `amount`.
    ///
    /// Approvals the account has already granted are skipped. Resolves with
    /// the JSON array of confirmed transaction hashes.
    ///
    /// # Errors
    ///
    /// Throws the first failing step's error; earlier steps stay on-chain.
    /// After `cancel()` no further step is signed.
    #[wasm_bindgen(js_name = "stakeCollateral")]
    pub async fn stake_collateral(&self, amount: String) -> Result<String, JsValue> {
        self.run_amount_flow(&amount, Contracts::stake_collateral)
            .await
            .map_err(JsValue::from)
    }

    /// Adds `amount` to the existing collateral.
    ///
    /// # Errors
    ///
    /// See `stakeCollateral`.
    #[wasm_bindgen(js_name = "topUpCollateral")]
    pub async fn top_up_collateral(&self, amount: String) -> Result<String, JsValue> {
        self.run_amount_flow(&amount, Contracts::top_up_collateral)
            .await
            .map_err(JsValue::from)
    }

    /// Repays `principal` plus `interest` of the outstanding credit.
    ///
    /// Both the credit manager and the lending pool are approved for the
    /// total first, unless they already are.
    ///
    /// # Errors
    ///
    /// See `stakeCollateral`.
    #[wasm_bindgen(js_name = "repayCredit")]
    pub async fn repay_credit(&self, principal: String, interest: String) -> Result<String, JsValue> {
        self.repay_credit_internal(&principal, &interest)
            .await
            .map_err(JsValue::from)
    }

    async fn repay_credit_internal(&self, principal: &str, interest: &str) -> WasmResult<String> {
        let principal = parse_token_amount(principal)?;
        let interest = parse_token_amount(interest)?;
        let calls = self.contracts()?.repay_credit(principal, interest);
        self.run_calls(calls).await
    }

    /// Deposits `amount` into the lending pool.
    ///
    /// # Errors
    ///
    /// See `stakeCollateral`.
    pub async fn lend(&self, amount: String) -> Result<String, JsValue> {
        self.run_amount_flow(&amount, Contracts::lend)
            .await
            .map_err(JsValue::from)
    }

    /// Borrows `amount` against the credit line and pays it to `recipient`.
    ///
    /// # Errors
    ///
    /// See `stakeCollateral`.
    #[wasm_bindgen(js_name = "payWithCredit")]
    pub async fn pay_with_credit(&self, recipient: String, amount: String) -> Result<String, JsValue> {
        self.pay_with_credit_internal(&recipient, &amount)
            .await
            .map_err(JsValue::from)
    }

    async fn pay_with_credit_internal(&self, recipient: &str, amount: &str) -> WasmResult<String> {
        let recipient = Address::parse(recipient)?;
        let amount = parse_token_amount(amount)?;
        let calls = self.contracts()?.pay_with_credit(recipient, amount);
        self.run_calls(calls).await
    }
}

impl CardWallet {
    fn install(
        &self,
        address: Address,
        public_key: Option<String>,
    ) -> Rc<CardAccount<HaloTransport>> {
        let signer = ChallengeSigner::new(self.transport.clone(), address, self.config.key_slot)
            .with_events(self.events.clone());
        let account = Rc::new(CardAccount::from_signer(signer, public_key));
        *self.account.borrow_mut() = Some(Rc::clone(&account));
        account
    }

    fn tap_deadline(&self) -> Option<LocalBoxFuture<'static, ()>> {
        self.config.tap_timeout().map(deadline)
    }

    fn current(&self) -> WasmResult<Rc<CardAccount<HaloTransport>>> {
        self.account.borrow().clone().ok_or(WasmError::NotConnected)
    }

    fn client(&self) -> WasmResult<NodeClient> {
        self.client
            .clone()
            .ok_or_else(|| WasmError::InvalidConfig("rpcUrl is not configured".to_string()))
    }

    fn contracts(&self) -> WasmResult<&Contracts> {
        self.config
            .contracts
            .as_ref()
            .ok_or_else(|| WasmError::InvalidConfig("contracts are not configured".to_string()))
    }

    async fn run_amount_flow(
        &self,
        amount: &str,
        build: fn(&Contracts, U256) -> Vec<ContractCall>,
    ) -> WasmResult<String> {
        let amount = parse_token_amount(amount)?;
        let calls = build(self.contracts()?, amount);
        self.run_calls(calls).await
    }

    async fn run_calls(&self, calls: Vec<ContractCall>) -> WasmResult<String> {
        let client = self.client()?;
        let contracts = self.contracts()?;
        let account = self.current()?.connect(Rc::clone(&client));
        let pass = self.gate.enter()?;

        let calls = contracts
            .without_granted_approvals(&*client, account.address(), calls)
            .await?;
        let steps: Vec<&str> = calls.iter().map(|call| call.signature).collect();
        info!(?steps, "starting multi-step submission");

        let intents: Vec<TransactionIntent> = calls
            .into_iter()
            .map(|call| call.into_intent(self.config.chain_id))
            .collect();
        let account = &account;
        let receipts = send_sequence_with(&client, &intents, |intent| {
            let abort = pass.abort(self.tap_deadline());
            async move { account.send_transaction_with(&intent, abort?).await }
        })
        .await?;

        let hashes: Vec<String> = receipts
            .iter()
            .map(|receipt| receipt.transaction_hash.to_string())
            .collect();
        Ok(json!(hashes).to_string())
    }
}
