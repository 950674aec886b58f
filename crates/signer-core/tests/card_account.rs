//! End-to-end signing against a simulated card and a scripted node.
//!
//! The card is a software secp256k1 key answering the same JSON the card
//! library returns; the node answers JSON-RPC requests by method, so the
//! real [`JsonRpcClient`] is exercised on every path.

// Silence unused crate dependency warnings for test binary
use alloy_json_rpc as _;
use alloy_rlp as _;
use alloy_rpc_types_eth as _;
use alloy_sol_types as _;
use serde as _;
use thiserror as _;
use tracing as _;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use alloy_primitives::{B256, U256, keccak256};
use async_trait::async_trait;
use futures::FutureExt;
use futures::executor::block_on;
use k256::ecdsa::SigningKey;
use serde_json::{Value, json};

use nfc_evm_signer_core::calls::Contracts;
use nfc_evm_signer_core::card::{Abort, CardTransport, SignCommand, SigningEvents};
use nfc_evm_signer_core::crypto;
use nfc_evm_signer_core::flow::send_sequence;
use nfc_evm_signer_core::rpc::{RpcTransport, Sleep};
use nfc_evm_signer_core::session::{KeyValueStore, MemoryStore};
use nfc_evm_signer_core::{
    Account, Address, CardAccount, Error, JsonRpcClient, Result as CoreResult, RpcErrorKind,
    SessionStore, SignedTransaction, Transaction, TransactionIntent, build_digest, finalize,
    hash_personal_message,
};

const CHAIN_ID: u64 = 545;

/// A tap-card backed by a software key.
struct SimulatedCard {
    key: SigningKey,
    taps: Cell<u32>,
    reply_len: Option<usize>,
}

impl SimulatedCard {
    fn new(seed: u8) -> Self {
        Self {
            key: SigningKey::from_slice(&[seed; 32]).unwrap(),
            taps: Cell::new(0),
            reply_len: None,
        }
    }

    fn address(&self) -> Address {
        Address::from_public_key(self.key.verifying_key())
    }
}

#[async_trait(?Send)]
impl CardTransport for SimulatedCard {
    async fn exchange(&self, command: &SignCommand, status: SigningEvents) -> CoreResult<Value> {
        self.taps.set(self.taps.get() + 1);
        status.report_status("init");
        status.report_status("scanned");

        let digest = match (&command.digest, &command.message) {
            (Some(digest), _) => B256::from_slice(&hex::decode(digest)?),
            (None, Some(message)) => keccak256(hex::decode(message)?),
            (None, None) => return Err(Error::DeviceFailure("empty command".into())),
        };
        let signature = crypto::sign_hash(&self.key, &digest)?;
        let mut ether = hex::encode(signature.to_bytes());
        if let Some(len) = self.reply_len {
            ether = format!("{ether:0<len$}");
            ether.truncate(len);
        }

        Ok(json!({
            "etherAddress": hex::encode(self.address().as_bytes()),
            "signature": {"ether": ether},
            "publicKey": hex::encode(self.key.verifying_key().to_encoded_point(false)),
            "input": {"keyNo": command.key_no},
        }))
    }
}

/// A card that never answers.
struct SilentCard;

#[async_trait(?Send)]
impl CardTransport for SilentCard {
    async fn exchange(&self, _command: &SignCommand, _status: SigningEvents) -> CoreResult<Value> {
        futures::future::pending().await
    }
}

/// A JSON-RPC node that mines every broadcast on the second receipt lookup.
#[derive(Default)]
struct ScriptedNode {
    methods: RefCell<Vec<String>>,
    broadcasts: RefCell<Vec<Vec<u8>>>,
    lookups: Cell<u32>,
    revert_index: Option<usize>,
}

impl ScriptedNode {
    fn count(&self, method: &str) -> usize {
        self.methods.borrow().iter().filter(|m| *m == method).count()
    }

    fn answer(&self, method: &str, params: &Value) -> Value {
        match method {
            "eth_chainId" => json!(format!("0x{CHAIN_ID:x}")),
            "eth_estimateGas" => json!("0x5208"),
            "eth_gasPrice" => json!("0x3b9aca00"),
            "eth_getTransactionCount" => json!("0x7"),
            "eth_sendRawTransaction" => {
                let payload = params[0].as_str().unwrap().trim_start_matches("0x");
                let raw = hex::decode(payload).unwrap();
                let hash = keccak256(&raw);
                self.broadcasts.borrow_mut().push(raw);
                json!(hash.to_string())
            }
            "eth_getTransactionReceipt" => {
                self.lookups.set(self.lookups.get() + 1);
                if self.lookups.get() % 2 == 1 {
                    return Value::Null;
                }
                let hash: B256 = params[0].as_str().unwrap().parse().unwrap();
                let index = self
                    .broadcasts
                    .borrow()
                    .iter()
                    .position(|raw| keccak256(raw) == hash)
                    .unwrap();
                let status = if self.revert_index == Some(index) { "0x0" } else { "0x1" };
                json!({
                    "type": "0x0",
                    "status": status,
                    "cumulativeGasUsed": "0x5208",
                    "logs": [],
                    "logsBloom": format!("0x{}", "00".repeat(256)),
                    "transactionHash": hash.to_string(),
                    "transactionIndex": "0x0",
                    "blockHash": format!("0x{}", "cd".repeat(32)),
                    "blockNumber": format!("0x{:x}", index + 1),
                    "gasUsed": "0x5208",
                    "effectiveGasPrice": "0x3b9aca00",
                    "from": "0x0000000000000000000000000000000000000001",
                    "to": "0x4242424242424242424242424242424242424242",
                    "contractAddress": null,
                })
            }
            other => panic!("unexpected method {other}"),
        }
    }
}

#[async_trait(?Send)]
impl RpcTransport for &ScriptedNode {
    async fn send(&self, body: String) -> CoreResult<String> {
        let request: Value = serde_json::from_str(&body).unwrap();
        let method = request["method"].as_str().unwrap().to_string();
        let result = self.answer(&method, &request["params"]);
        self.methods.borrow_mut().push(method);
        Ok(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}).to_string())
    }
}

struct NoSleep;

#[async_trait(?Send)]
impl Sleep for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

fn client(node: &ScriptedNode) -> JsonRpcClient<&ScriptedNode, NoSleep> {
    JsonRpcClient::new(node, NoSleep)
}

fn transfer_intent() -> TransactionIntent {
    TransactionIntent::new(Address::new([0x42; 20]), CHAIN_ID).with_value(U256::from(1_000u64))
}

#[test]
fn matching_card_signs_and_broadcasts() {
    let card = SimulatedCard::new(11);
    let node = ScriptedNode::default();

    let account = block_on(CardAccount::tap_to_connect(&card, 1, Abort::never())).unwrap();
    assert_eq!(account.address(), card.address());
    let account = account.connect(client(&node));

    let hash = block_on(account.send_transaction(&transfer_intent())).unwrap();

    let broadcasts = node.broadcasts.borrow();
    assert_eq!(broadcasts.len(), 1);
    let signed = SignedTransaction::decode(&broadcasts[0]).unwrap();
    assert_eq!(signed.hash(), hash);
    assert_eq!(signed.recover_signer().unwrap(), card.address());

    let Transaction::Legacy(tx) = &signed.transaction else {
        panic!("expected a legacy transaction");
    };
    assert_eq!(tx.nonce, 7);
    assert_eq!(tx.gas_limit, 21_000);
    assert_eq!(tx.gas_price, U256::from(1_000_000_000u64));
    assert_eq!(tx.chain_id, CHAIN_ID);
    assert_eq!(card.taps.get(), 2);
}

#[test]
fn eip1559_intent_broadcasts_typed_transaction() {
    let card = SimulatedCard::new(11);
    let node = ScriptedNode::default();
    let account = CardAccount::new(&card, card.address(), 1).connect(client(&node));

    let intent = transfer_intent().with_eip1559_fees(U256::from(50u64), U256::from(2u64));
    block_on(account.send_transaction(&intent)).unwrap();

    assert_eq!(node.count("eth_gasPrice"), 0);
    let raw = node.broadcasts.borrow()[0].clone();
    assert_eq!(raw[0], 0x02);
    let signed = SignedTransaction::decode(&raw).unwrap();
    assert_eq!(signed.recover_signer().unwrap(), card.address());
}

#[test]
fn other_card_is_rejected_and_nothing_is_broadcast() {
    let expected = SimulatedCard::new(11);
    let tapped = SimulatedCard::new(12);
    let node = ScriptedNode::default();
    let account = CardAccount::new(&tapped, expected.address(), 1).connect(client(&node));

    let err = block_on(account.send_transaction(&transfer_intent())).unwrap_err();
    match err {
        Error::WrongCard { expected: e, actual } => {
            assert_eq!(e, expected.address().to_checksum_hex());
            assert_eq!(actual, tapped.address().to_checksum_hex());
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(node.count("eth_sendRawTransaction"), 0);
}

#[test]
fn signature_length_is_gated() {
    for len in [128, 129, 131, 132] {
        let mut card = SimulatedCard::new(11);
        card.reply_len = Some(len);
        let address = card.address();
        let account = CardAccount::new(&card, address, 1);

        let err = block_on(account.sign_message(b"hello")).unwrap_err();
        assert!(matches!(err, Error::MalformedSignature(_)), "length {len}: {err:?}");
    }
}

#[test]
fn digest_and_finalize_are_bound() {
    let card = SimulatedCard::new(11);
    let first = transfer_intent().with_gas(21_000).with_nonce(0);
    let second = first.clone().with_nonce(1);

    let (first_tx, _) = build_digest(&first).unwrap();
    let (_, second_digest) = build_digest(&second).unwrap();
    let signature = crypto::sign_hash(&card.key, &second_digest).unwrap();

    let raw = finalize(&first_tx, &signature);
    let recovered = SignedTransaction::decode(&raw).unwrap().recover_signer().unwrap();
    assert_ne!(recovered, card.address());
}

#[test]
fn message_signature_recovers_to_card() {
    let card = SimulatedCard::new(11);
    let account = CardAccount::new(&card, card.address(), 1);

    let signature = block_on(account.sign_message(b"credit line terms")).unwrap();
    let digest = hash_personal_message(b"credit line terms");
    assert!(crypto::is_low_s(&signature));
    assert_eq!(crypto::recover_address(&digest, &signature).unwrap(), card.address());
}

#[test]
fn double_prefixed_session_self_heals() {
    let card = SimulatedCard::new(11);
    let store = MemoryStore::new();
    let doubled = format!("0x{}", card.address().to_hex());
    let blob = json!({"address": doubled, "isConnected": true}).to_string();
    store.set("wallet_data", &blob).unwrap();
    store.set("address", &doubled).unwrap();
    store.set("connected", "true").unwrap();

    let sessions = SessionStore::new(&store);
    let session = sessions.load().unwrap();
    assert_eq!(session.address, card.address());
    assert_eq!(
        store.get("address").unwrap().as_deref(),
        Some(card.address().to_checksum_hex().as_str())
    );

    let account = CardAccount::from_session(&card, &session, 1).unwrap();
    block_on(account.sign_message(b"restored")).unwrap();
}

#[test]
fn corrupted_session_is_wiped() {
    let store = MemoryStore::new();
    store.set("wallet_data", r#"{"address":"0x0x1234","isConnected":true}"#).unwrap();
    store.set("connected", "true").unwrap();

    assert!(SessionStore::new(&store).load().is_none());
    assert!(store.is_empty());
}

#[test]
fn pay_with_credit_confirms_each_step() {
    let card = SimulatedCard::new(11);
    let node = ScriptedNode::default();
    let account = CardAccount::new(&card, card.address(), 1).connect(client(&node));
    let contracts = Contracts {
        token: Address::new([0x10; 20]),
        credit_manager: Address::new([0x20; 20]),
        collateral_vault: Address::new([0x30; 20]),
        lending_pool: Address::new([0x40; 20]),
    };

    let intents: Vec<_> = contracts
        .pay_with_credit(Address::new([0x99; 20]), U256::from(5_000_000u64))
        .into_iter()
        .map(|call| call.into_intent(CHAIN_ID))
        .collect();
    let receipts = block_on(send_sequence(&account, account.client().unwrap(), &intents)).unwrap();

    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[0].block_number, Some(1));
    assert_eq!(receipts[1].block_number, Some(2));
    assert_eq!(card.taps.get(), 2);

    let methods = node.methods.borrow();
    let first_send = methods.iter().position(|m| m == "eth_sendRawTransaction").unwrap();
    let last_send = methods.iter().rposition(|m| m == "eth_sendRawTransaction").unwrap();
    let lookups_between = methods[first_send..last_send]
        .iter()
        .filter(|m| *m == "eth_getTransactionReceipt")
        .count();
    assert_eq!(lookups_between, 2);
}

#[test]
fn reverted_step_stops_the_flow() {
    let card = SimulatedCard::new(11);
    let node = ScriptedNode {
        revert_index: Some(0),
        ..ScriptedNode::default()
    };
    let account = CardAccount::new(&card, card.address(), 1).connect(client(&node));
    let intents = vec![transfer_intent(), transfer_intent()];

    let err = block_on(send_sequence(&account, account.client().unwrap(), &intents)).unwrap_err();
    assert_eq!(err.rpc_kind(), Some(RpcErrorKind::Reverted));
    assert_eq!(card.taps.get(), 1);
}

#[test]
fn concurrent_challenge_is_refused() {
    let card = SilentCard;
    let account = CardAccount::new(&card, Address::new([1; 20]), 1);
    let (abort, cancel) = Abort::never().cancellable();

    let mut pending = account
        .sign_digest_with(B256::repeat_byte(1), abort)
        .boxed_local();
    assert!((&mut pending).now_or_never().is_none());

    let err = block_on(account.sign_message(b"second")).unwrap_err();
    assert!(matches!(err, Error::SigningInProgress));

    cancel.cancel();
    assert!(matches!(block_on(pending), Err(Error::Cancelled)));
}

#[tokio::test]
async fn unanswered_tap_times_out() {
    let card = SilentCard;
    let account = CardAccount::new(&card, Address::new([1; 20]), 1)
        .with_tap_timeout(Rc::new(|| tokio::time::sleep(Duration::from_millis(20)).boxed_local()));

    let err = account.sign_message(b"never signed").await.unwrap_err();
    assert!(matches!(err, Error::TimedOut));
    assert!(!err.is_retryable());
}
