//! NFC Tap-Card EVM Signer Core Library
//!
//! This crate provides the core functionality for using an NFC tap-card as a
//! programmable EVM account: the card holds a secp256k1 key and signs
//! 32-byte digests over a challenge/response exchange.
//!
//! # Overview
//!
//! The card only ever sees a digest. Everything else (building the
//! transaction, hashing it, checking what comes back, assembling the signed
//! payload and broadcasting it) happens here.
//!
//! This library provides:
//!
//! - **Transaction Codec**: EIP-155 legacy and EIP-1559 transactions built
//!   from a strictly validated intent, plus decoding of signed payloads
//! - **Message Hashing**: EIP-191 personal messages and EIP-712 typed data
//! - **Challenge Signer**: the card exchange with progress events, address
//!   verification, low-S normalization, deadlines and cancellation
//! - **Account Adapter**: one [`Account`] trait over card and software wallets
//! - **RPC**: an [`RpcClient`] trait and a JSON-RPC 2.0 client
//! - **Session Store**: fail-closed persistence of the connected card
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │   Account (CardAccount / DelegatedAccount)  │  flow, calls  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transaction  │   EIP-191 /  │   Address    │   Session     │
//! │    Codec      │   EIP-712    │  Normalizer  │    Store      │
//! ├─────────────────────────────────────────────────────────────┤
//! │     ChallengeSigner (card)       │        RpcClient         │
//! ├─────────────────────────────────────────────────────────────┤
//! │   CardTransport (card library)   │   RpcTransport (fetch)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ## Building a Transaction Digest
//!
//! ```rust
//! use nfc_evm_signer_core::{Address, TransactionIntent, U256, build_digest};
//!
//! let to = Address::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
//! let intent = TransactionIntent::new(to, 545)
//!     .with_value(U256::from(1_000_000_000_000_000_000u128))
//!     .with_gas(21_000)
//!     .with_nonce(0);
//!
//! // The digest is what the card signs
//! let (tx, digest) = build_digest(&intent).unwrap();
//! assert_eq!(tx.chain_id(), 545);
//! # let _ = digest;
//! ```
//!
//! ## Hashing EIP-712 Typed Data
//!
//! ```rust
//! use nfc_evm_signer_core::{Eip712Domain, TypedData};
//! use serde_json::json;
//!
//! let domain = Eip712Domain {
//!     name: Some("Credit".to_string()),
//!     version: Some("1".to_string()),
//!     chain_id: Some(545),
//!     verifying_contract: None,
//!     salt: None,
//! };
//!
//! let types = json!({
//!     "Transfer": [
//!         {"name": "to", "type": "address"},
//!         {"name": "amount", "type": "uint256"}
//!     ]
//! });
//!
//! let message = json!({
//!     "to": "0x0000000000000000000000000000000000000001",
//!     "amount": "1000000"
//! });
//!
//! let typed_data = TypedData::new(domain, types, "Transfer".to_string(), message).unwrap();
//! let hash = typed_data.signing_hash().unwrap();
//! # let _ = hash;
//! ```
//!
//! ## Signing with a Card
//!
//! Implement [`card::CardTransport`] for whatever drives the card (the wasm
//! crate bridges to the browser card library), then:
//!
//! ```ignore
//! use nfc_evm_signer_core::{Account, CardAccount, card::Abort};
//!
//! let account = CardAccount::tap_to_connect(transport, 1, Abort::never()).await?;
//! let account = account.connect(rpc_client);
//! let tx_hash = account.send_transaction(&intent).await?;
//! ```
//!
//! # Feature Flags
//!
//! This crate currently has no optional features. All functionality is
//! included by default.
//!
//! # Security Considerations
//!
//! - The private key never leaves the card
//! - A response from any card other than the connected one is rejected
//! - Signatures are normalized to low-S and must recover to the account
//! - Persisted sessions are validated on load and wiped when inconsistent

// Modules
pub mod account;
pub mod address;
pub mod calls;
pub mod card;
pub mod config;
pub mod crypto;
pub mod eip712;
pub mod error;
pub mod flow;
pub mod message;
pub mod rpc;
pub mod session;
pub mod signature;
pub mod transaction;

// Re-exports for convenience
pub use account::{Account, CardAccount, DelegatedAccount, WalletProvider};
pub use address::Address;
pub use card::{Abort, CardTransport, ChallengeSigner, SigningEvent};
pub use config::SignerConfig;
pub use eip712::{Eip712Domain, TypedData};
pub use error::{Error, Result};
pub use message::hash_personal_message;
pub use rpc::{JsonRpcClient, RpcClient, RpcError, RpcErrorKind};
pub use session::{KeyValueStore, SessionStore, WalletSession};
pub use signature::Signature;
pub use transaction::{
    AccessListEntry, Eip1559Transaction, LegacyTransaction, SignedTransaction, Transaction,
    TransactionIntent, build_digest, finalize,
};

// Re-export commonly used alloy types
pub use alloy_primitives::{B256, U256};
