//! Blockchain RPC: the [`RpcClient`] capability and a JSON-RPC 2.0 client.
//!
//! The account adapter only depends on [`RpcClient`]. This module also ships
//! [`JsonRpcClient`], which frames [`alloy_json_rpc`] requests over any
//! [`RpcTransport`] (the browser crate provides one backed by `fetch`).
//! Requests, receipts, logs and filters are the [`alloy_rpc_types_eth`]
//! types, re-exported here.
//!
//! Failures are classified exactly once, here, into an [`RpcErrorKind`], so
//! callers can branch on "insufficient funds" or "reverted" without matching
//! on message text.
//!
//! # Example
//!
//! ```
//! use nfc_evm_signer_core::rpc::{RpcError, RpcErrorKind};
//!
//! let err = RpcError::classify(Some(-32000), "insufficient funds for gas * price + value");
//! assert_eq!(err.kind, RpcErrorKind::InsufficientFunds);
//!
//! let err = RpcError::classify(Some(3), "execution reverted: not enough collateral");
//! assert_eq!(err.kind, RpcErrorKind::Reverted);
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use alloy_json_rpc::{Id, Request, Response, ResponsePayload, RpcSend};
use alloy_primitives::{B256, Bytes, TxKind, U256};
pub use alloy_rpc_types_eth::{
    BlockNumberOrTag, Filter, Log, TransactionInput, TransactionReceipt, TransactionRequest,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::{Error, Result};

/// JSON-RPC error code used by nodes for reverted calls.
const REVERTED_CODE: i64 = 3;

/// EIP-1193 error code for a request the user rejected.
const USER_REJECTED_CODE: i64 = 4001;

/// Structured category of an RPC failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    /// The sender cannot cover value plus gas.
    InsufficientFunds,
    /// Execution reverted, during estimation, a call or on-chain.
    Reverted,
    /// The nonce was already used.
    NonceTooLow,
    /// The user declined the request in their wallet.
    UserRejected,
    /// The request never produced a well-formed JSON-RPC response.
    Transport,
    /// Any other node error.
    Other,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InsufficientFunds => "insufficient funds",
            Self::Reverted => "execution reverted",
            Self::NonceTooLow => "nonce too low",
            Self::UserRejected => "user rejected the request",
            Self::Transport => "transport failure",
            Self::Other => "rpc error",
        };
        f.write_str(label)
    }
}

/// An RPC failure with its classification, node error code and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    /// The structured category.
    pub kind: RpcErrorKind,
    /// The JSON-RPC error code, when the node supplied one.
    pub code: Option<i64>,
    /// The node's message, or a description of the transport failure.
    pub message: String,
}

impl RpcError {
    /// Creates an error with an explicit kind.
    #[must_use]
    pub fn new(kind: RpcErrorKind, code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Creates a [`RpcErrorKind::Transport`] error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Transport, None, message)
    }

    /// Classifies a node error from its code and message.
    ///
    /// Codes win over message text; message matching is case-insensitive and
    /// covers the phrasings of the common node implementations.
    #[must_use]
    pub fn classify(code: Option<i64>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        let kind = match code {
            Some(REVERTED_CODE) => RpcErrorKind::Reverted,
            Some(USER_REJECTED_CODE) => RpcErrorKind::UserRejected,
            _ if lower.contains("insufficient funds") => RpcErrorKind::InsufficientFunds,
            _ if lower.contains("nonce too low") || lower.contains("nonce is too low") => {
                RpcErrorKind::NonceTooLow
            }
            _ if lower.contains("revert") => RpcErrorKind::Reverted,
            _ if lower.contains("user rejected") || lower.contains("user denied") => {
                RpcErrorKind::UserRejected
            }
            _ => RpcErrorKind::Other,
        };

        Self::new(kind, code, message)
    }
}

/// Parses an integer quantity: `0x`-prefixed hex or plain decimal.
///
/// # Errors
///
/// Returns [`Error::Validation`] if the text is neither.
pub fn parse_quantity(text: &str) -> Result<u64> {
    match text.strip_prefix("0x") {
        Some("") => Ok(0),
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
    .map_err(|e| Error::Validation(format!("invalid quantity {text:?}: {e}")))
}

/// Builds the request for a message call to `to`, as sent to `eth_call`
/// and `eth_estimateGas`.
///
/// Calldata goes out as both `input` and `data`, since older nodes only
/// read the latter.
#[must_use]
pub fn message_call(to: Address, data: Bytes) -> TransactionRequest {
    TransactionRequest {
        to: Some(TxKind::Call(to.inner())),
        input: TransactionInput::both(data),
        ..TransactionRequest::default()
    }
}

/// Read/write/wait access to a chain.
#[async_trait(?Send)]
pub trait RpcClient {
    /// Returns the chain ID (`eth_chainId`).
    async fn chain_id(&self) -> Result<u64>;

    /// Returns the latest block number (`eth_blockNumber`).
    async fn block_number(&self) -> Result<u64>;

    /// Executes a read-only call (`eth_call`).
    async fn call(&self, request: &TransactionRequest, block: BlockNumberOrTag) -> Result<Bytes>;

    /// Estimates the gas a transaction needs (`eth_estimateGas`).
    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    /// Returns the current gas price (`eth_gasPrice`).
    async fn gas_price(&self) -> Result<U256>;

    /// Returns an account's nonce at `block` (`eth_getTransactionCount`).
    async fn transaction_count(&self, address: Address, block: BlockNumberOrTag) -> Result<u64>;

    /// Broadcasts a signed payload (`eth_sendRawTransaction`).
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256>;

    /// Returns the receipt if the transaction is mined (`eth_getTransactionReceipt`).
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;

    /// Waits until the transaction is mined and returns its receipt.
    async fn wait_for_transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt>;

    /// Returns logs matching a filter (`eth_getLogs`).
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>>;
}

#[async_trait(?Send)]
impl<C: RpcClient + ?Sized> RpcClient for Rc<C> {
    async fn chain_id(&self) -> Result<u64> {
        (**self).chain_id().await
    }

    async fn block_number(&self) -> Result<u64> {
        (**self).block_number().await
    }

    async fn call(&self, request: &TransactionRequest, block: BlockNumberOrTag) -> Result<Bytes> {
        (**self).call(request, block).await
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        (**self).estimate_gas(request).await
    }

    async fn gas_price(&self) -> Result<U256> {
        (**self).gas_price().await
    }

    async fn transaction_count(&self, address: Address, block: BlockNumberOrTag) -> Result<u64> {
        (**self).transaction_count(address, block).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        (**self).send_raw_transaction(raw).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        (**self).transaction_receipt(hash).await
    }

    async fn wait_for_transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        (**self).wait_for_transaction_receipt(hash).await
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        (**self).get_logs(filter).await
    }
}

/// Carries one serialized JSON-RPC request to a node and returns its body.
#[async_trait(?Send)]
pub trait RpcTransport {
    /// Sends `body` and returns the raw response body.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcErrorKind::Transport`] error if the node is unreachable
    /// or responds with a non-success HTTP status.
    async fn send(&self, body: String) -> Result<String>;
}

/// Suspends the current task between receipt polls.
#[async_trait(?Send)]
pub trait Sleep {
    /// Completes after `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Receipt polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between attempts.
    pub interval: Duration,
    /// Maximum number of receipt lookups.
    pub attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            attempts: 120,
        }
    }
}

/// A JSON-RPC 2.0 client over a pluggable transport.
pub struct JsonRpcClient<T, S> {
    transport: T,
    sleeper: S,
    poll: PollPolicy,
    next_id: Cell<u64>,
}

impl<T, S> fmt::Debug for JsonRpcClient<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("poll", &self.poll)
            .field("next_id", &self.next_id.get())
            .finish_non_exhaustive()
    }
}

impl<T: RpcTransport, S: Sleep> JsonRpcClient<T, S> {
    /// Creates a client with the default polling schedule.
    #[must_use]
    pub fn new(transport: T, sleeper: S) -> Self {
        Self {
            transport,
            sleeper,
            poll: PollPolicy::default(),
            next_id: Cell::new(1),
        }
    }

    /// Replaces the receipt polling schedule.
    #[must_use]
    pub const fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sends one request and decodes its `result`.
    ///
    /// A `null` result decodes only into types that accept it, such as
    /// `Option<_>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] with the classified kind for node errors, or
    /// [`RpcErrorKind::Transport`] for malformed responses.
    pub async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R>
    where
        P: RpcSend,
        R: DeserializeOwned,
    {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));

        let request = Request::new(method, Id::Number(id), params);
        let body = serde_json::to_string(&request)
            .map_err(|e| RpcError::transport(format!("cannot encode {method}: {e}")))?;
        debug!(method, id, "rpc request");

        let raw = self.transport.send(body).await?;
        let response: Response<Value, Value> = serde_json::from_str(&raw)
            .map_err(|e| RpcError::transport(format!("malformed response to {method}: {e}")))?;

        let result = match response.payload {
            ResponsePayload::Success(result) => result,
            ResponsePayload::Failure(err) => {
                let message = match err.data {
                    Some(Value::String(data)) => format!("{} ({data})", err.message),
                    _ => err.message.into_owned(),
                };
                let classified = RpcError::classify(Some(err.code), message);
                warn!(method, code = err.code, kind = %classified.kind, "rpc error");
                return Err(classified.into());
            }
        };

        if response.id != Id::Number(id) {
            return Err(RpcError::transport(format!("response id mismatch for {method}")).into());
        }

        serde_json::from_value(result)
            .map_err(|e| RpcError::transport(format!("unexpected {method} result: {e}")).into())
    }

    async fn request_quantity<P: RpcSend>(&self, method: &'static str, params: P) -> Result<u64> {
        let text: String = self.request(method, params).await?;
        parse_quantity(&text)
    }
}

#[async_trait(?Send)]
impl<T: RpcTransport, S: Sleep> RpcClient for JsonRpcClient<T, S> {
    async fn chain_id(&self) -> Result<u64> {
        self.request_quantity("eth_chainId", ()).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.request_quantity("eth_blockNumber", ()).await
    }

    async fn call(&self, request: &TransactionRequest, block: BlockNumberOrTag) -> Result<Bytes> {
        self.request("eth_call", (request.clone(), block)).await
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.request_quantity("eth_estimateGas", (request.clone(),))
            .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.request("eth_gasPrice", ()).await
    }

    async fn transaction_count(&self, address: Address, block: BlockNumberOrTag) -> Result<u64> {
        self.request_quantity("eth_getTransactionCount", (address.inner(), block))
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256> {
        self.request("eth_sendRawTransaction", (Bytes::copy_from_slice(raw),))
            .await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", (hash,)).await
    }

    async fn wait_for_transaction_receipt(&self, hash: B256) -> Result<TransactionReceipt> {
        for attempt in 1..=self.poll.attempts {
            if let Some(receipt) = self.transaction_receipt(hash).await? {
                debug!(%hash, attempt, "receipt available");
                return Ok(receipt);
            }
            if attempt < self.poll.attempts {
                self.sleeper.sleep(self.poll.interval).await;
            }
        }

        Err(RpcError::new(
            RpcErrorKind::Other,
            None,
            format!(
                "transaction {hash} not mined after {} attempts",
                self.poll.attempts
            ),
        )
        .into())
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        self.request("eth_getLogs", (filter.clone(),)).await
    }
}
