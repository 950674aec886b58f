//! Error types for the NFC card EVM signer library.
//!
//! This module provides a single error type [`enum@Error`] covering every
//! failure mode of the signing pipeline, from address validation through the
//! card challenge/response exchange to broadcasting over RPC.
//!
//! # Error Categories
//!
//! - **Validation errors**: malformed intents or addresses, raised before any I/O
//! - **Card errors**: wrong card tapped, malformed responses, tap failures, deadlines
//! - **Setup errors**: missing collaborators such as an RPC client
//! - **Persistence errors**: storage writes that could not be completed
//! - **RPC errors**: downstream failures carrying a structured [`RpcErrorKind`]
//!
//! Only [`Error::TapFailed`] is recoverable by re-invoking the same operation;
//! see [`Error::is_retryable`].
//!
//! # Example
//!
//! ```
//! use nfc_evm_signer_core::Error;
//!
//! let err = Error::Validation("missing recipient".to_string());
//! assert!(!err.is_retryable());
//! assert_eq!(err.to_string(), "invalid input: missing recipient");
//! ```

use alloy_rlp::Error as AlloyRlpError;
use core::result::Result as CoreResult;
use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::rpc::{RpcError, RpcErrorKind};

/// The main error type for the NFC card EVM signer library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// An intent, address or argument failed validation before any I/O.
    #[error("invalid input: {0}")]
    Validation(String),

    // =========================================================================
    // Card Exchange Errors
    // =========================================================================
    /// The card that answered the challenge is not the account's card.
    #[error("wrong card tapped: expected {expected}, got {actual}; switch to the correct card")]
    WrongCard {
        /// The address of the account that requested the signature.
        expected: String,
        /// The normalized address reported by the card.
        actual: String,
    },

    /// The card returned a signature with the wrong shape or length.
    #[error("malformed signature from card: {0}")]
    MalformedSignature(String),

    /// The card response could not be decoded into a sign response.
    #[error("malformed card response: {0}")]
    MalformedResponse(String),

    /// The tap failed; a fresh challenge may be issued.
    #[error("card tap failed: {0}")]
    TapFailed(String),

    /// The card or its transport reported a terminal failure.
    #[error("card exchange failed: {0}")]
    DeviceFailure(String),

    /// The caller's deadline expired before the card answered.
    #[error("timed out waiting for card tap")]
    TimedOut,

    /// The caller cancelled the challenge.
    #[error("signing cancelled")]
    Cancelled,

    /// Another challenge is already waiting for a tap on this signer.
    #[error("a signing request is already in progress")]
    SigningInProgress,

    // =========================================================================
    // Setup Errors
    // =========================================================================
    /// A required collaborator is missing or misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The session store could not be written.
    #[error("failed to persist wallet session: {0}")]
    Persistence(String),

    // =========================================================================
    // Downstream Errors
    // =========================================================================
    /// The RPC client or the chain rejected a request.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    /// A signature could not be parsed or recovered.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The EIP-712 typed data is invalid.
    #[error("invalid EIP-712 typed data: {0}")]
    InvalidTypedData(String),

    /// A type referenced in the typed data is not defined.
    #[error("undefined type in EIP-712 data: {0}")]
    UndefinedType(String),

    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// A signed transaction payload could not be decoded.
    #[error("RLP decoding failed: {0}")]
    RlpDecodingFailed(String),
}

impl Error {
    /// Returns `true` if the failed operation may be re-invoked from scratch.
    ///
    /// Only a failed tap qualifies. Every other failure is terminal for the
    /// current attempt and needs explicit user action before trying again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TapFailed(_))
    }

    /// Returns the structured RPC failure kind, if this is an RPC error.
    #[must_use]
    pub const fn rpc_kind(&self) -> Option<RpcErrorKind> {
        match self {
            Self::Rpc(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Self::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<AlloyRlpError> for Error {
    fn from(err: AlloyRlpError) -> Self {
        Self::RlpDecodingFailed(err.to_string())
    }
}

/// A specialized [`Result`] type for signer operations.
pub type Result<T> = CoreResult<T, Error>;
