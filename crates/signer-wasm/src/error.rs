//! JavaScript-friendly error types for WASM bindings.
//!
//! Every error crosses into JavaScript as an `Error` object whose `name` is a
//! stable code (see [`WasmError::code`]) and whose `message` is the
//! human-readable text, so UI code can branch without parsing messages.
//!
//! # Example
//!
//! ```javascript
//! try {
//!     await wallet.sendTransaction(JSON.stringify(intent));
//! } catch (err) {
//!     if (err.name === "WrongCard") showToast("That is not your card");
//!     else if (err.name === "TapFailed") showToast("Tap again");
//! }
//! ```

use std::{error, fmt};

use js_sys::Error as JsError;
use nfc_evm_signer_core::RpcErrorKind;
use nfc_evm_signer_core::error::Error as CoreError;
use wasm_bindgen::prelude::*;

/// Error type for WASM operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasmError {
    /// The page has no `window` (not running in a browser).
    NoWindow,

    /// `localStorage` is disabled or unavailable.
    StorageUnavailable(String),

    /// No card account is connected.
    NotConnected,

    /// A different card answered the challenge.
    WrongCard {
        /// The connected account.
        expected: String,
        /// The address the card reported.
        actual: String,
    },

    /// The tap was lost; the same operation may be retried.
    TapFailed(String),

    /// The card or card library failed.
    DeviceFailure(String),

    /// The card's reply could not be used.
    MalformedResponse(String),

    /// No tap arrived before the deadline.
    Timeout,

    /// The challenge was cancelled.
    Cancelled,

    /// Another challenge is already waiting for a tap.
    SigningInProgress,

    /// Invalid transaction intent.
    InvalidTransaction(String),

    /// Invalid typed data (EIP-712).
    InvalidTypedData(String),

    /// Invalid configuration.
    InvalidConfig(String),

    /// The node rejected the request.
    Rpc {
        /// Classified failure kind.
        kind: RpcErrorKind,
        /// Node message.
        message: String,
    },

    /// Any other core library error.
    CoreError(String),

    /// JavaScript error from a browser API.
    JsError(String),
}

impl WasmError {
    /// Returns the stable code exposed as the JavaScript error `name`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoWindow => "NoWindow",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::NotConnected => "NotConnected",
            Self::WrongCard { .. } => "WrongCard",
            Self::TapFailed(_) => "TapFailed",
            Self::DeviceFailure(_) => "DeviceFailure",
            Self::MalformedResponse(_) => "MalformedResponse",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::SigningInProgress => "SigningInProgress",
            Self::InvalidTransaction(_) => "InvalidTransaction",
            Self::InvalidTypedData(_) => "InvalidTypedData",
            Self::InvalidConfig(_) => "InvalidConfig",
            Self::Rpc { kind, .. } => match kind {
                RpcErrorKind::InsufficientFunds => "InsufficientFunds",
                RpcErrorKind::Reverted => "Reverted",
                RpcErrorKind::NonceTooLow => "NonceTooLow",
                RpcErrorKind::UserRejected => "UserRejected",
                RpcErrorKind::Transport => "RpcTransport",
                RpcErrorKind::Other => "RpcError",
            },
            Self::CoreError(_) => "CoreError",
            Self::JsError(_) => "JsError",
        }
    }
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWindow => {
                write!(f, "Not running in a browser window")
            }
            Self::StorageUnavailable(msg) => {
                write!(f, "Local storage unavailable: {msg}")
            }
            Self::NotConnected => {
                write!(f, "No card account is connected")
            }
            Self::WrongCard { expected, actual } => {
                write!(f, "Wrong card: expected {expected}, got {actual}")
            }
            Self::TapFailed(msg) => {
                write!(f, "Card tap failed, please tap again: {msg}")
            }
            Self::DeviceFailure(msg) => {
                write!(f, "Card failure: {msg}")
            }
            Self::MalformedResponse(msg) => {
                write!(f, "Unusable card response: {msg}")
            }
            Self::Timeout => {
                write!(f, "Timed out waiting for the card")
            }
            Self::Cancelled => {
                write!(f, "Card request cancelled")
            }
            Self::SigningInProgress => {
                write!(f, "Another card request is already in progress")
            }
            Self::InvalidTransaction(msg) => {
                write!(f, "Invalid transaction: {msg}")
            }
            Self::InvalidTypedData(msg) => {
                write!(f, "Invalid typed data: {msg}")
            }
            Self::InvalidConfig(msg) => {
                write!(f, "Invalid configuration: {msg}")
            }
            Self::Rpc { kind, message } => {
                write!(f, "{kind}: {message}")
            }
            Self::CoreError(msg) => {
                write!(f, "Core error: {msg}")
            }
            Self::JsError(msg) => {
                write!(f, "JavaScript error: {msg}")
            }
        }
    }
}

impl error::Error for WasmError {}

impl From<WasmError> for JsValue {
    fn from(error: WasmError) -> Self {
        let js = JsError::new(&error.to_string());
        js.set_name(error.code());
        js.into()
    }
}

impl From<CoreError> for WasmError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::WrongCard { expected, actual } => Self::WrongCard { expected, actual },
            CoreError::TapFailed(msg) => Self::TapFailed(msg),
            CoreError::DeviceFailure(msg) => Self::DeviceFailure(msg),
            CoreError::MalformedResponse(msg) | CoreError::MalformedSignature(msg) => {
                Self::MalformedResponse(msg)
            }
            CoreError::TimedOut => Self::Timeout,
            CoreError::Cancelled => Self::Cancelled,
            CoreError::SigningInProgress => Self::SigningInProgress,
            CoreError::Validation(msg) => Self::InvalidTransaction(msg),
            CoreError::InvalidTypedData(msg) | CoreError::UndefinedType(msg) => {
                Self::InvalidTypedData(msg)
            }
            CoreError::Configuration(msg) => Self::InvalidConfig(msg),
            CoreError::Persistence(msg) => Self::StorageUnavailable(msg),
            CoreError::Rpc(err) => Self::Rpc {
                kind: err.kind,
                message: err.message,
            },
            other => Self::CoreError(other.to_string()),
        }
    }
}

impl From<JsValue> for WasmError {
    fn from(value: JsValue) -> Self {
        Self::JsError(js_error_message(&value))
    }
}

/// Extracts a readable message from a thrown JavaScript value.
pub(crate) fn js_error_message(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        s
    } else if let Some(err) = value.dyn_ref::<JsError>() {
        err.message().into()
    } else {
        format!("{value:?}")
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;

#[cfg(test)]
mod tests {
    use nfc_evm_signer_core::RpcError;

    use super::*;

    #[test]
    fn error_display() {
        let error = WasmError::Timeout;
        assert_eq!(error.to_string(), "Timed out waiting for the card");
    }

    #[test]
    fn core_errors_keep_their_category() {
        let wrong = WasmError::from(CoreError::WrongCard {
            expected: "0xA".to_string(),
            actual: "0xB".to_string(),
        });
        assert_eq!(wrong.code(), "WrongCard");

        assert_eq!(WasmError::from(CoreError::TimedOut), WasmError::Timeout);
        assert_eq!(
            WasmError::from(CoreError::TapFailed("lost".into())).code(),
            "TapFailed"
        );

        let rpc = CoreError::Rpc(RpcError::classify(Some(-32000), "insufficient funds"));
        assert_eq!(WasmError::from(rpc).code(), "InsufficientFunds");
    }
}
