//! Wire types exchanged with the card library.
//!
//! A challenge is a [`SignCommand`]; the card answers with a [`SignResponse`].
//! While waiting the library reports free-form status causes, decoded here
//! into [`CardStatus`].
//!
//! Responses are decoded strictly. A response missing `etherAddress` or
//! `signature.ether`, or carrying fields this crate does not know, is a
//! [`Error::MalformedResponse`] rather than a partially filled struct.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Command name understood by the card for signing.
const SIGN: &str = "sign";

/// A sign request for the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignCommand {
    /// Always `"sign"`.
    pub name: String,

    /// Key slot on the card.
    pub key_no: u8,

    /// 64 lowercase hex digits, no `0x` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Hex-encoded message for the card to hash and sign itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SignCommand {
    /// Builds a command that signs a precomputed 32-byte digest.
    #[must_use]
    pub fn digest(key_no: u8, digest: &B256) -> Self {
        Self {
            name: SIGN.to_string(),
            key_no,
            digest: Some(hex::encode(digest)),
            message: None,
        }
    }

    /// Builds a command that signs a hex message.
    ///
    /// Used on connect, where the signature itself is discarded and only the
    /// reported address and public key matter.
    #[must_use]
    pub fn message(key_no: u8, message_hex: &str) -> Self {
        Self {
            name: SIGN.to_string(),
            key_no,
            digest: None,
            message: Some(message_hex.trim_start_matches("0x").to_string()),
        }
    }

    /// Serializes the command to the JSON value the card library expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Raw signature components as reported by the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSignature {
    /// R as hex.
    pub r: String,
    /// S as hex.
    pub s: String,
    /// Recovery value.
    pub v: u8,
}

/// The `signature` object of a card response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CardSignature {
    /// `r || s || v` as 130 hex digits, usually without `0x`.
    pub ether: String,

    /// DER encoding of `(r, s)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub der: Option<String>,

    /// Split components.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<RawSignature>,
}

/// A card's answer to a [`SignCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignResponse {
    /// Address of the key that signed, usually without `0x`.
    pub ether_address: String,

    /// The signature.
    pub signature: CardSignature,

    /// SEC1 public key as hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Echo of the command the card executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl SignResponse {
    /// Decodes a card response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if required fields are missing,
    /// have the wrong type, or unknown fields are present.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::MalformedResponse(e.to_string()))
    }
}

/// Progress reported by the card library while a command is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardStatus {
    /// The library is waiting for a tap.
    Init,
    /// The last tap was unreadable; tap again.
    Retry,
    /// A card was read and the command is executing.
    Scanned,
    /// Any other cause, passed through verbatim.
    Other(String),
}

impl CardStatus {
    /// Decodes a status cause string.
    #[must_use]
    pub fn from_cause(cause: &str) -> Self {
        match cause {
            "init" => Self::Init,
            "retry" => Self::Retry,
            "scanned" => Self::Scanned,
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response() -> Value {
        json!({
            "etherAddress": "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",
            "signature": {
                "ether": "ab".repeat(65),
                "der": "3006020101020102",
                "raw": {"r": "01", "s": "02", "v": 27}
            },
            "publicKey": "04ab",
            "input": {"keyNo": 1, "digest": "00"}
        })
    }

    #[test]
    fn digest_command_shape() {
        let digest = B256::repeat_byte(0xAB);
        let value = SignCommand::digest(1, &digest).to_value().unwrap();
        assert_eq!(
            value,
            json!({"name": "sign", "keyNo": 1, "digest": "ab".repeat(32)})
        );
    }

    #[test]
    fn message_command_strips_prefix() {
        let value = SignCommand::message(2, "0x0123").to_value().unwrap();
        assert_eq!(value, json!({"name": "sign", "keyNo": 2, "message": "0123"}));
    }

    #[test]
    fn full_response_decodes() {
        let decoded = SignResponse::from_value(response()).unwrap();
        assert_eq!(decoded.signature.raw.unwrap().v, 27);
        assert_eq!(decoded.public_key.as_deref(), Some("04ab"));
    }

    #[test]
    fn missing_ether_address_is_malformed() {
        let mut value = response();
        value.as_object_mut().unwrap().remove("etherAddress");
        assert!(matches!(
            SignResponse::from_value(value),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn missing_signature_ether_is_malformed() {
        let mut value = response();
        value["signature"].as_object_mut().unwrap().remove("ether");
        assert!(matches!(
            SignResponse::from_value(value),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut value = response();
        value["surprise"] = json!(true);
        assert!(matches!(
            SignResponse::from_value(value),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn status_causes() {
        assert_eq!(CardStatus::from_cause("init"), CardStatus::Init);
        assert_eq!(CardStatus::from_cause("retry"), CardStatus::Retry);
        assert_eq!(CardStatus::from_cause("scanned"), CardStatus::Scanned);
        assert_eq!(
            CardStatus::from_cause("nfc_off"),
            CardStatus::Other("nfc_off".to_string())
        );
    }
}
