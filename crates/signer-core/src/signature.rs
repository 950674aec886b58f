//! Recoverable secp256k1 signatures.
//!
//! This module provides the [`Signature`] type: the `(r, s, parity)` triple
//! that the card produces over a 32-byte digest and that Ethereum needs to
//! recover the signer.
//!
//! # Signature Format
//!
//! - `r`: 32-byte x-coordinate of the ephemeral point
//! - `s`: 32-byte signature scalar
//! - `v`: the y-parity of the ephemeral point (`0` or `1`)
//!
//! The wire form is 65 bytes, `r || s || v`, where `v` is written as
//! `27 + parity` (the convention used for EIP-191 and EIP-712 signatures).
//! Cards report this form as a 132-character hex string.
//!
//! # Example
//!
//! ```
//! use nfc_evm_signer_core::Signature;
//!
//! let hex = format!("0x{}{}1b", "11".repeat(32), "22".repeat(32));
//! let sig = Signature::from_card_hex(&hex).unwrap();
//!
//! assert_eq!(sig.v(), 0);
//! assert_eq!(sig.to_hex(), hex);
//! ```

use core::fmt;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of a card signature string: `0x` followed by 130 hex digits.
pub const CARD_HEX_LEN: usize = 132;

/// Offset added to the parity in the `v` byte of the 65-byte wire form.
const LEGACY_V_OFFSET: u8 = 27;

/// A recoverable secp256k1 ECDSA signature.
///
/// `v` always holds the y-parity (`0` or `1`); the 27-offset form used on
/// the wire is applied only when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// The R component of the signature (32 bytes).
    #[serde(with = "hex_bytes")]
    r: [u8; 32],

    /// The S component of the signature (32 bytes).
    #[serde(with = "hex_bytes")]
    s: [u8; 32],

    /// The y-parity (`0` or `1`).
    v: u8,
}

/// Serde helper for hex encoding/decoding 32-byte arrays.
mod hex_bytes {
    use hex::{decode, encode};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", encode(bytes)))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = decode(s).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("expected 32 bytes"))
    }
}

impl Signature {
    /// The length of a serialized signature in bytes.
    pub const BYTE_LEN: usize = 65;

    /// Creates a new signature from raw components.
    ///
    /// # Arguments
    ///
    /// * `r` - The R component as a 32-byte array
    /// * `s` - The S component as a 32-byte array
    /// * `parity` - The y-parity; any non-zero value is treated as `1`
    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32], parity: u8) -> Self {
        Self {
            r,
            s,
            v: if parity == 0 { 0 } else { 1 },
        }
    }

    /// Maps a recovery byte to a y-parity.
    ///
    /// Accepts `27`/`28` (legacy offset form) and `0`/`1` (raw parity).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSignature`] for any other value.
    pub fn parity_from_v(v: u8) -> Result<u8> {
        match v {
            0 | 1 => Ok(v),
            27 | 28 => Ok(v - LEGACY_V_OFFSET),
            other => Err(Error::MalformedSignature(format!(
                "unsupported recovery value v={other}"
            ))),
        }
    }

    /// Creates a signature from a 65-byte slice.
    ///
    /// # Arguments
    ///
    /// * `bytes` - A 65-byte slice containing `r || s || v`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the slice is not exactly 65
    /// bytes, or [`Error::MalformedSignature`] if `v` is not one of
    /// `0`, `1`, `27`, `28`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::BYTE_LEN {
            return Err(Error::InvalidSignature(format!(
                "expected {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            )));
        }

        let r: [u8; 32] = bytes[0..32]
            .try_into()
            .map_err(|_| Error::InvalidSignature("invalid r component".to_string()))?;
        let s: [u8; 32] = bytes[32..64]
            .try_into()
            .map_err(|_| Error::InvalidSignature("invalid s component".to_string()))?;
        let parity = Self::parity_from_v(bytes[64])?;

        Ok(Self::new(r, s, parity))
    }

    /// Parses the signature string returned by a card.
    ///
    /// A missing `0x` prefix is added first. The result must then be exactly
    /// [`CARD_HEX_LEN`] characters; the shape is checked before any decoding
    /// so a truncated or padded response never reaches the curve arithmetic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedSignature`] on a wrong length, non-hex body
    /// or unsupported `v`.
    pub fn from_card_hex(raw: &str) -> Result<Self> {
        let prefixed = if raw.starts_with("0x") {
            raw.to_string()
        } else {
            format!("0x{raw}")
        };

        if prefixed.len() != CARD_HEX_LEN {
            return Err(Error::MalformedSignature(format!(
                "expected {CARD_HEX_LEN} characters, got {}",
                prefixed.len()
            )));
        }

        let bytes = hex::decode(&prefixed[2..])
            .map_err(|e| Error::MalformedSignature(format!("signature is not hex: {e}")))?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        let parity = Self::parity_from_v(bytes[64])?;

        Ok(Self::new(r, s, parity))
    }

    /// Serializes the signature to its 65-byte wire form, `r || s || (27 + v)`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut bytes = [0u8; Self::BYTE_LEN];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v + LEGACY_V_OFFSET;
        bytes
    }

    /// Returns the R component of the signature.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the S component of the signature.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Returns the y-parity (`0` or `1`).
    #[must_use]
    pub const fn v(&self) -> u8 {
        self.v
    }

    /// Returns the y-parity as a boolean.
    #[must_use]
    pub const fn y_parity(&self) -> bool {
        self.v == 1
    }

    /// Returns the R component as a [`U256`].
    #[must_use]
    pub const fn r_u256(&self) -> U256 {
        U256::from_be_bytes(self.r)
    }

    /// Returns the S component as a [`U256`].
    #[must_use]
    pub const fn s_u256(&self) -> U256 {
        U256::from_be_bytes(self.s)
    }

    /// Encodes the wire form as a hex string with `0x` prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use nfc_evm_signer_core::Signature;
    ///
    /// let sig = Signature::new([0u8; 32], [0u8; 32], 1);
    /// let hex = sig.to_hex();
    /// assert!(hex.ends_with("1c"));
    /// assert_eq!(hex.len(), 132);
    /// ```
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Parses a signature from a hex string, optionally prefixed with `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or the
    /// errors of [`Signature::from_bytes`].
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
