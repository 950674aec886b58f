//! Ethereum addresses and the normalization gate for external input.
//!
//! Addresses reach the signer from places that do not agree on a format: the
//! card reports its address without a `0x` prefix, older persisted sessions
//! carry a doubled `0x0x` prefix, and callers paste mixed-case strings. This
//! module funnels all of them through [`normalize`] and [`is_well_formed`]
//! before an [`Address`] is constructed.
//!
//! Normalization steps, in order:
//!
//! 1. Empty input is returned unchanged (a zero address is never invented)
//! 2. A doubled `0x0x` prefix loses exactly one `0x`
//! 3. Input without a `0x` prefix gains exactly one
//! 4. A 40-digit hex body is rendered with the EIP-55 checksum casing
//!
//! # Example
//!
//! ```
//! use nfc_evm_signer_core::address::{is_well_formed, normalize};
//!
//! let raw = "0x0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
//! let canonical = normalize(raw);
//! assert_eq!(canonical, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
//! assert!(is_well_formed(raw));
//! ```

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const PREFIX: &str = "0x";

/// Length of a canonical address string: `0x` followed by 40 hex digits.
pub const CANONICAL_LEN: usize = 42;

/// Canonicalizes an externally supplied hex address.
///
/// The result is only a canonical address when the body is 40 hex digits;
/// anything else comes back prefix-corrected but otherwise untouched, so
/// callers must gate on [`is_well_formed`] before trusting it.
#[must_use]
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let prefixed = if raw.starts_with("0x0x") {
        raw[PREFIX.len()..].to_string()
    } else if raw.starts_with(PREFIX) {
        raw.to_string()
    } else {
        format!("{PREFIX}{raw}")
    };

    let body = &prefixed[PREFIX.len()..];
    if body.len() == 2 * Address::BYTE_LEN && body.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(body) {
            return AlloyAddress::from_slice(&bytes).to_checksum(None);
        }
    }

    prefixed
}

/// Returns `true` if `raw` normalizes to `0x` followed by 40 hex digits.
///
/// This is the precondition gate for every address that crosses a trust
/// boundary: card responses, persisted sessions and transaction intents.
#[must_use]
pub fn is_well_formed(raw: &str) -> bool {
    let normalized = normalize(raw);
    normalized.len() == CANONICAL_LEN
        && normalized.starts_with(PREFIX)
        && normalized[PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_hexdigit())
}

/// An Ethereum address (20 bytes).
///
/// Wraps [`alloy_primitives::Address`]. Once constructed the address is
/// immutable and always displays in its canonical checksummed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an Ethereum address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates a new address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Returns the zero address (`0x0000...0000`).
    #[must_use]
    pub const fn zero() -> Self {
        Self(AlloyAddress::ZERO)
    }

    /// Checks if this is the zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parses an untrusted address string.
    ///
    /// The input is normalized first, so missing or doubled prefixes and any
    /// letter case are accepted as long as the body is 40 hex digits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the input is not well formed.
    ///
    /// # Example
    ///
    /// ```
    /// use nfc_evm_signer_core::Address;
    ///
    /// let addr = Address::parse("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
    /// assert_eq!(addr.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    /// assert!(Address::parse("0x1234").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        if !is_well_formed(raw) {
            return Err(Error::Validation(format!("malformed address: {raw:?}")));
        }
        Self::from_hex(&normalize(raw))
    }

    /// Derives the address of a secp256k1 public key.
    ///
    /// The address is the last 20 bytes of the Keccak-256 hash of the
    /// uncompressed point without its `0x04` tag.
    #[must_use]
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let encoded = public_key.to_encoded_point(false);
        let hash = keccak256(&encoded.as_bytes()[1..]);

        let mut address_bytes = [0u8; Self::BYTE_LEN];
        address_bytes.copy_from_slice(&hash[12..]);
        Self::new(address_bytes)
    }

    /// Derives an address from a hex-encoded public key as reported by the card.
    ///
    /// Accepts compressed (33 bytes) or uncompressed (65 bytes) SEC1 points,
    /// with or without a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] for invalid hex and
    /// [`Error::Validation`] if the bytes are not a point on the curve.
    pub fn from_public_key_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix(PREFIX).unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|_| Error::Validation("public key is not a secp256k1 point".to_string()))?;
        Ok(Self::from_public_key(&key))
    }

    /// Returns the address as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        self.0.as_ref()
    }

    /// Returns the address as a 20-byte array.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        self.0.0.0
    }

    /// Returns the EIP-55 checksummed hex string with `0x` prefix.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Returns the lowercase hex string with `0x` prefix.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{PREFIX}{}", hex::encode(self.as_bytes()))
    }

    /// Decodes an address from a hex string, optionally prefixed with `0x`.
    ///
    /// Unlike [`Address::parse`], no prefix repair is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// [`Error::Validation`] if the decoded bytes are not 20 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix(PREFIX).unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;

        if bytes.len() != Self::BYTE_LEN {
            return Err(Error::Validation(format!(
                "expected {} address bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            )));
        }

        Ok(Self(AlloyAddress::from_slice(&bytes)))
    }

    /// Returns the inner [`alloy_primitives::Address`].
    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<AlloyAddress> for Address {
    fn from(addr: AlloyAddress) -> Self {
        Self(addr)
    }
}

impl From<Address> for AlloyAddress {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self::new(bytes)
    }
}
