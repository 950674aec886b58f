//! Transaction intents, canonical encodings and signing payloads.
//!
//! This module turns a caller's [`TransactionIntent`] into a canonical
//! [`Transaction`], produces the digest the card signs, and assembles the
//! signed payload that is broadcast. It supports:
//!
//! - **EIP-155 Legacy Transactions**: the default when no EIP-1559 fee field is set
//! - **EIP-1559 Transactions**: selected when either EIP-1559 fee field is set
//!
//! # Signing Flow
//!
//! 1. Validate the intent and build the canonical form with [`build_digest`]
//! 2. Have the card sign the returned digest
//! 3. Call [`finalize`] with the same transaction and the signature
//! 4. Broadcast the bytes; [`SignedTransaction::decode`] recovers the sender
//!    from them, which is how the digest/payload binding is checked
//!
//! # Example
//!
//! ```
//! use alloy_primitives::U256;
//! use nfc_evm_signer_core::transaction::{TransactionIntent, build_digest};
//! use nfc_evm_signer_core::Address;
//!
//! let intent = TransactionIntent::new(Address::zero(), 545)
//!     .with_value(U256::from(1_000u64))
//!     .with_gas(21_000)
//!     .with_nonce(0);
//!
//! let (tx, digest) = build_digest(&intent).unwrap();
//! assert_eq!(tx.chain_id(), 545);
//! assert!(!digest.is_zero());
//! ```

use alloy_primitives::{B256, Bytes, U256, keccak256};
use alloy_rlp::{Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::crypto;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// Offset of the EIP-155 `v` value: `chain_id * 2 + 35 + parity`.
const EIP155_V_OFFSET: u64 = 35;

/// Serde helper for integer quantities that arrive as JSON numbers or strings.
///
/// Browser callers frequently pass `"0x5208"` or `"21000"` instead of a
/// number; all three forms are accepted.
mod quantity {
    use serde::{Deserialize, Deserializer, Serializer, de};

    use crate::rpc::parse_quantity;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    pub(super) fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(n) => serializer.serialize_u64(*n),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(|raw| match raw {
                Raw::Number(n) => Ok(n),
                Raw::Text(text) => parse_quantity(&text).map_err(de::Error::custom),
            })
            .transpose()
    }
}

/// What the caller wants to send, before parameters are filled and encoded.
///
/// Deserialization is strict: unknown fields are rejected so that a typo such
/// as `gasLimit` never silently becomes a zero gas limit. `to` and `chainId`
/// are optional at the type level only so that their absence surfaces as a
/// [`Error::Validation`] from [`TransactionIntent::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionIntent {
    /// Recipient address; required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Call data; empty when absent.
    #[serde(default)]
    pub data: Bytes,

    /// Value in wei; zero when absent.
    #[serde(default)]
    pub value: U256,

    /// Gas limit.
    #[serde(default, with = "quantity", skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,

    /// Legacy gas price in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,

    /// EIP-1559 maximum total fee per gas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,

    /// EIP-1559 maximum priority fee per gas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,

    /// Sender nonce.
    #[serde(default, with = "quantity", skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,

    /// Chain ID; required.
    #[serde(default, with = "quantity", skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl TransactionIntent {
    /// Creates an intent with the two required fields set.
    #[must_use]
    pub fn new(to: Address, chain_id: u64) -> Self {
        Self {
            to: Some(to.to_checksum_hex()),
            chain_id: Some(chain_id),
            ..Self::default()
        }
    }

    /// Sets the call data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets the value in wei.
    #[must_use]
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Sets the gas limit.
    #[must_use]
    pub const fn with_gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    /// Sets the legacy gas price.
    #[must_use]
    pub const fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// Sets both EIP-1559 fee fields, selecting the type-2 encoding.
    #[must_use]
    pub const fn with_eip1559_fees(mut self, max_fee: U256, max_priority_fee: U256) -> Self {
        self.max_fee_per_gas = Some(max_fee);
        self.max_priority_fee_per_gas = Some(max_priority_fee);
        self
    }

    /// Sets the nonce.
    #[must_use]
    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Returns `true` if either EIP-1559 fee field is present.
    #[must_use]
    pub const fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some()
    }

    /// Parses an intent from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] on malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the intent without performing any I/O.
    ///
    /// Returns the parsed recipient and chain ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `to` or `chainId` is missing, `to` is
    /// not a well-formed address, a legacy gas price is combined with EIP-1559
    /// fees, only one of the two EIP-1559 fees is set, or the priority fee
    /// exceeds the maximum fee.
    pub fn validate(&self) -> Result<(Address, u64)> {
        let to = self
            .to
            .as_deref()
            .ok_or_else(|| Error::Validation("missing recipient `to`".to_string()))?;
        let to = Address::parse(to)?;

        let chain_id = self
            .chain_id
            .ok_or_else(|| Error::Validation("missing `chainId`".to_string()))?;

        if self.gas_price.is_some() && self.is_eip1559() {
            return Err(Error::Validation(
                "`gasPrice` cannot be combined with EIP-1559 fee fields".to_string(),
            ));
        }

        match (self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(max), Some(priority)) if priority > max => {
                return Err(Error::Validation(format!(
                    "maxPriorityFeePerGas {priority} exceeds maxFeePerGas {max}"
                )));
            }
            (Some(_), None) => {
                return Err(Error::Validation(
                    "`maxFeePerGas` requires `maxPriorityFeePerGas`".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(Error::Validation(
                    "`maxPriorityFeePerGas` requires `maxFeePerGas`".to_string(),
                ));
            }
            _ => {}
        }

        Ok((to, chain_id))
    }
}

/// An access list entry for EIP-2930/EIP-1559 transactions.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListEntry {
    /// The address being accessed.
    pub address: alloy_primitives::Address,

    /// The storage keys being accessed at this address.
    pub storage_keys: Vec<B256>,
}

/// An EIP-155 legacy transaction.
///
/// [EIP-155]: https://eips.ethereum.org/EIPS/eip-155
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    /// The chain ID for replay protection.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The gas price in wei.
    pub gas_price: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn encode_fields(&self, buf: &mut Vec<u8>) {
        self.nonce.encode(buf);
        self.gas_price.encode(buf);
        self.gas_limit.encode(buf);
        encode_optional_address(self.to.as_ref(), buf);
        self.value.encode(buf);
        self.data.as_slice().encode(buf);
    }

    /// Generates the signing hash for this transaction.
    ///
    /// `keccak256(rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]))`
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::new();

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            self.chain_id.encode(buf);
            0u8.encode(buf);
            0u8.encode(buf);
        });

        keccak256(&buf)
    }

    /// Returns the EIP-155 `v` value for a signature parity.
    #[must_use]
    pub fn eip155_v(&self, parity: u8) -> u64 {
        self.chain_id
            .saturating_mul(2)
            .saturating_add(EIP155_V_OFFSET + u64::from(parity))
    }

    /// Creates the signed payload `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut buf = Vec::new();
        let v = self.eip155_v(signature.v());

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            v.encode(buf);
            signature.r_u256().encode(buf);
            signature.s_u256().encode(buf);
        });

        buf
    }

    fn decode_signed(payload: &mut &[u8]) -> Result<(Self, Signature)> {
        let nonce = u64::decode(payload)?;
        let gas_price = U256::decode(payload)?;
        let gas_limit = u64::decode(payload)?;
        let to = decode_optional_address(payload)?;
        let value = U256::decode(payload)?;
        let data = Bytes::decode(payload)?.to_vec();
        let v = u64::decode(payload)?;
        let signature = decode_rs(payload, 0)?;

        if v < EIP155_V_OFFSET {
            return Err(Error::RlpDecodingFailed(format!(
                "pre-EIP-155 signature (v={v}) is not supported"
            )));
        }
        let chain_id = (v - EIP155_V_OFFSET) / 2;
        let parity = u8::from((v - EIP155_V_OFFSET) % 2 == 1);

        let tx = Self {
            chain_id,
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
        };
        Ok((tx, Signature::new(*signature.r(), *signature.s(), parity)))
    }
}

/// An EIP-1559 (Type 2) transaction.
///
/// [EIP-1559]: https://eips.ethereum.org/EIPS/eip-1559
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    /// The chain ID.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The maximum priority fee per gas (tip).
    pub max_priority_fee_per_gas: U256,

    /// The maximum total fee per gas.
    pub max_fee_per_gas: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,

    /// The access list.
    pub access_list: Vec<AccessListEntry>,
}

impl Eip1559Transaction {
    /// The transaction type identifier for EIP-1559.
    pub const TX_TYPE: u8 = 0x02;

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        self.chain_id.encode(buf);
        self.nonce.encode(buf);
        self.max_priority_fee_per_gas.encode(buf);
        self.max_fee_per_gas.encode(buf);
        self.gas_limit.encode(buf);
        encode_optional_address(self.to.as_ref(), buf);
        self.value.encode(buf);
        self.data.as_slice().encode(buf);
        self.access_list.encode(buf);
    }

    /// Generates the signing hash for this transaction.
    ///
    /// `keccak256(0x02 || rlp([chainId, nonce, maxPriorityFeePerGas,
    /// maxFeePerGas, gasLimit, to, value, data, accessList]))`
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);
        encode_rlp_list(&mut buf, |buf| self.encode_fields(buf));
        keccak256(&buf)
    }

    /// Creates the signed payload (with type prefix); `v` is the bare parity.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            signature.v().encode(buf);
            signature.r_u256().encode(buf);
            signature.s_u256().encode(buf);
        });

        buf
    }

    fn decode_signed(payload: &mut &[u8]) -> Result<(Self, Signature)> {
        let chain_id = u64::decode(payload)?;
        let nonce = u64::decode(payload)?;
        let max_priority_fee_per_gas = U256::decode(payload)?;
        let max_fee_per_gas = U256::decode(payload)?;
        let gas_limit = u64::decode(payload)?;
        let to = decode_optional_address(payload)?;
        let value = U256::decode(payload)?;
        let data = Bytes::decode(payload)?.to_vec();
        let access_list = Vec::<AccessListEntry>::decode(payload)?;
        let parity = u8::decode(payload)?;
        if parity > 1 {
            return Err(Error::RlpDecodingFailed(format!("invalid y-parity {parity}")));
        }
        let signature = decode_rs(payload, parity)?;

        let tx = Self {
            chain_id,
            nonce,
            max_priority_fee_per_gas,
            max_fee_per_gas,
            gas_limit,
            to,
            value,
            data,
            access_list,
        };
        Ok((tx, signature))
    }
}

/// Encodes an RLP list using a closure to write elements.
fn encode_rlp_list<F>(out: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut content = Vec::new();
    f(&mut content);

    let header = Header {
        list: true,
        payload_length: content.len(),
    };
    header.encode(out);
    out.extend_from_slice(&content);
}

/// Encodes an optional address; `None` is the empty string (contract creation).
fn encode_optional_address(addr: Option<&Address>, out: &mut Vec<u8>) {
    match addr {
        Some(a) => a.inner().encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

fn decode_optional_address(buf: &mut &[u8]) -> Result<Option<Address>> {
    let bytes = Bytes::decode(buf)?;
    match bytes.len() {
        0 => Ok(None),
        Address::BYTE_LEN => Ok(Some(Address::from(alloy_primitives::Address::from_slice(
            &bytes,
        )))),
        n => Err(Error::RlpDecodingFailed(format!("recipient has {n} bytes"))),
    }
}

fn decode_rs(buf: &mut &[u8], parity: u8) -> Result<Signature> {
    let r = U256::decode(buf)?;
    let s = U256::decode(buf)?;
    Ok(Signature::new(
        r.to_be_bytes::<32>(),
        s.to_be_bytes::<32>(),
        parity,
    ))
}

/// Splits the payload of one RLP list off `buf`.
fn take_list<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let header = Header::decode(buf)?;
    if !header.list {
        return Err(Error::RlpDecodingFailed("expected an RLP list".to_string()));
    }
    if buf.len() < header.payload_length {
        return Err(alloy_rlp::Error::InputTooShort.into());
    }
    let (payload, rest) = buf.split_at(header.payload_length);
    *buf = rest;
    Ok(payload)
}

/// A canonical transaction, ready to be hashed and signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// EIP-155 legacy transaction.
    Legacy(LegacyTransaction),
    /// EIP-1559 (Type 2) transaction.
    Eip1559(Eip1559Transaction),
}

impl Transaction {
    /// Builds the canonical transaction for an intent.
    ///
    /// Absent `gas`, fee and `nonce` fields encode as zero; callers that
    /// broadcast are expected to fill them beforehand.
    ///
    /// # Errors
    ///
    /// Returns the validation errors of [`TransactionIntent::validate`].
    pub fn from_intent(intent: &TransactionIntent) -> Result<Self> {
        let (to, chain_id) = intent.validate()?;
        let nonce = intent.nonce.unwrap_or_default();
        let gas_limit = intent.gas.unwrap_or_default();
        let data = intent.data.to_vec();

        Ok(match (intent.max_fee_per_gas, intent.max_priority_fee_per_gas) {
            (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => {
                Self::Eip1559(Eip1559Transaction {
                    chain_id,
                    nonce,
                    max_priority_fee_per_gas,
                    max_fee_per_gas,
                    gas_limit,
                    to: Some(to),
                    value: intent.value,
                    data,
                    access_list: Vec::new(),
                })
            }
            _ => Self::Legacy(LegacyTransaction {
                chain_id,
                nonce,
                gas_price: intent.gas_price.unwrap_or_default(),
                gas_limit,
                to: Some(to),
                value: intent.value,
                data,
            })
        })
    }

    /// Returns the signing hash for this transaction.
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        match self {
            Self::Legacy(tx) => tx.signing_hash(),
            Self::Eip1559(tx) => tx.signing_hash(),
        }
    }

    /// Returns the chain ID for this transaction.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::Eip1559(tx) => tx.chain_id,
        }
    }

    /// Returns the nonce for this transaction.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::Eip1559(tx) => tx.nonce,
        }
    }

    /// Creates the signed payload by combining this transaction with a signature.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.signed_rlp(signature),
            Self::Eip1559(tx) => tx.signed_rlp(signature),
        }
    }
}

/// Validates an intent and returns its canonical form and signing digest.
///
/// # Errors
///
/// Returns [`Error::Validation`] before any hashing if the intent is invalid.
pub fn build_digest(intent: &TransactionIntent) -> Result<(Transaction, B256)> {
    let tx = Transaction::from_intent(intent)?;
    let digest = tx.signing_hash();
    Ok((tx, digest))
}

/// Re-encodes `tx` with the signature into the broadcastable payload.
#[must_use]
pub fn finalize(tx: &Transaction, signature: &Signature) -> Vec<u8> {
    tx.signed_rlp(signature)
}

/// A decoded signed transaction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// The unsigned transaction.
    pub transaction: Transaction,
    /// The signature carried by the payload.
    pub signature: Signature,
    hash: B256,
}

impl SignedTransaction {
    /// Decodes a legacy (EIP-155) or type-2 signed payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RlpDecodingFailed`] on malformed input, unsupported
    /// transaction types or trailing bytes.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let hash = keccak256(raw);
        let first = *raw
            .first()
            .ok_or_else(|| Error::RlpDecodingFailed("empty payload".to_string()))?;

        let (transaction, signature, rest) = if first >= alloy_rlp::EMPTY_LIST_CODE {
            let mut buf = raw;
            let mut payload = take_list(&mut buf)?;
            let (tx, sig) = LegacyTransaction::decode_signed(&mut payload)?;
            ensure_consumed(payload)?;
            (Transaction::Legacy(tx), sig, buf)
        } else if first == Eip1559Transaction::TX_TYPE {
            let mut buf = &raw[1..];
            let mut payload = take_list(&mut buf)?;
            let (tx, sig) = Eip1559Transaction::decode_signed(&mut payload)?;
            ensure_consumed(payload)?;
            (Transaction::Eip1559(tx), sig, buf)
        } else {
            return Err(Error::RlpDecodingFailed(format!(
                "unsupported transaction type 0x{first:02x}"
            )));
        };
        ensure_consumed(rest)?;

        Ok(Self {
            transaction,
            signature,
            hash,
        })
    }

    /// Returns the transaction hash (keccak256 of the broadcast bytes).
    #[must_use]
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Recovers the sender from the signature over the recomputed digest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if recovery fails.
    pub fn recover_signer(&self) -> Result<Address> {
        crypto::recover_address(&self.transaction.signing_hash(), &self.signature)
    }
}

fn ensure_consumed(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::RlpDecodingFailed(format!(
            "{} trailing bytes",
            rest.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;

    fn recipient() -> Address {
        Address::new([0x11; 20])
    }

    fn key() -> SigningKey {
        SigningKey::from_slice(&[0x24; 32]).unwrap()
    }

    #[test]
    fn intent_requires_recipient() {
        let intent = TransactionIntent {
            chain_id: Some(1),
            ..TransactionIntent::default()
        };
        assert!(matches!(build_digest(&intent), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_requires_chain_id() {
        let intent = TransactionIntent {
            to: Some(recipient().to_hex()),
            ..TransactionIntent::default()
        };
        assert!(matches!(build_digest(&intent), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_rejects_malformed_recipient() {
        let intent = TransactionIntent {
            to: Some("0x1234".to_string()),
            chain_id: Some(1),
            ..TransactionIntent::default()
        };
        assert!(matches!(build_digest(&intent), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_rejects_mixed_fee_models() {
        let intent = TransactionIntent::new(recipient(), 1)
            .with_gas_price(U256::from(1u64))
            .with_eip1559_fees(U256::from(2u64), U256::from(1u64));
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_rejects_priority_above_max() {
        let intent = TransactionIntent::new(recipient(), 1)
            .with_eip1559_fees(U256::from(1u64), U256::from(2u64));
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_rejects_priority_fee_alone() {
        let intent = TransactionIntent {
            max_priority_fee_per_gas: Some(U256::from(2_000_000_000u64)),
            ..TransactionIntent::new(recipient(), 545)
        };
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
        assert!(matches!(build_digest(&intent), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_rejects_max_fee_alone() {
        let intent = TransactionIntent {
            max_fee_per_gas: Some(U256::from(30_000_000_000u64)),
            ..TransactionIntent::new(recipient(), 545)
        };
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
        assert!(matches!(build_digest(&intent), Err(Error::Validation(_))));
    }

    #[test]
    fn partial_fee_json_is_rejected_before_signing() {
        let json = r#"{
            "to": "0x1111111111111111111111111111111111111111",
            "maxPriorityFeePerGas": "0x77359400",
            "chainId": 545
        }"#;
        let intent = TransactionIntent::from_json(json).unwrap();
        assert!(matches!(intent.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn intent_json_is_strict() {
        let json = r#"{"to":"0x1111111111111111111111111111111111111111","chainId":545,"gasLimit":21000}"#;
        assert!(matches!(
            TransactionIntent::from_json(json),
            Err(Error::JsonError(_))
        ));
    }

    #[test]
    fn intent_json_accepts_string_quantities() {
        let json = r#"{
            "to": "1111111111111111111111111111111111111111",
            "data": "0xdeadbeef",
            "value": "0x10",
            "gas": "0x5208",
            "nonce": "7",
            "chainId": 545
        }"#;
        let intent = TransactionIntent::from_json(json).unwrap();
        assert_eq!(intent.gas, Some(21_000));
        assert_eq!(intent.nonce, Some(7));
        assert_eq!(intent.chain_id, Some(545));
        assert_eq!(intent.value, U256::from(16u64));
        assert_eq!(intent.data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn legacy_is_default_and_eip1559_is_selected_by_fees() {
        let legacy = Transaction::from_intent(&TransactionIntent::new(recipient(), 1)).unwrap();
        assert!(matches!(legacy, Transaction::Legacy(_)));

        let typed = Transaction::from_intent(
            &TransactionIntent::new(recipient(), 1)
                .with_eip1559_fees(U256::from(2u64), U256::from(1u64)),
        )
        .unwrap();
        assert!(matches!(typed, Transaction::Eip1559(_)));
        assert_ne!(legacy.signing_hash(), typed.signing_hash());
    }

    #[test]
    fn absent_numeric_fields_encode_as_zero() {
        let sparse = TransactionIntent::new(recipient(), 545);
        let explicit = TransactionIntent::new(recipient(), 545)
            .with_gas(0)
            .with_nonce(0)
            .with_gas_price(U256::ZERO);

        assert_eq!(
            build_digest(&sparse).unwrap().1,
            build_digest(&explicit).unwrap().1
        );
    }

    #[test]
    fn eip155_v_value() {
        let (tx, _) = build_digest(&TransactionIntent::new(recipient(), 545)).unwrap();
        let Transaction::Legacy(legacy) = tx else {
            panic!("expected legacy transaction");
        };
        assert_eq!(legacy.eip155_v(0), 1125);
        assert_eq!(legacy.eip155_v(1), 1126);
    }

    #[test]
    fn legacy_finalize_roundtrip_recovers_signer() {
        let key = key();
        let intent = TransactionIntent::new(recipient(), 545)
            .with_value(U256::from(1_000u64))
            .with_data(vec![0xca, 0xfe])
            .with_gas(50_000)
            .with_gas_price(U256::from(7u64))
            .with_nonce(3);
        let (tx, digest) = build_digest(&intent).unwrap();
        let sig = crypto::sign_hash(&key, &digest).unwrap();
        let raw = finalize(&tx, &sig);

        let decoded = SignedTransaction::decode(&raw).unwrap();
        assert_eq!(decoded.transaction, tx);
        assert_eq!(decoded.signature, sig);
        assert_eq!(decoded.hash(), keccak256(&raw));
        assert_eq!(
            decoded.recover_signer().unwrap(),
            Address::from_public_key(key.verifying_key())
        );
    }

    #[test]
    fn eip1559_finalize_roundtrip_recovers_signer() {
        let key = key();
        let intent = TransactionIntent::new(recipient(), 545)
            .with_eip1559_fees(U256::from(100u64), U256::from(2u64))
            .with_gas(21_000)
            .with_nonce(9);
        let (tx, digest) = build_digest(&intent).unwrap();
        let sig = crypto::sign_hash(&key, &digest).unwrap();
        let raw = finalize(&tx, &sig);

        assert_eq!(raw[0], Eip1559Transaction::TX_TYPE);
        let decoded = SignedTransaction::decode(&raw).unwrap();
        assert_eq!(decoded.transaction, tx);
        assert_eq!(
            decoded.recover_signer().unwrap(),
            Address::from_public_key(key.verifying_key())
        );
    }

    #[test]
    fn signature_over_other_intent_does_not_recover_signer() {
        let key = key();
        let signer = Address::from_public_key(key.verifying_key());
        let first = TransactionIntent::new(recipient(), 545).with_value(U256::from(1u64));
        let second = TransactionIntent::new(recipient(), 545).with_value(U256::from(2u64));

        let (tx_first, _) = build_digest(&first).unwrap();
        let (_, digest_second) = build_digest(&second).unwrap();
        let sig = crypto::sign_hash(&key, &digest_second).unwrap();

        let decoded = SignedTransaction::decode(&finalize(&tx_first, &sig)).unwrap();
        assert_ne!(decoded.recover_signer().ok(), Some(signer));
    }

    #[test]
    fn decode_rejects_trailing_bytes_and_unknown_types() {
        let (tx, digest) = build_digest(&TransactionIntent::new(recipient(), 1)).unwrap();
        let sig = crypto::sign_hash(&key(), &digest).unwrap();
        let mut raw = finalize(&tx, &sig);
        raw.push(0x00);

        assert!(matches!(
            SignedTransaction::decode(&raw),
            Err(Error::RlpDecodingFailed(_))
        ));
        assert!(SignedTransaction::decode(&[0x01, 0xc0]).is_err());
        assert!(SignedTransaction::decode(&[]).is_err());
    }

    #[test]
    fn access_list_changes_digest() {
        let mut tx = Eip1559Transaction {
            chain_id: 1,
            nonce: 0,
            max_priority_fee_per_gas: U256::ZERO,
            max_fee_per_gas: U256::ZERO,
            gas_limit: 21000,
            to: Some(Address::zero()),
            value: U256::ZERO,
            data: vec![],
            access_list: vec![],
        };
        let bare = tx.signing_hash();
        tx.access_list.push(AccessListEntry {
            address: alloy_primitives::Address::ZERO,
            storage_keys: vec![B256::ZERO],
        });
        assert_ne!(bare, tx.signing_hash());
    }
}
