//! EIP-712 typed structured data hashing.
//!
//! The card signs whatever 32 bytes it is handed, so the typed-data digest
//! must be computed exactly as the verifying contract will compute it.
//! This module implements [EIP-712] over JSON-described types:
//!
//! - `encodeType` with transitive dependency collection (primary type first,
//!   remaining dependencies sorted by name)
//! - dynamic arrays `T[]` and fixed arrays `T[n]` (length enforced)
//! - `uintN` range checks and `intN` in two's complement
//! - `bytes`, `bytesN` (exact length), `string`, `bool`, `address`
//! - strict domain validation: a malformed `verifyingContract` or `salt` is
//!   an error rather than a silently zeroed field
//!
//! # Hash Computation
//!
//! ```text
//! keccak256("\x19\x01" || domainSeparator || hashStruct(message))
//! ```
//!
//! # Example
//!
//! ```
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
//!     "Person": [
//!         {"name": "name", "type": "string"},
//!         {"name": "wallet", "type": "address"}
//!     ]
//! });
//!
//! let message = json!({
//!     "name": "Alice",
//!     "wallet": "0x0000000000000000000000000000000000000001"
//! });
//!
//! let typed_data = TypedData::new(domain, types, "Person".to_string(), message).unwrap();
//! let hash = typed_data.signing_hash().unwrap();
//! assert!(!hash.is_zero());
//! ```
//!
//! [EIP-712]: https://eips.ethereum.org/EIPS/eip-712

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address as AlloyAddress, B256, I256, U256, keccak256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Name of the reserved domain type, which may appear in `types` but is
/// always hashed from [`Eip712Domain`].
const DOMAIN_TYPE: &str = "EIP712Domain";

/// The EIP-712 domain separator parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip712Domain {
    /// The human-readable name of the signing domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The version of the signing domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// The chain ID where signatures are valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    /// The address of the contract verifying the signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,

    /// A disambiguating salt for the protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl Eip712Domain {
    /// Computes the domain separator hash.
    ///
    /// Only the fields that are present take part in the `EIP712Domain` type,
    /// in the canonical order `name, version, chainId, verifyingContract, salt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypedData`] if `verifyingContract` is not a
    /// 20-byte address or `salt` is not 32 bytes of hex.
    pub fn separator_hash(&self) -> Result<B256> {
        let mut members: Vec<&str> = Vec::with_capacity(5);
        let mut encoded = Vec::with_capacity(32 * 6);
        encoded.extend_from_slice(&[0u8; 32]);

        if let Some(name) = &self.name {
            members.push("string name");
            encoded.extend_from_slice(keccak256(name.as_bytes()).as_slice());
        }
        if let Some(version) = &self.version {
            members.push("string version");
            encoded.extend_from_slice(keccak256(version.as_bytes()).as_slice());
        }
        if let Some(chain_id) = self.chain_id {
            members.push("uint256 chainId");
            encoded.extend_from_slice(&U256::from(chain_id).to_be_bytes::<32>());
        }
        if let Some(contract) = &self.verifying_contract {
            members.push("address verifyingContract");
            let addr = parse_address(contract).map_err(|_| {
                Error::InvalidTypedData(format!("invalid verifyingContract: {contract:?}"))
            })?;
            encoded.extend_from_slice(&pad_address(addr));
        }
        if let Some(salt) = &self.salt {
            members.push("bytes32 salt");
            let bytes = parse_hex(salt)
                .ok()
                .filter(|b| b.len() == 32)
                .ok_or_else(|| Error::InvalidTypedData(format!("invalid salt: {salt:?}")))?;
            encoded.extend_from_slice(&bytes);
        }

        let type_string = format!("{DOMAIN_TYPE}({})", members.join(","));
        encoded[..32].copy_from_slice(keccak256(type_string.as_bytes()).as_slice());
        Ok(keccak256(&encoded))
    }
}

/// A type field definition for EIP-712.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeField {
    /// The name of the field.
    pub name: String,

    /// The type of the field (e.g. `string`, `uint256`, `Person[]`).
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Typed structured data for EIP-712 signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// The EIP-712 domain.
    pub domain: Eip712Domain,

    /// The type definitions.
    pub types: BTreeMap<String, Vec<TypeField>>,

    /// The primary type being signed.
    pub primary_type: String,

    /// The message data.
    pub message: Value,
}

/// A field type split into its element type and array dimension.
enum FieldKind<'a> {
    Array { element: &'a str, len: Option<usize> },
    Struct(&'a str),
    Atomic(&'a str),
}

impl TypedData {
    /// Creates a new typed data instance.
    ///
    /// # Arguments
    ///
    /// * `domain` - The EIP-712 domain separator parameters
    /// * `types` - JSON object mapping type names to field lists
    /// * `primary_type` - The name of the primary type being signed
    /// * `message` - The message data as a JSON value
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTypedData`] if `types` is not an object of
    /// `{name, type}` field lists.
    pub fn new(
        domain: Eip712Domain,
        types: Value,
        primary_type: String,
        message: Value,
    ) -> Result<Self> {
        let types = serde_json::from_value(types)
            .map_err(|e| Error::InvalidTypedData(format!("malformed types: {e}")))?;
        Ok(Self {
            domain,
            types,
            primary_type,
            message,
        })
    }

    /// Parses typed data from the JSON shape wallets exchange
    /// (`{types, primaryType, domain, message}`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] if parsing fails.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Computes the signing hash for this typed data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedType`] if a referenced type is missing, or
    /// [`Error::InvalidTypedData`] if the domain or message does not match
    /// the type definitions.
    pub fn signing_hash(&self) -> Result<B256> {
        let domain_separator = self.domain.separator_hash()?;
        let struct_hash = self.hash_struct(&self.primary_type, &self.message)?;

        let mut data = [0u8; 66];
        data[..2].copy_from_slice(&[0x19, 0x01]);
        data[2..34].copy_from_slice(domain_separator.as_slice());
        data[34..].copy_from_slice(struct_hash.as_slice());

        Ok(keccak256(data))
    }

    /// `hashStruct(s) = keccak256(typeHash || encodeData(s))`
    fn hash_struct(&self, type_name: &str, data: &Value) -> Result<B256> {
        let type_hash = keccak256(self.encode_type(type_name)?.as_bytes());
        let mut buf = type_hash.to_vec();
        self.encode_data(type_name, data, &mut buf)?;
        Ok(keccak256(&buf))
    }

    fn fields(&self, type_name: &str) -> Result<&[TypeField]> {
        self.types
            .get(type_name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UndefinedType(type_name.to_string()))
    }

    /// Encodes the primary type followed by every struct it reaches,
    /// directly or transitively, sorted by name.
    fn encode_type(&self, type_name: &str) -> Result<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(type_name, &mut deps)?;
        deps.remove(type_name);

        let mut result = String::new();
        for name in std::iter::once(type_name).chain(deps.iter().map(String::as_str)) {
            let members: Vec<String> = self
                .fields(name)?
                .iter()
                .map(|f| format!("{} {}", f.field_type, f.name))
                .collect();
            result.push_str(name);
            result.push('(');
            result.push_str(&members.join(","));
            result.push(')');
        }
        Ok(result)
    }

    fn collect_dependencies(&self, type_name: &str, found: &mut BTreeSet<String>) -> Result<()> {
        if !found.insert(type_name.to_string()) {
            return Ok(());
        }
        for field in self.fields(type_name)? {
            let mut base = field.field_type.as_str();
            while let FieldKind::Array { element, .. } = self.classify(base)? {
                base = element;
            }
            if self.types.contains_key(base) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    fn classify<'a>(&self, field_type: &'a str) -> Result<FieldKind<'a>> {
        if let Some(open) = field_type.rfind('[') {
            let dim = field_type[open..]
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| Error::InvalidTypedData(format!("bad array type {field_type}")))?;
            let len = if dim.is_empty() {
                None
            } else {
                Some(dim.parse::<usize>().map_err(|_| {
                    Error::InvalidTypedData(format!("bad array length in {field_type}"))
                })?)
            };
            return Ok(FieldKind::Array {
                element: &field_type[..open],
                len,
            });
        }
        if self.types.contains_key(field_type) {
            Ok(FieldKind::Struct(field_type))
        } else {
            Ok(FieldKind::Atomic(field_type))
        }
    }

    fn encode_data(&self, type_name: &str, data: &Value, out: &mut Vec<u8>) -> Result<()> {
        let obj = data.as_object().ok_or_else(|| {
            Error::InvalidTypedData(format!("expected object for {type_name}"))
        })?;

        for field in self.fields(type_name)? {
            let value = obj.get(&field.name).ok_or_else(|| {
                Error::InvalidTypedData(format!("missing field {type_name}.{}", field.name))
            })?;
            out.extend_from_slice(&self.encode_field(&field.field_type, value)?);
        }
        Ok(())
    }

    fn encode_field(&self, field_type: &str, value: &Value) -> Result<[u8; 32]> {
        match self.classify(field_type)? {
            FieldKind::Array { element, len } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidTypedData(format!("expected array for {field_type}")))?;
                if let Some(expected) = len
                    && items.len() != expected
                {
                    return Err(Error::InvalidTypedData(format!(
                        "{field_type} needs {expected} elements, got {}",
                        items.len()
                    )));
                }
                let mut concatenated = Vec::with_capacity(32 * items.len());
                for item in items {
                    concatenated.extend_from_slice(&self.encode_field(element, item)?);
                }
                Ok(keccak256(&concatenated).0)
            }
            FieldKind::Struct(name) => Ok(self.hash_struct(name, value)?.0),
            FieldKind::Atomic(name) => encode_atomic(name, value),
        }
    }
}

fn expect_str<'a>(value: &'a Value, field_type: &str) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::InvalidTypedData(format!("expected string for {field_type}")))
}

/// Encodes an atomic or dynamic (`string`, `bytes`) value into one word.
fn encode_atomic(field_type: &str, value: &Value) -> Result<[u8; 32]> {
    match field_type {
        "string" => Ok(keccak256(expect_str(value, field_type)?.as_bytes()).0),
        "bytes" => Ok(keccak256(parse_hex(expect_str(value, field_type)?)?).0),
        "bool" => {
            let b = value
                .as_bool()
                .ok_or_else(|| Error::InvalidTypedData("expected bool".to_string()))?;
            Ok(U256::from(u8::from(b)).to_be_bytes())
        }
        "address" => {
            let addr = parse_address(expect_str(value, field_type)?)?;
            Ok(pad_address(addr))
        }
        t if t.starts_with("bytes") => {
            let size = bit_width(t, "bytes", 1, 32)?;
            let bytes = parse_hex(expect_str(value, t)?)?;
            if bytes.len() != size {
                return Err(Error::InvalidTypedData(format!(
                    "{t} needs {size} bytes, got {}",
                    bytes.len()
                )));
            }
            let mut word = [0u8; 32];
            word[..size].copy_from_slice(&bytes);
            Ok(word)
        }
        t if t.starts_with("uint") => {
            let bits = bit_width(t, "uint", 8, 256)?;
            let n = parse_uint(value)?;
            if bits < 256 && n >= U256::from(1u8) << bits {
                return Err(Error::InvalidTypedData(format!("{n} overflows {t}")));
            }
            Ok(n.to_be_bytes())
        }
        t if t.starts_with("int") => {
            let bits = bit_width(t, "int", 8, 256)?;
            let n = parse_int(value)?;
            if bits < 256 {
                let bound = U256::from(1u8) << (bits - 1);
                let (sign, magnitude) = n.into_sign_and_abs();
                let fits = if sign.is_negative() {
                    magnitude <= bound
                } else {
                    magnitude < bound
                };
                if !fits {
                    return Err(Error::InvalidTypedData(format!("{n} overflows {t}")));
                }
            }
            Ok(n.into_raw().to_be_bytes())
        }
        other => Err(Error::UndefinedType(other.to_string())),
    }
}

/// Parses the size suffix of `uintN`/`intN`/`bytesN`.
///
/// Integer widths must be multiples of 8.
fn bit_width(field_type: &str, prefix: &str, min: usize, max: usize) -> Result<usize> {
    let suffix = &field_type[prefix.len()..];
    if suffix.is_empty() && prefix != "bytes" {
        return Ok(256);
    }
    let size: usize = suffix
        .parse()
        .map_err(|_| Error::UndefinedType(field_type.to_string()))?;
    let aligned = prefix == "bytes" || size % 8 == 0;
    if (min..=max).contains(&size) && aligned {
        Ok(size)
    } else {
        Err(Error::UndefinedType(field_type.to_string()))
    }
}

fn pad_address(addr: AlloyAddress) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_slice());
    word
}

fn parse_address(s: &str) -> Result<AlloyAddress> {
    let bytes = parse_hex(s)?;
    if bytes.len() != 20 {
        return Err(Error::InvalidTypedData(format!(
            "invalid address length: {}",
            bytes.len()
        )));
    }
    Ok(AlloyAddress::from_slice(&bytes))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(s)?)
}

fn parse_uint(value: &Value) -> Result<U256> {
    if let Some(n) = value.as_u64() {
        return Ok(U256::from(n));
    }
    let s = value
        .as_str()
        .ok_or_else(|| Error::InvalidTypedData(format!("expected unsigned integer, got {value}")))?;
    match s.strip_prefix("0x") {
        Some(hex_str) => U256::from_str_radix(hex_str, 16),
        None => U256::from_str_radix(s, 10),
    }
    .map_err(|_| Error::InvalidTypedData(format!("invalid uint: {s}")))
}

fn parse_int(value: &Value) -> Result<I256> {
    let out_of_range = || Error::InvalidTypedData(format!("integer out of range: {value}"));
    if let Some(n) = value.as_i64() {
        return I256::try_from(n).map_err(|_| out_of_range());
    }
    if let Some(n) = value.as_u64() {
        return I256::try_from(n).map_err(|_| out_of_range());
    }
    let s = value
        .as_str()
        .ok_or_else(|| Error::InvalidTypedData(format!("expected integer, got {value}")))?;
    let parsed = if s.contains("0x") {
        I256::from_hex_str(s)
    } else {
        I256::from_dec_str(s)
    };
    parsed.map_err(|_| Error::InvalidTypedData(format!("invalid int: {s}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn domain() -> Eip712Domain {
        Eip712Domain {
            name: Some("Ether Mail".to_string()),
            version: Some("1".to_string()),
            chain_id: Some(1),
            verifying_contract: Some("0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC".to_string()),
            salt: None,
        }
    }

    fn mail_types() -> Value {
        json!({
            "EIP712Domain": [
                {"name": "name", "type": "string"},
                {"name": "version", "type": "string"},
                {"name": "chainId", "type": "uint256"},
                {"name": "verifyingContract", "type": "address"}
            ],
            "Person": [
                {"name": "name", "type": "string"},
                {"name": "wallet", "type": "address"}
            ],
            "Mail": [
                {"name": "from", "type": "Person"},
                {"name": "to", "type": "Person"},
                {"name": "contents", "type": "string"}
            ]
        })
    }

    fn mail_message() -> Value {
        json!({
            "from": {"name": "Cow", "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"},
            "to": {"name": "Bob", "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"},
            "contents": "Hello, Bob!"
        })
    }

    #[test]
    fn canonical_mail_example_matches_reference_digest() {
        let typed = TypedData::new(domain(), mail_types(), "Mail".to_string(), mail_message())
            .unwrap();

        assert_eq!(
            typed.domain.separator_hash().unwrap(),
            "0xf2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
                .parse::<B256>()
                .unwrap()
        );
        assert_eq!(
            typed.signing_hash().unwrap(),
            "0xbe609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
                .parse::<B256>()
                .unwrap()
        );
    }

    #[test]
    fn encode_type_includes_transitive_dependencies() {
        let types = json!({
            "Order": [{"name": "leg", "type": "Leg[]"}],
            "Leg": [{"name": "asset", "type": "Asset"}, {"name": "qty", "type": "uint256"}],
            "Asset": [{"name": "token", "type": "address"}]
        });
        let typed =
            TypedData::new(Eip712Domain::default(), types, "Order".to_string(), json!({})).unwrap();

        assert_eq!(
            typed.encode_type("Order").unwrap(),
            "Order(Leg[] leg)Asset(address token)Leg(Asset asset,uint256 qty)"
        );
    }

    #[test]
    fn fixed_arrays_enforce_length() {
        let types = json!({"Pair": [{"name": "values", "type": "uint8[2]"}]});
        let ok = TypedData::new(
            Eip712Domain::default(),
            types.clone(),
            "Pair".to_string(),
            json!({"values": [1, 2]}),
        )
        .unwrap();
        assert!(ok.signing_hash().is_ok());

        let short = TypedData::new(
            Eip712Domain::default(),
            types,
            "Pair".to_string(),
            json!({"values": [1]}),
        )
        .unwrap();
        assert!(matches!(short.signing_hash(), Err(Error::InvalidTypedData(_))));
    }

    #[test]
    fn signed_integers_use_twos_complement() {
        let word = encode_atomic("int8", &json!(-1)).unwrap();
        assert_eq!(word, [0xff; 32]);

        let word = encode_atomic("int256", &json!("-2")).unwrap();
        assert_eq!(word[31], 0xfe);

        assert!(encode_atomic("int8", &json!(128)).is_err());
        assert!(encode_atomic("int8", &json!(-128)).is_ok());
    }

    #[test]
    fn unsigned_integers_are_range_checked() {
        assert!(encode_atomic("uint8", &json!(255)).is_ok());
        assert!(encode_atomic("uint8", &json!(256)).is_err());
        assert!(encode_atomic("uint7", &json!(1)).is_err());
        assert_eq!(encode_atomic("uint", &json!("0x2a")).unwrap()[31], 42);
    }

    #[test]
    fn fixed_bytes_require_exact_length() {
        let word = encode_atomic("bytes2", &json!("0xabcd")).unwrap();
        assert_eq!(&word[..2], &[0xab, 0xcd]);
        assert!(word[2..].iter().all(|b| *b == 0));
        assert!(encode_atomic("bytes2", &json!("0xab")).is_err());
        assert!(encode_atomic("bytes33", &json!("0x00")).is_err());
    }

    #[test]
    fn invalid_verifying_contract_is_rejected() {
        let domain = Eip712Domain {
            verifying_contract: Some("0x1234".to_string()),
            ..Eip712Domain::default()
        };
        assert!(matches!(domain.separator_hash(), Err(Error::InvalidTypedData(_))));
    }

    #[test]
    fn invalid_salt_is_rejected() {
        let domain = Eip712Domain {
            salt: Some("0x01".to_string()),
            ..Eip712Domain::default()
        };
        assert!(matches!(domain.separator_hash(), Err(Error::InvalidTypedData(_))));
    }

    #[test]
    fn wallet_json_shape_parses() {
        let json = json!({
            "types": mail_types(),
            "primaryType": "Mail",
            "domain": domain(),
            "message": mail_message()
        })
        .to_string();
        let from_json = TypedData::from_json(&json).unwrap();
        let built =
            TypedData::new(domain(), mail_types(), "Mail".to_string(), mail_message()).unwrap();
        assert_eq!(from_json.signing_hash().unwrap(), built.signing_hash().unwrap());
    }

    #[test]
    fn undefined_type_error() {
        let typed = TypedData::new(
            Eip712Domain::default(),
            json!({}),
            "NonExistent".to_string(),
            json!({"foo": "bar"}),
        )
        .unwrap();
        assert!(matches!(typed.signing_hash(), Err(Error::UndefinedType(_))));
    }

    #[test]
    fn malformed_types_are_rejected_up_front() {
        let result = TypedData::new(
            Eip712Domain::default(),
            json!({"Broken": "not a list"}),
            "Broken".to_string(),
            json!({}),
        );
        assert!(matches!(result, Err(Error::InvalidTypedData(_))));
    }
}
