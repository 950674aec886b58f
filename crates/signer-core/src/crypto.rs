//! secp256k1 signature utilities.
//!
//! Cards sign with secp256k1 but do not promise canonical signatures, so
//! everything the signer hands to Ethereum goes through this module:
//!
//! - Low-S normalization (EIP-2), flipping the parity when `s` is negated
//! - Public key and address recovery from a signature over a prehash
//! - Verification that a signature recovers to an expected address
//!
//! # Example
//!
//! ```
//! use alloy_primitives::keccak256;
//! use k256::ecdsa::SigningKey;
//! use nfc_evm_signer_core::Address;
//! use nfc_evm_signer_core::crypto::{recover_address, sign_hash};
//!
//! let key = SigningKey::from_slice(&[1u8; 32]).unwrap();
//! let digest = keccak256(b"hello");
//! let sig = sign_hash(&key, &digest).unwrap();
//!
//! let signer = recover_address(&digest, &sig).unwrap();
//! assert_eq!(signer, Address::from_public_key(key.verifying_key()));
//! ```

use alloy_primitives::B256;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

fn to_k256(signature: &Signature) -> Result<K256Signature> {
    K256Signature::from_scalars(*signature.r(), *signature.s())
        .map_err(|_| Error::InvalidSignature("r or s out of range".to_string()))
}

/// Normalizes a signature to low-S form.
///
/// If `s` lies in the upper half of the curve order it is replaced by
/// `n - s` and the parity is flipped, so the signature still recovers to the
/// same public key.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if `r` or `s` is zero or not below the
/// curve order.
pub fn normalize_s(signature: &Signature) -> Result<Signature> {
    let sig = to_k256(signature)?;

    Ok(match sig.normalize_s() {
        Some(low) => {
            let bytes = low.to_bytes();
            let mut s = [0u8; 32];
            s.copy_from_slice(&bytes[32..]);
            Signature::new(*signature.r(), s, signature.v() ^ 1)
        }
        None => *signature,
    })
}

/// Returns `true` if `s` is already in the lower half of the curve order.
#[must_use]
pub fn is_low_s(signature: &Signature) -> bool {
    to_k256(signature).is_ok_and(|sig| sig.normalize_s().is_none())
}

/// Recovers the public key that produced `signature` over `hash`.
///
/// The signature must be in low-S form.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if recovery fails.
pub fn recover_public_key(hash: &B256, signature: &Signature) -> Result<VerifyingKey> {
    let sig = to_k256(signature)?;
    let recovery_id = RecoveryId::from_byte(signature.v())
        .ok_or_else(|| Error::InvalidSignature(format!("bad parity {}", signature.v())))?;

    VerifyingKey::recover_from_prehash(hash.as_slice(), &sig, recovery_id)
        .map_err(|e| Error::InvalidSignature(format!("recovery failed: {e}")))
}

/// Recovers the Ethereum address that produced `signature` over `hash`.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if recovery fails.
pub fn recover_address(hash: &B256, signature: &Signature) -> Result<Address> {
    recover_public_key(hash, signature).map(|key| Address::from_public_key(&key))
}

/// Verifies that `signature` over `hash` recovers to `expected`.
#[must_use]
pub fn verify_signature(hash: &B256, signature: &Signature, expected: &Address) -> bool {
    recover_address(hash, signature).is_ok_and(|signer| &signer == expected)
}

/// Signs a 32-byte prehash with a software key.
///
/// Produces the same low-S recoverable form a well-behaved card returns.
/// Used by software-backed signers and simulated cards.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] if signing fails.
pub fn sign_hash(key: &SigningKey, hash: &B256) -> Result<Signature> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| Error::InvalidSignature(format!("signing failed: {e}")))?;

    let bytes = sig.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(Signature::new(r, s, u8::from(recovery_id.is_y_odd())))
}

#[cfg(test)]
mod tests {
    use alloy_primitives::keccak256;

    use super::*;

    /// secp256k1 curve order.
    const N: [u8; 32] = [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFE, 0xBA, 0xAE, 0xDC, 0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36,
        0x41, 0x41,
    ];

    fn negate(s: &[u8; 32]) -> [u8; 32] {
        let mut out = [0u8; 32];
        let mut borrow = 0i16;
        for i in (0..32).rev() {
            let mut diff = i16::from(N[i]) - i16::from(s[i]) - borrow;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out[i] = u8::try_from(diff).unwrap();
        }
        out
    }

    fn key() -> SigningKey {
        SigningKey::from_slice(&[0x42; 32]).unwrap()
    }

    #[test]
    fn sign_and_recover() {
        let key = key();
        let digest = keccak256(b"digest");
        let sig = sign_hash(&key, &digest).unwrap();

        assert!(is_low_s(&sig));
        let expected = Address::from_public_key(key.verifying_key());
        assert!(verify_signature(&digest, &sig, &expected));
    }

    #[test]
    fn high_s_is_normalized_with_parity_flip() {
        let key = key();
        let digest = keccak256(b"malleable");
        let low = sign_hash(&key, &digest).unwrap();

        let high = Signature::new(*low.r(), negate(low.s()), low.v() ^ 1);
        assert!(!is_low_s(&high));

        let normalized = normalize_s(&high).unwrap();
        assert_eq!(normalized, low);
    }

    #[test]
    fn normalize_low_s_is_identity() {
        let digest = keccak256(b"already low");
        let sig = sign_hash(&key(), &digest).unwrap();
        assert_eq!(normalize_s(&sig).unwrap(), sig);
    }

    #[test]
    fn zero_scalars_are_rejected() {
        let sig = Signature::new([0u8; 32], [0u8; 32], 0);
        assert!(normalize_s(&sig).is_err());
        assert!(recover_address(&B256::ZERO, &sig).is_err());
    }

    #[test]
    fn wrong_digest_recovers_someone_else() {
        let key = key();
        let sig = sign_hash(&key, &keccak256(b"one")).unwrap();
        let expected = Address::from_public_key(key.verifying_key());
        assert!(!verify_signature(&keccak256(b"two"), &sig, &expected));
    }
}
