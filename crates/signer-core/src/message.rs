//! EIP-191 personal message hashing.
//!
//! Personal messages are prefixed before hashing so that a signed message
//! can never be replayed as a transaction:
//!
//! ```text
//! keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)
//! ```

use alloy_primitives::{B256, eip191_hash_message};

/// Hashes a personal message per [EIP-191] (version `0x45`).
///
/// [EIP-191]: https://eips.ethereum.org/EIPS/eip-191
#[must_use]
pub fn hash_personal_message(message: impl AsRef<[u8]>) -> B256 {
    eip191_hash_message(message)
}
