//! Signer configuration.
//!
//! [`SignerConfig`] is read from JSON (the browser passes it to the
//! `CardWallet` constructor); every field has a default.
//!
//! # Example
//!
//! ```
//! use nfc_evm_signer_core::SignerConfig;
//!
//! let config = SignerConfig::from_json(r#"{"chainId": 747, "tapTimeoutMs": 30000}"#).unwrap();
//! assert_eq!(config.chain_id, 747);
//! assert_eq!(config.key_slot, 1);
//! assert_eq!(config.receipt_poll_attempts, 120);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::calls::Contracts;
use crate::card::DEFAULT_KEY_SLOT;
use crate::error::{Error, Result};
use crate::rpc::PollPolicy;

/// Flow EVM testnet.
pub const DEFAULT_CHAIN_ID: u64 = 545;

/// Runtime settings for the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SignerConfig {
    /// Chain the account transacts on.
    pub chain_id: u64,
    /// Key slot challenged on the card.
    pub key_slot: u8,
    /// How long to wait for a tap; `None` waits until cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tap_timeout_ms: Option<u64>,
    /// Prepended to every session key.
    pub session_key_prefix: String,
    /// Delay between receipt lookups.
    pub receipt_poll_interval_ms: u64,
    /// Receipt lookups before giving up.
    pub receipt_poll_attempts: u32,
    /// JSON-RPC endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Deployed contract addresses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts: Option<Contracts>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        let poll = PollPolicy::default();
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            key_slot: DEFAULT_KEY_SLOT,
            tap_timeout_ms: None,
            session_key_prefix: String::new(),
            receipt_poll_interval_ms: u64::try_from(poll.interval.as_millis()).unwrap_or(u64::MAX),
            receipt_poll_attempts: poll.attempts,
            rpc_url: None,
            contracts: None,
        }
    }
}

impl SignerConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for malformed JSON, unknown fields or
    /// invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JsonError`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `keySlot` or
    /// `receiptPollAttempts` is zero, or `rpcUrl` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.key_slot == 0 {
            return Err(Error::Configuration("keySlot must be at least 1".to_string()));
        }
        if self.receipt_poll_attempts == 0 {
            return Err(Error::Configuration(
                "receiptPollAttempts must be at least 1".to_string(),
            ));
        }
        if self.rpc_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(Error::Configuration("rpcUrl is empty".to_string()));
        }
        Ok(())
    }

    /// Returns the tap deadline, if one is configured.
    #[must_use]
    pub fn tap_timeout(&self) -> Option<Duration> {
        self.tap_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the receipt polling schedule.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.receipt_poll_interval_ms),
            attempts: self.receipt_poll_attempts,
        }
    }
}
