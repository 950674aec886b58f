//! The challenge/response exchange that turns a digest into a signature.
//!
//! [`ChallengeSigner`] owns one card transport and the address of the card
//! it expects. For every digest it:
//!
//! 1. refuses to start if another challenge is already waiting for a tap
//! 2. sends a [`SignCommand`] and forwards the card library's status causes
//!    as [`SigningEvent`]s, racing the exchange against the caller's [`Abort`]
//! 3. checks that the responding card reports the expected address
//! 4. gates the signature on its length and `v`, normalizes it to low-S and
//!    confirms it recovers to that address
//!
//! There is no automatic retry. A [`Error::TapFailed`] tells the caller the
//! same operation may be re-invoked with a fresh challenge.
//!
//! # Example
//!
//! ```ignore
//! use nfc_evm_signer_core::card::{Abort, ChallengeSigner};
//!
//! let signer = ChallengeSigner::new(transport, account_address, 1);
//! let mut events = signer.events().subscribe();
//! let signature = signer.sign_digest(digest, Abort::never()).await?;
//! ```

use std::cell::Cell;
use std::fmt;

use alloy_primitives::B256;
use futures::FutureExt;
use futures::future::{self, Either};
use tracing::{debug, info, warn};

use super::abort::Abort;
use super::command::{SignCommand, SignResponse};
use super::events::{SigningEvent, SigningEvents};
use super::CardTransport;
use crate::address::{Address, is_well_formed, normalize};
use crate::crypto;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// Message the card signs on connect; only its address and key are kept.
const IDENTIFY_MESSAGE: &str = "0123";

/// What a card reports about itself on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardIdentity {
    /// The card's account address.
    pub address: Address,
    /// SEC1 public key hex, when the card reports it.
    pub public_key: Option<String>,
}

/// Clears the in-flight flag when a challenge ends, however it ends.
struct FlightGuard<'a>(&'a Cell<bool>);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Result<Self> {
        if flag.replace(true) {
            return Err(Error::SigningInProgress);
        }
        Ok(Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Runs one command against the card, raced against `abort`.
async fn exchange<T: CardTransport>(
    transport: &T,
    command: &SignCommand,
    events: &SigningEvents,
    abort: Abort,
) -> Result<SignResponse> {
    events.emit(&SigningEvent::AwaitingTap);
    info!(key_no = command.key_no, "card tap requested");

    let request = transport.exchange(command, events.clone()).boxed_local();
    let raw = match future::select(request, abort.triggered().boxed_local()).await {
        Either::Left((result, _)) => result.map_err(|err| match err {
            Error::TapFailed(_) | Error::DeviceFailure(_) | Error::SigningInProgress => err,
            other => Error::DeviceFailure(other.to_string()),
        })?,
        Either::Right((reason, _)) => {
            warn!(%reason, "card challenge aborted");
            return Err(reason);
        }
    };

    SignResponse::from_value(raw)
}

/// Reads the responding card's address, normalized and gated.
fn reported_address(response: &SignResponse) -> Result<(String, Address)> {
    let normalized = normalize(&response.ether_address);
    if !is_well_formed(&normalized) {
        return Err(Error::MalformedResponse(format!(
            "card reported malformed address {:?}",
            response.ether_address
        )));
    }
    let address = Address::parse(&normalized)?;
    Ok((normalized, address))
}

/// Taps a card to learn its address and public key.
///
/// The card signs a fixed message; the signature is discarded. When a
/// public key is reported it must derive the reported address.
///
/// # Errors
///
/// Returns the exchange errors of [`ChallengeSigner::sign_digest`], or
/// [`Error::MalformedResponse`] if the address and public key disagree.
pub async fn identify_card<T: CardTransport>(
    transport: &T,
    key_slot: u8,
    events: &SigningEvents,
    abort: Abort,
) -> Result<CardIdentity> {
    let command = SignCommand::message(key_slot, IDENTIFY_MESSAGE);

    let outcome = async {
        let response = exchange(transport, &command, events, abort).await?;
        events.emit(&SigningEvent::VerifyingAddress);
        let (_, address) = reported_address(&response)?;

        if let Some(public_key) = &response.public_key {
            let derived = Address::from_public_key_hex(public_key)
                .map_err(|e| Error::MalformedResponse(format!("bad public key: {e}")))?;
            if derived != address {
                return Err(Error::MalformedResponse(format!(
                    "public key derives {derived}, card reported {address}"
                )));
            }
        }

        Ok(CardIdentity {
            address,
            public_key: response.public_key,
        })
    }
    .await;

    match &outcome {
        Ok(identity) => {
            info!(address = %identity.address, "card identified");
            events.emit(&SigningEvent::Signed);
        }
        Err(err) => events.emit(&SigningEvent::Failed(err.to_string())),
    }
    outcome
}

/// Obtains signatures over 32-byte digests from one specific card.
pub struct ChallengeSigner<T> {
    transport: T,
    account: Address,
    key_slot: u8,
    events: SigningEvents,
    in_flight: Cell<bool>,
}

impl<T> fmt::Debug for ChallengeSigner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeSigner")
            .field("account", &self.account)
            .field("key_slot", &self.key_slot)
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

impl<T: CardTransport> ChallengeSigner<T> {
    /// Creates a signer for the card holding `account`'s key in `key_slot`.
    #[must_use]
    pub fn new(transport: T, account: Address, key_slot: u8) -> Self {
        Self {
            transport,
            account,
            key_slot,
            events: SigningEvents::default(),
            in_flight: Cell::new(false),
        }
    }

    /// Shares an existing event fan-out instead of a private one.
    #[must_use]
    pub fn with_events(mut self, events: SigningEvents) -> Self {
        self.events = events;
        self
    }

    /// Returns the event fan-out for subscribing to progress.
    #[must_use]
    pub const fn events(&self) -> &SigningEvents {
        &self.events
    }

    /// Returns the address this signer accepts signatures from.
    #[must_use]
    pub const fn account(&self) -> Address {
        self.account
    }

    /// Returns the key slot challenged on the card.
    #[must_use]
    pub const fn key_slot(&self) -> u8 {
        self.key_slot
    }

    /// Returns `true` while a challenge is waiting for the card.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Has the card sign `digest` and returns the verified signature.
    ///
    /// # Errors
    ///
    /// - [`Error::SigningInProgress`] if a challenge is already pending
    /// - [`Error::TimedOut`] / [`Error::Cancelled`] if `abort` fires first
    /// - [`Error::TapFailed`] (retryable) or [`Error::DeviceFailure`] from the transport
    /// - [`Error::MalformedResponse`] if the response cannot be decoded
    /// - [`Error::WrongCard`] if a different card answered
    /// - [`Error::MalformedSignature`] if the signature fails the shape gate
    ///   or does not recover to the account
    pub async fn sign_digest(&self, digest: B256, abort: Abort) -> Result<Signature> {
        let _guard = FlightGuard::acquire(&self.in_flight)?;
        debug!(%digest, "signing digest");

        let outcome = self.challenge(digest, abort).await;
        match &outcome {
            Ok(_) => self.events.emit(&SigningEvent::Signed),
            Err(err) => self.events.emit(&SigningEvent::Failed(err.to_string())),
        }
        outcome
    }

    async fn challenge(&self, digest: B256, abort: Abort) -> Result<Signature> {
        let command = SignCommand::digest(self.key_slot, &digest);
        let response = exchange(&self.transport, &command, &self.events, abort).await?;

        self.events.emit(&SigningEvent::VerifyingAddress);
        let (normalized, reported) = reported_address(&response)?;
        if reported != self.account {
            warn!(expected = %self.account, actual = %normalized, "wrong card tapped");
            return Err(Error::WrongCard {
                expected: self.account.to_checksum_hex(),
                actual: normalized,
            });
        }

        let signature = Signature::from_card_hex(&response.signature.ether)?;
        let signature = crypto::normalize_s(&signature)
            .map_err(|e| Error::MalformedSignature(e.to_string()))?;

        if !crypto::verify_signature(&digest, &signature, &self.account) {
            return Err(Error::MalformedSignature(
                "signature does not recover to the card address".to_string(),
            ));
        }

        Ok(signature)
    }
}
