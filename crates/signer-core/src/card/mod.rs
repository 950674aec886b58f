//! NFC tap-card signing.
//!
//! This module provides the challenge/response exchange with a tap-card
//! that signs 32-byte digests with a secp256k1 key in a numbered slot.
//!
//! # Components
//!
//! - [`command`]: the wire types sent to and received from the card library
//! - [`events`]: progress events delivered while waiting for a tap
//! - [`abort`]: caller-supplied deadline and cancellation
//! - [`challenge`]: [`ChallengeSigner`], which runs one exchange and
//!   verifies what comes back
//!
//! # Transport Abstraction
//!
//! The core never talks to NFC hardware. A [`CardTransport`] hands a
//! [`SignCommand`] to whatever drives the card (the browser card library
//! in the wasm crate, a software key in tests) and returns its JSON reply.
//!
//! ```text
//! ┌──────────────────┐    SignCommand     ┌───────────────┐   NFC   ┌──────┐
//! │ ChallengeSigner  │ ─────────────────▶ │ CardTransport │ ──────▶ │ Card │
//! │                  │ ◀───────────────── │               │ ◀────── │      │
//! └──────────────────┘    JSON response   └───────────────┘         └──────┘
//! ```

pub mod abort;
pub mod challenge;
pub mod command;
pub mod events;

use async_trait::async_trait;
use serde_json::Value;

pub use abort::{Abort, CancelHandle};
pub use challenge::{CardIdentity, ChallengeSigner, identify_card};
pub use command::{CardSignature, CardStatus, RawSignature, SignCommand, SignResponse};
pub use events::{SigningEvent, SigningEvents};

use crate::error::Result;

/// Default key slot on the card.
pub const DEFAULT_KEY_SLOT: u8 = 1;

/// Delivers commands to a physical or simulated card.
///
/// Implementations forward every status cause they observe to
/// [`SigningEvents::report_status`] on `status`.
#[async_trait(?Send)]
pub trait CardTransport {
    /// Sends `command` and waits for the card's reply.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TapFailed`] when the tap was lost and may be
    /// retried, or [`crate::Error::DeviceFailure`] for anything else.
    async fn exchange(&self, command: &SignCommand, status: SigningEvents) -> Result<Value>;
}

#[async_trait(?Send)]
impl<T: CardTransport + ?Sized> CardTransport for &T {
    async fn exchange(&self, command: &SignCommand, status: SigningEvents) -> Result<Value> {
        (**self).exchange(command, status).await
    }
}

#[async_trait(?Send)]
impl<T: CardTransport + ?Sized> CardTransport for std::rc::Rc<T> {
    async fn exchange(&self, command: &SignCommand, status: SigningEvents) -> Result<Value> {
        (**self).exchange(command, status).await
    }
}
