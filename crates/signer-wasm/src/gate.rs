//! One card operation at a time, across the whole wallet.
//!
//! Connecting, signing, sending and every multi-step flow enter the same
//! [`ChallengeGate`]. While one holds a [`GatePass`], every other operation
//! is refused with `SigningInProgress`. The pass arms each card challenge of
//! its operation with a fresh cancel handle that [`ChallengeGate::cancel`]
//! can reach, and once cancelled no further challenge of that operation
//! starts.

use std::cell::{Cell, RefCell};

use futures::future::LocalBoxFuture;
use nfc_evm_signer_core::card::{Abort, CancelHandle};
use nfc_evm_signer_core::error::{Error as CoreError, Result as CoreResult};
use tracing::debug;

/// The wallet's single-operation gate.
#[derive(Debug, Default)]
pub(crate) struct ChallengeGate {
    busy: Cell<bool>,
    cancelled: Cell<bool>,
    handle: RefCell<Option<CancelHandle>>,
}

impl ChallengeGate {
    /// Starts an operation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SigningInProgress`] while another operation
    /// holds the gate.
    pub(crate) fn enter(&self) -> CoreResult<GatePass<'_>> {
        if self.busy.replace(true) {
            return Err(CoreError::SigningInProgress);
        }
        self.cancelled.set(false);
        Ok(GatePass { gate: self })
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Cancels the running operation.
    ///
    /// A challenge waiting for a tap fails with `Cancelled`; an operation
    /// between challenges stops before its next one. Broadcast transactions
    /// stay broadcast. Returns `false` when nothing is running.
    pub(crate) fn cancel(&self) -> bool {
        if !self.busy.get() {
            return false;
        }
        self.cancelled.set(true);
        if let Some(handle) = self.handle.borrow_mut().take() {
            handle.cancel();
        }
        debug!("card operation cancelled");
        true
    }
}

/// Proof that an operation holds the gate; releases it on drop.
#[derive(Debug)]
pub(crate) struct GatePass<'a> {
    gate: &'a ChallengeGate,
}

impl GatePass<'_> {
    /// Arms the operation's next challenge, bounded by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] once the operation was cancelled.
    pub(crate) fn abort(&self, deadline: Option<LocalBoxFuture<'static, ()>>) -> CoreResult<Abort> {
        if self.gate.cancelled.get() {
            return Err(CoreError::Cancelled);
        }
        let abort = match deadline {
            Some(deadline) => Abort::never().with_deadline(deadline),
            None => Abort::never(),
        };
        let (abort, handle) = abort.cancellable();
        // The previous challenge of this operation has already finished.
        *self.gate.handle.borrow_mut() = Some(handle);
        Ok(abort)
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate.handle.borrow_mut().take();
        self.gate.cancelled.set(false);
        self.gate.busy.set(false);
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::executor::block_on;
    use nfc_evm_signer_core::Address;
    use nfc_evm_signer_core::card::{CardTransport, ChallengeSigner, SignCommand, SigningEvents};
    use serde_json::Value;

    use super::*;

    /// A card that never answers.
    struct SilentCard;

    #[async_trait::async_trait(?Send)]
    impl CardTransport for SilentCard {
        async fn exchange(&self, _command: &SignCommand, _status: SigningEvents) -> CoreResult<Value> {
            futures::future::pending().await
        }
    }

    #[test]
    fn second_operation_is_refused_until_the_first_ends() {
        let gate = ChallengeGate::default();
        let pass = gate.enter().unwrap();
        assert!(gate.is_busy());
        assert!(matches!(gate.enter(), Err(CoreError::SigningInProgress)));

        drop(pass);
        assert!(!gate.is_busy());
        assert!(gate.enter().is_ok());
    }

    #[test]
    fn connect_is_refused_while_a_signature_is_pending() {
        let gate = ChallengeGate::default();
        let signer = ChallengeSigner::new(SilentCard, Address::new([1; 20]), 1);

        let pass = gate.enter().unwrap();
        let mut signing = signer
            .sign_digest(Default::default(), pass.abort(None).unwrap())
            .boxed_local();
        assert!((&mut signing).now_or_never().is_none());

        assert!(matches!(gate.enter(), Err(CoreError::SigningInProgress)));

        assert!(gate.cancel());
        assert!(matches!(block_on(signing), Err(CoreError::Cancelled)));
        drop(pass);
        assert!(!gate.is_busy());
    }

    #[test]
    fn cancel_between_challenges_stops_the_next_one() {
        let gate = ChallengeGate::default();
        let pass = gate.enter().unwrap();

        let first = pass.abort(None);
        assert!(first.is_ok());
        assert!(gate.cancel());
        assert!(matches!(pass.abort(None), Err(CoreError::Cancelled)));

        drop(pass);
        let pass = gate.enter().unwrap();
        assert!(pass.abort(None).is_ok());
    }

    #[test]
    fn cancel_reaches_the_latest_challenge() {
        let gate = ChallengeGate::default();
        let signer = ChallengeSigner::new(SilentCard, Address::new([1; 20]), 1);
        let pass = gate.enter().unwrap();

        let _finished_step = pass.abort(None).unwrap();
        let mut pending = signer
            .sign_digest(Default::default(), pass.abort(None).unwrap())
            .boxed_local();
        assert!((&mut pending).now_or_never().is_none());

        assert!(gate.cancel());
        assert!(matches!(block_on(pending), Err(CoreError::Cancelled)));
    }

    #[test]
    fn cancel_is_false_when_idle() {
        let gate = ChallengeGate::default();
        assert!(!gate.cancel());
        drop(gate.enter().unwrap());
        assert!(!gate.cancel());
    }
}
