//! Progress events for a pending card challenge.
//!
//! Callers subscribe to [`SigningEvents`] and receive every [`SigningEvent`]
//! on an unbounded channel. Having no subscriber is fine; a subscriber that
//! drops its receiver is forgotten on the next emit.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

use super::command::CardStatus;

/// One step of the challenge state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningEvent {
    /// The challenge was issued; the user should tap the card.
    AwaitingTap,
    /// A card was read.
    CardScanned,
    /// The read failed; the user should tap again (advisory).
    RetryRequested,
    /// An unrecognized status from the card library.
    DeviceMessage(String),
    /// The response arrived and the reporting address is being checked.
    VerifyingAddress,
    /// A verified signature is available.
    Signed,
    /// The challenge ended with an error.
    Failed(String),
}

impl From<CardStatus> for SigningEvent {
    fn from(status: CardStatus) -> Self {
        match status {
            CardStatus::Init => Self::AwaitingTap,
            CardStatus::Scanned => Self::CardScanned,
            CardStatus::Retry => Self::RetryRequested,
            CardStatus::Other(cause) => Self::DeviceMessage(cause),
        }
    }
}

/// A cloneable fan-out of [`SigningEvent`]s.
///
/// Clones share subscribers, so a clone handed to a transport's status
/// callback reaches the same listeners as the signer itself.
#[derive(Clone, Default)]
pub struct SigningEvents {
    subscribers: Rc<RefCell<Vec<UnboundedSender<SigningEvent>>>>,
}

impl fmt::Debug for SigningEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningEvents")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

impl SigningEvents {
    /// Registers a new listener.
    #[must_use]
    pub fn subscribe(&self) -> UnboundedReceiver<SigningEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn emit(&self, event: &SigningEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    /// Forwards a raw status cause from the card library.
    pub fn report_status(&self, cause: &str) {
        self.emit(&CardStatus::from_cause(cause).into());
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn emit_without_subscribers_is_fine() {
        SigningEvents::default().emit(&SigningEvent::AwaitingTap);
    }

    #[test]
    fn clones_share_subscribers() {
        let events = SigningEvents::default();
        let mut rx = events.subscribe();
        let clone = events.clone();

        clone.report_status("scanned");
        events.emit(&SigningEvent::Signed);
        drop(events);
        drop(clone);

        let received: Vec<_> = block_on(rx.by_ref().collect());
        assert_eq!(received, vec![SigningEvent::CardScanned, SigningEvent::Signed]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let events = SigningEvents::default();
        let rx = events.subscribe();
        drop(rx);
        events.emit(&SigningEvent::AwaitingTap);
        assert_eq!(events.subscribers.borrow().len(), 0);
    }

    #[test]
    fn unknown_cause_becomes_device_message() {
        let event: SigningEvent = CardStatus::from_cause("nfc_disabled").into();
        assert_eq!(event, SigningEvent::DeviceMessage("nfc_disabled".to_string()));
    }
}
