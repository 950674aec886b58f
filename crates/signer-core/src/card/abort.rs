//! Deadlines and cancellation for a pending challenge.
//!
//! The core has no clock. A deadline is any future that completes when time
//! is up (a `setTimeout` promise in the browser, `tokio::time::sleep` in
//! tests); cancellation is a [`CancelHandle`] the caller keeps.

use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{self, Either, LocalBoxFuture};

use crate::error::Error;

/// Cancels the challenge its paired [`Abort`] guards.
///
/// Dropping the handle without calling [`CancelHandle::cancel`] leaves the
/// challenge running.
#[derive(Debug)]
pub struct CancelHandle(oneshot::Sender<()>);

impl CancelHandle {
    /// Cancels the challenge; it fails with [`Error::Cancelled`].
    pub fn cancel(self) {
        let _ = self.0.send(());
    }
}

/// What may end a challenge before the card answers.
#[derive(Default)]
pub struct Abort {
    deadline: Option<LocalBoxFuture<'static, ()>>,
    cancel: Option<oneshot::Receiver<()>>,
}

impl fmt::Debug for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Abort")
            .field("deadline", &self.deadline.is_some())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl Abort {
    /// Never aborts; the challenge waits for the card indefinitely.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Aborts with [`Error::TimedOut`] once `deadline` completes.
    #[must_use]
    pub fn with_deadline(mut self, deadline: impl Future<Output = ()> + 'static) -> Self {
        self.deadline = Some(deadline.boxed_local());
        self
    }

    /// Makes the challenge cancellable and returns the handle.
    #[must_use]
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = oneshot::channel();
        self.cancel = Some(rx);
        (self, CancelHandle(tx))
    }

    /// Resolves with the abort reason; pending forever if nothing fires.
    pub(crate) async fn triggered(self) -> Error {
        let Self { deadline, cancel } = self;

        let timed_out = async move {
            match deadline {
                Some(deadline) => {
                    deadline.await;
                    Error::TimedOut
                }
                None => future::pending().await,
            }
        };
        let cancelled = async move {
            if let Some(rx) = cancel
                && rx.await.is_ok()
            {
                return Error::Cancelled;
            }
            future::pending().await
        };

        match future::select(timed_out.boxed_local(), cancelled.boxed_local()).await {
            Either::Left((reason, _)) | Either::Right((reason, _)) => reason,
        }
    }
}
