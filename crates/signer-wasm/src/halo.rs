//! Card transport backed by the browser card library.
//!
//! The card library drives the NFC exchange in the browser and exposes a
//! single promise-returning entry point, `execHaloCmdWeb(command, options)`.
//! [`HaloTransport`] implements the core [`CardTransport`] on top of it,
//! forwarding the library's status callback as signing events.
//!
//! The library keeps running after a challenge is abandoned (timed out or
//! cancelled), and may still invoke the status callback. The callback is
//! therefore owned by a task that lives until the library's promise
//! settles, and no new exchange starts on the same transport before then.
//!
//! # Example
//!
//! ```ignore
//! use nfc_evm_signer_core::CardAccount;
//! use nfc_evm_signer_wasm::halo::HaloTransport;
//!
//! let transport = HaloTransport::default();
//! let account = CardAccount::tap_to_connect(transport.clone(), 1, Abort::never()).await?;
//! ```

use std::cell::Cell;
use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{JSON, Object, Promise, Reflect};
use nfc_evm_signer_core::card::{CardTransport, SignCommand, SigningEvents};
use nfc_evm_signer_core::error::{Error as CoreError, Result as CoreResult};
use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};

use crate::error::js_error_message;

#[wasm_bindgen(module = "@arx-research/libhalo/api/web")]
extern "C" {
    #[wasm_bindgen(js_name = "execHaloCmdWeb", catch)]
    fn exec_halo_cmd_web(command: JsValue, options: JsValue) -> Result<Promise, JsValue>;
}

/// Error names the card library uses for a tap that can simply be repeated.
const RETRYABLE_ERRORS: [&str; 2] = ["NFCOperationError", "NFCAbortedError"];

/// Maps a card library error to the core error taxonomy.
pub(crate) fn classify_card_error(name: &str, message: &str) -> CoreError {
    if RETRYABLE_ERRORS.contains(&name) {
        CoreError::TapFailed(format!("{name}: {message}"))
    } else if name.is_empty() {
        CoreError::DeviceFailure(message.to_string())
    } else {
        CoreError::DeviceFailure(format!("{name}: {message}"))
    }
}

/// Converts between `serde_json` values and JavaScript objects.
fn to_js(value: &Value) -> CoreResult<JsValue> {
    JSON::parse(&value.to_string())
        .map_err(|e| CoreError::DeviceFailure(js_error_message(&e)))
}

fn from_js(value: &JsValue) -> CoreResult<Value> {
    let text = JSON::stringify(value)
        .map_err(|e| CoreError::MalformedResponse(js_error_message(&e)))?;
    let text: String = text.into();
    serde_json::from_str(&text).map_err(|e| CoreError::MalformedResponse(e.to_string()))
}

/// Marks a library call as running until dropped.
///
/// Owned rather than borrowed, so it can travel with the task that waits
/// for the library to settle.
#[derive(Debug)]
pub(crate) struct LibraryClaim(Rc<Cell<bool>>);

impl LibraryClaim {
    /// Claims `live`, or fails while an earlier call has not settled.
    pub(crate) fn acquire(live: &Rc<Cell<bool>>) -> CoreResult<Self> {
        if live.replace(true) {
            return Err(CoreError::SigningInProgress);
        }
        Ok(Self(Rc::clone(live)))
    }
}

impl Drop for LibraryClaim {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Sends commands through `execHaloCmdWeb`.
///
/// Clones share one library slot: at most one call runs at a time, counted
/// until the library settles rather than until the caller stops waiting.
#[derive(Debug, Clone, Default)]
pub struct HaloTransport {
    live: Rc<Cell<bool>>,
}

impl HaloTransport {
    /// Returns `true` while a library call has not settled.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.get()
    }
}

#[async_trait(?Send)]
impl CardTransport for HaloTransport {
    async fn exchange(&self, command: &SignCommand, status: SigningEvents) -> CoreResult<Value> {
        let command = to_js(&command.to_value()?)?;
        let claim = LibraryClaim::acquire(&self.live)?;

        let callback = Closure::<dyn FnMut(JsValue)>::new(move |cause: JsValue| {
            let cause = cause.as_string().unwrap_or_default();
            debug!(%cause, "card status");
            status.report_status(&cause);
        });
        let options = Object::new();
        Reflect::set(&options, &"statusCallback".into(), callback.as_ref())
            .map_err(|e| CoreError::DeviceFailure(js_error_message(&e)))?;

        let promise = exec_halo_cmd_web(command, options.into())
            .map_err(|err| CoreError::DeviceFailure(js_error_message(&err)))?;

        // Keeps the callback and the claim until the library is done, even
        // if this exchange is dropped first.
        let settled = JsFuture::from(promise.clone());
        spawn_local(async move {
            if JsFuture::from(promise).await.is_err() {
                debug!("card library settled with an error");
            }
            drop(callback);
            drop(claim);
        });

        match settled.await {
            Ok(response) => from_js(&response),
            Err(err) => {
                let name = Reflect::get(&err, &"name".into())
                    .ok()
                    .and_then(|n| n.as_string())
                    .unwrap_or_default();
                Err(classify_card_error(&name, &js_error_message(&err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_claim_is_exclusive_until_dropped() {
        let transport = HaloTransport::default();
        let shared = transport.clone();

        let claim = LibraryClaim::acquire(&transport.live).unwrap();
        assert!(shared.is_live());
        assert!(matches!(
            LibraryClaim::acquire(&shared.live),
            Err(CoreError::SigningInProgress)
        ));

        drop(claim);
        assert!(!transport.is_live());
        assert!(LibraryClaim::acquire(&shared.live).is_ok());
    }

    #[test]
    fn lost_taps_are_retryable() {
        assert!(classify_card_error("NFCOperationError", "tag lost").is_retryable());
        assert!(classify_card_error("NFCAbortedError", "aborted").is_retryable());
    }

    #[test]
    fn other_failures_are_device_failures() {
        let err = classify_card_error("NFCMethodNotSupported", "no web nfc");
        assert!(matches!(err, CoreError::DeviceFailure(ref m) if m.contains("NFCMethodNotSupported")));
        assert!(!err.is_retryable());
        assert!(matches!(classify_card_error("", "boom"), CoreError::DeviceFailure(_)));
    }
}
