//! JSON-RPC transport and timers backed by browser APIs.
//!
//! [`FetchTransport`] posts request bodies with `window.fetch`, and
//! [`TimeoutSleep`] and [`deadline`] wrap `setTimeout` promises so the core
//! can poll for receipts and bound a tap without owning a clock.
//!
//! # Example
//!
//! ```ignore
//! use nfc_evm_signer_core::JsonRpcClient;
//! use nfc_evm_signer_wasm::fetch::{FetchTransport, TimeoutSleep};
//!
//! let client = JsonRpcClient::new(FetchTransport::new(url), TimeoutSleep);
//! let block = client.block_number().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use js_sys::Promise;
use nfc_evm_signer_core::error::{Error as CoreError, Result as CoreResult};
use nfc_evm_signer_core::rpc::{RpcError, RpcTransport, Sleep};
use tracing::trace;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Headers, Request, RequestInit, RequestMode, Response};

use crate::error::js_error_message;

fn transport_error(message: impl Into<String>) -> CoreError {
    CoreError::Rpc(RpcError::transport(message))
}

fn js_transport_error(value: &JsValue) -> CoreError {
    transport_error(js_error_message(value))
}

/// Posts JSON-RPC bodies to a node over HTTP.
#[derive(Debug, Clone)]
pub struct FetchTransport {
    url: String,
}

impl FetchTransport {
    /// Creates a transport for the node at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the node URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, body: &str) -> CoreResult<Request> {
        let headers = Headers::new().map_err(|e| js_transport_error(&e))?;
        headers
            .set("Content-Type", "application/json")
            .map_err(|e| js_transport_error(&e))?;

        let init = RequestInit::new();
        init.set_method("POST");
        init.set_mode(RequestMode::Cors);
        init.set_headers(&headers);
        init.set_body(&JsValue::from_str(body));

        Request::new_with_str_and_init(&self.url, &init).map_err(|e| js_transport_error(&e))
    }
}

#[async_trait(?Send)]
impl RpcTransport for FetchTransport {
    async fn send(&self, body: String) -> CoreResult<String> {
        let window = web_sys::window().ok_or_else(|| transport_error("no window"))?;
        let request = self.request(&body)?;
        trace!(url = %self.url, len = body.len(), "posting rpc request");

        let response: Response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(|e| js_transport_error(&e))?
            .dyn_into()
            .map_err(|_| transport_error("fetch did not return a Response"))?;

        if !response.ok() {
            return Err(transport_error(format!(
                "HTTP {} {}",
                response.status(),
                response.status_text()
            )));
        }

        let text = JsFuture::from(response.text().map_err(|e| js_transport_error(&e))?)
            .await
            .map_err(|e| js_transport_error(&e))?;
        text.as_string()
            .ok_or_else(|| transport_error("response body is not text"))
    }
}

/// Clamps a duration to the millisecond range `setTimeout` accepts.
pub(crate) fn timeout_millis(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

/// A promise resolving after `millis`. It never resolves outside a window.
fn timeout(millis: i32) -> Promise {
    Promise::new(&mut |resolve, _reject| {
        if let Some(window) = web_sys::window() {
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis);
        }
    })
}

/// A future completing after `duration`, for use as a tap deadline.
#[must_use]
pub fn deadline(duration: Duration) -> LocalBoxFuture<'static, ()> {
    let promise = timeout(timeout_millis(duration));
    async move {
        let _ = JsFuture::from(promise).await;
    }
    .boxed_local()
}

/// Sleeps on `setTimeout` between receipt polls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutSleep;

#[async_trait(?Send)]
impl Sleep for TimeoutSleep {
    async fn sleep(&self, duration: Duration) {
        let _ = JsFuture::from(timeout(timeout_millis(duration))).await;
    }
}
