//! NFC Tap-Card EVM Signer WASM Library
//!
//! This crate provides WebAssembly bindings for the NFC tap-card signer,
//! letting a web page use a tap-card as an EVM account: connect by tapping,
//! sign messages, typed data and transactions, and broadcast through a
//! JSON-RPC node.
//!
//! # Browser Support
//!
//! Card exchanges go through the `@arx-research/libhalo` web driver, which
//! uses Web NFC on Android Chrome and falls back to the credential API
//! elsewhere. The bundler must resolve that package.
//!
//! # Security Requirements
//!
//! - HTTPS context required (Web NFC security requirement)
//! - Every card challenge must be started from a user gesture
//! - Each challenge checks that the tapped card is the connected one
//!
//! # Quick Start
//!
//! ```javascript
//! import init, { CardWallet, initLogging } from 'nfc-evm-signer-wasm';
//!
//! // Initialize WASM module
//! await init();
//! initLogging("info");
//!
//! const wallet = new CardWallet(JSON.stringify({
//!     chainId: 545,
//!     rpcUrl: "https://testnet.evm.nodes.onflow.org",
//! }));
//!
//! // Reuse the stored session, or tap (must be triggered by user gesture)
//! const address = wallet.restore() ?? await wallet.connect();
//!
//! // Sign and broadcast a transaction
//! const hash = await wallet.sendTransaction(JSON.stringify({
//!     to: "0x...",
//!     value: "1000000000000000000",
//!     chainId: 545,
//! }));
//!
//! // Forget the card
//! wallet.disconnect();
//! ```
//!
//! # API Reference
//!
//! ## [`CardWallet`]
//!
//! - `new CardWallet(configJson?)` - Create a wallet from a JSON configuration
//! - [`restore()`](CardWallet::restore) - Restore the stored session without a tap
//! - [`connect()`](CardWallet::connect) - Tap a card and connect it
//! - [`signMessage(message)`](CardWallet::sign_message) - Sign a personal message (EIP-191)
//! - [`signTypedData(json)`](CardWallet::sign_typed_data) - Sign EIP-712 typed data
//! - [`signTransaction(json)`](CardWallet::sign_transaction) - Sign a fully specified transaction
//! - [`sendTransaction(json)`](CardWallet::send_transaction) - Fill, sign and broadcast
//! - [`sendAndConfirm(json)`](CardWallet::send_and_confirm) - Broadcast and wait for the receipt
//! - [`subscribe(callback)`](CardWallet::subscribe) - Listen to challenge progress
//! - [`cancel()`](CardWallet::cancel) - Cancel the running card operation
//! - [`disconnect()`](CardWallet::disconnect) - Forget the card
//!
//! Contract helpers (`tokenBalance`, `stakeCollateral`, `topUpCollateral`,
//! `payWithCredit`, `repayCredit`, `lend`) need `contracts` in the
//! configuration.
//!
//! Only one card operation runs at a time; calls made meanwhile throw
//! `SigningInProgress`.
//!
//! Errors are thrown as `Error` objects whose `name` is a stable code such
//! as `WrongCard`, `TapFailed` or `InsufficientFunds`.

pub mod error;
pub mod fetch;
mod gate;
pub mod halo;
pub mod logging;
pub mod storage;
pub mod wallet;

pub use error::{WasmError, WasmResult};
pub use fetch::{FetchTransport, TimeoutSleep};
pub use halo::HaloTransport;
pub use logging::init_logging;
pub use storage::LocalStorage;
pub use wallet::CardWallet;

use wasm_bindgen::prelude::*;

/// Initializes the WASM module.
///
/// This function is automatically called when the module is loaded,
/// but can be called explicitly if needed.
#[wasm_bindgen(start)]
#[expect(clippy::missing_const_for_fn, reason = "not a stable API function")]
pub fn init() {
    // Logging is opt-in through `initLogging`
}

/// Checks if Web NFC is available in the current browser.
///
/// Cards still work without it through the credential API fallback, but
/// the tap prompt differs.
///
/// # Example
///
/// ```javascript
/// if (!isWebNfcSupported()) {
///     showHint("Hold the card against the top of your phone");
/// }
/// ```
#[wasm_bindgen(js_name = "isWebNfcSupported")]
pub fn is_web_nfc_supported() -> bool {
    web_sys::window().is_some_and(|window| {
        js_sys::Reflect::has(&window, &JsValue::from_str("NDEFReader")).unwrap_or(false)
    })
}

/// Returns the library version.
///
/// # Returns
///
/// The version string (e.g., `"0.1.0"`).
#[wasm_bindgen(js_name = "getVersion")]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Import for WASM tests
    #[expect(unused_imports, reason = "import for WASM tests")]
    use wasm_bindgen_test::wasm_bindgen_test;

    #[test]
    fn version() {
        let version = get_version();
        assert!(!version.is_empty());
    }
}
