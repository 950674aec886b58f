//! `localStorage` as a session key-value store.

use nfc_evm_signer_core::error::{Error as CoreError, Result as CoreResult};
use nfc_evm_signer_core::session::KeyValueStore;
use web_sys::Storage;

use crate::error::{WasmError, WasmResult, js_error_message};

/// The page's `localStorage`.
#[derive(Debug, Clone)]
pub struct LocalStorage(Storage);

impl LocalStorage {
    /// Opens the window's local storage.
    ///
    /// # Errors
    ///
    /// Returns [`WasmError::NoWindow`] outside a browser, or
    /// [`WasmError::StorageUnavailable`] if storage is disabled.
    pub fn open() -> WasmResult<Self> {
        let window = web_sys::window().ok_or(WasmError::NoWindow)?;
        let storage = window
            .local_storage()
            .map_err(|e| WasmError::StorageUnavailable(js_error_message(&e)))?
            .ok_or_else(|| WasmError::StorageUnavailable("localStorage is disabled".to_string()))?;
        Ok(Self(storage))
    }
}

impl KeyValueStore for LocalStorage {
    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.0
            .get_item(key)
            .map_err(|e| CoreError::Persistence(js_error_message(&e)))
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.0
            .set_item(key, value)
            .map_err(|e| CoreError::Persistence(js_error_message(&e)))
    }

    fn remove(&self, key: &str) -> CoreResult<()> {
        self.0
            .remove_item(key)
            .map_err(|e| CoreError::Persistence(js_error_message(&e)))
    }
}
