//! Persistence of the connected card account.
//!
//! A card account survives page reloads as three string slots in a
//! [`KeyValueStore`]:
//!
//! | Key           | Value                                           |
//! |---------------|-------------------------------------------------|
//! | `wallet_data` | JSON `{ address, publicKey, isConnected }`      |
//! | `address`     | the address on its own                          |
//! | `connected`   | `"true"` while a card account is connected      |
//!
//! Loading fails closed. Anything inconsistent wipes all three slots, so a
//! corrupted record can never be signed against. The one repair performed
//! is for addresses persisted with a doubled `0x0x` prefix, which are
//! rewritten in canonical form.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::address::{Address, is_well_formed, normalize};
use crate::error::{Error, Result};

const WALLET_DATA_KEY: &str = "wallet_data";
const ADDRESS_KEY: &str = "address";
const CONNECTED_KEY: &str = "connected";

/// A synchronous string key-value store.
pub trait KeyValueStore {
    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the write is refused.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removes a value; removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store cannot be written.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// An in-memory store with an optional size quota.
///
/// The quota counts key and value bytes together, the way browser storage
/// does, and lets tests exercise write failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// Creates an empty, unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that refuses writes beyond `bytes`.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: RefCell::default(),
            quota: Some(bytes),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn used_without(&self, key: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota {
            let needed = self.used_without(key) + key.len() + value.len();
            if needed > quota {
                return Err(Error::Persistence(format!(
                    "quota exceeded writing {key}: {needed} > {quota} bytes"
                )));
            }
        }
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

/// The persisted card account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    /// The card account address.
    pub address: Address,
    /// The card's public key hex, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// Whether the account is connected.
    pub is_connected: bool,
}

/// The `wallet_data` blob as read back, before the address is trusted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    address: String,
    #[serde(default)]
    public_key: Option<String>,
    is_connected: bool,
}

/// Why a stored session was rejected.
enum Rejection {
    Empty,
    Invalid(String),
}

/// Loads, saves and clears the [`WalletSession`].
pub struct SessionStore<S> {
    store: S,
    prefix: String,
}

impl<S> fmt::Debug for SessionStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl<S: KeyValueStore> SessionStore<S> {
    /// Creates a session store with unprefixed keys.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_prefix(store, "")
    }

    /// Creates a session store whose keys start with `prefix`.
    #[must_use]
    pub fn with_prefix(store: S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    fn keys(&self) -> [String; 3] {
        [
            self.key(WALLET_DATA_KEY),
            self.key(ADDRESS_KEY),
            self.key(CONNECTED_KEY),
        ]
    }

    /// Restores the session, or wipes the store if it is inconsistent.
    ///
    /// Returns `None` when nothing usable is stored.
    pub fn load(&self) -> Option<WalletSession> {
        match self.read() {
            Ok((session, healed)) => {
                if healed {
                    warn!(address = %session.address, "repaired persisted address");
                    if let Err(err) = self.save(&session) {
                        warn!(%err, "could not persist repaired session");
                    }
                }
                info!(address = %session.address, "session restored");
                Some(session)
            }
            Err(Rejection::Empty) => None,
            Err(Rejection::Invalid(reason)) => {
                warn!(%reason, "discarding persisted session");
                if let Err(err) = self.clear() {
                    warn!(%err, "could not wipe persisted session");
                }
                None
            }
        }
    }

    fn read(&self) -> std::result::Result<(WalletSession, bool), Rejection> {
        let [data_key, address_key, connected_key] = self.keys();
        let get = |key: &str| {
            self.store
                .get(key)
                .map_err(|e| Rejection::Invalid(e.to_string()))
        };

        let connected = get(&connected_key)?;
        let data = get(&data_key)?;
        let address = get(&address_key)?;
        if connected.is_none() && data.is_none() && address.is_none() {
            return Err(Rejection::Empty);
        }

        if connected.as_deref() != Some("true") {
            return Err(Rejection::Invalid("connected flag is not set".to_string()));
        }
        let data = data.ok_or_else(|| Rejection::Invalid("wallet data missing".to_string()))?;
        let stored: StoredSession = serde_json::from_str(&data)
            .map_err(|e| Rejection::Invalid(format!("wallet data unreadable: {e}")))?;
        if !stored.is_connected {
            return Err(Rejection::Invalid("wallet data is not connected".to_string()));
        }
        if !is_well_formed(&stored.address) {
            return Err(Rejection::Invalid(format!(
                "malformed address {:?}",
                stored.address
            )));
        }

        let canonical = normalize(&stored.address);
        let mut healed = stored.address != canonical;
        if let Some(separate) = &address {
            if normalize(separate) != canonical {
                return Err(Rejection::Invalid(format!(
                    "address key {separate:?} disagrees with wallet data"
                )));
            }
            healed |= *separate != canonical;
        }

        let address =
            Address::parse(&canonical).map_err(|e| Rejection::Invalid(e.to_string()))?;
        let session = WalletSession {
            address,
            public_key: stored.public_key,
            is_connected: true,
        };
        Ok((session, healed))
    }

    /// Persists `session`, restoring the previous values if a write fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the store refuses a write, or
    /// [`Error::JsonError`] if the session cannot be serialized.
    pub fn save(&self, session: &WalletSession) -> Result<()> {
        let canonical = session.address.to_checksum_hex();
        let blob = serde_json::to_string(&serde_json::json!({
            "address": canonical,
            "publicKey": session.public_key,
            "isConnected": session.is_connected,
        }))?;
        let connected = if session.is_connected { "true" } else { "false" };

        let keys = self.keys();
        let previous = keys
            .iter()
            .map(|key| self.store.get(key))
            .collect::<Result<Vec<_>>>()?;

        let values = [blob.as_str(), canonical.as_str(), connected];
        for (key, value) in keys.iter().zip(values) {
            if let Err(err) = self.store.set(key, value) {
                warn!(%err, key = key.as_str(), "session write failed, rolling back");
                self.restore(&keys, &previous);
                return Err(match err {
                    Error::Persistence(_) => err,
                    other => Error::Persistence(other.to_string()),
                });
            }
        }
        Ok(())
    }

    fn restore(&self, keys: &[String], previous: &[Option<String>]) {
        for (key, value) in keys.iter().zip(previous) {
            let outcome = match value {
                Some(value) => self.store.set(key, value),
                None => self.store.remove(key),
            };
            if let Err(err) = outcome {
                warn!(%err, key = key.as_str(), "rollback incomplete");
            }
        }
    }

    /// Removes every session key. Clearing an empty store is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if a key cannot be removed.
    pub fn clear(&self) -> Result<()> {
        for key in self.keys() {
            self.store.remove(&key)?;
        }
        Ok(())
    }
}
