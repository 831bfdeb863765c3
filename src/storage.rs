//! Persisted Flags
//!
//! Boolean client-side state that survives reloads.

use std::cell::RefCell;
use std::collections::HashMap;

/// Set when the user disconnected on purpose; suppresses silent reconnect
pub const EXPLICIT_DISCONNECT_KEY: &str = "crowdfund.explicitDisconnect";

pub trait FlagStore {
    fn get(&self, key: &str) -> bool;
    fn set(&self, key: &str, value: bool);
}

/// `window.localStorage` backed flags
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorageFlags;

impl LocalStorageFlags {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window().and_then(|w| w.local_storage().ok().flatten())
    }
}

impl FlagStore for LocalStorageFlags {
    fn get(&self, key: &str) -> bool {
        Self::storage()
            .and_then(|s| s.get_item(key).ok().flatten())
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    fn set(&self, key: &str, value: bool) {
        let Some(storage) = Self::storage() else {
            log::warn!("[FLAGS] localStorage unavailable, '{}' not persisted", key);
            return;
        };
        let result = if value {
            storage.set_item(key, "true")
        } else {
            storage.remove_item(key)
        };
        if let Err(e) = result {
            log::warn!("[FLAGS] Failed to write '{}': {:?}", key, e);
        }
    }
}

/// In-memory flags for tests and headless use
#[derive(Debug, Default)]
pub struct MemoryFlags {
    values: RefCell<HashMap<String, bool>>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlags {
    fn get(&self, key: &str) -> bool {
        self.values.borrow().get(key).copied().unwrap_or(false)
    }

    fn set(&self, key: &str, value: bool) {
        self.values.borrow_mut().insert(key.to_string(), value);
    }
}
