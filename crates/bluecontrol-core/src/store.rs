//! Persistence of the last connected device address.
//!
//! The session calls [`AddressStore::save`] once per successful link-up.
//! Reading the address back is left to the embedding application.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

/// Key under which the device address is saved by default.
pub const DEFAULT_ADDRESS_KEY: &str = "bluetooth_device_address";

/// A single-call key/value sink for the connected device address.
pub trait AddressStore: Send + Sync {
    /// Persist `value` under `key`.
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    entries: Mutex<HashMap<String, String>>,
    writes: Mutex<u32>,
}

impl MemoryAddressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a saved value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of `save` calls so far.
    pub fn write_count(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AddressStore for MemoryAddressStore {
    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        *self.writes.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_save_and_get() {
        let store = MemoryAddressStore::new();
        assert_eq!(store.get(DEFAULT_ADDRESS_KEY), None);

        store.save(DEFAULT_ADDRESS_KEY, "AA:BB:CC:DD:EE:FF").unwrap();
        store.save(DEFAULT_ADDRESS_KEY, "11:22:33:44:55:66").unwrap();

        assert_eq!(
            store.get(DEFAULT_ADDRESS_KEY).as_deref(),
            Some("11:22:33:44:55:66")
        );
        assert_eq!(store.write_count(), 2);
    }
}
