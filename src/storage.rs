use std::collections::HashMap;

use crate::key::Key;

/// The local store of content-addressed values.
///
/// Populated by inbound store requests and by locally initiated stores.
/// Entries live for the lifetime of the node; keys are content hashes, so a
/// collision rewrites the same bytes and last-write-wins is acceptable.
#[derive(Default)]
pub struct Storage {
    data: HashMap<Key, Vec<u8>>,
}

impl Storage {
    /// Constructs an empty store.
    pub fn new() -> Self {
        Storage {
            data: HashMap::new(),
        }
    }

    /// Inserts a value under `key`.
    pub fn insert(&mut self, key: Key, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    /// Returns the value stored under `key`, if any.
    pub fn get(&self, key: &Key) -> Option<&Vec<u8>> {
        self.data.get(key)
    }
}
