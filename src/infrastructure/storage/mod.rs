//! In-memory storage implementation

use std::collections::HashMap;
use std::sync::RwLock;

use crate::application::errors::StorageError;
use crate::domain::traits::EconomyStore;

/// Hash-per-key store kept in process memory
#[derive(Debug, Default)]
pub struct MemoryEconomyStore {
    kv: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemoryEconomyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EconomyStore for MemoryEconomyStore {
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let kv = self.kv.read()
            .map_err(|_| StorageError::Poisoned("economy store".to_string()))?;
        Ok(kv.get(key).cloned().unwrap_or_default())
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut kv = self.kv.write()
            .map_err(|_| StorageError::Poisoned("economy store".to_string()))?;
        kv.entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StorageError> {
        let mut kv = self.kv.write()
            .map_err(|_| StorageError::Poisoned("economy store".to_string()))?;
        let hash = kv.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsetnx_only_writes_once() {
        let store = MemoryEconomyStore::new();
        assert!(store.hsetnx("k", "s1", "5").unwrap());
        assert!(!store.hsetnx("k", "s1", "7").unwrap());
        store.hset("k", "s2", "1").unwrap();

        let all = store.hgetall("k").unwrap();
        assert_eq!(all.get("s1").map(String::as_str), Some("5"));
        assert_eq!(all.len(), 2);
        assert!(store.hgetall("missing").unwrap().is_empty());
    }
}
