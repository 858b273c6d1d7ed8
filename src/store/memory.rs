use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::AppResult;
use crate::store::StorePort;

/// In-memory fallback used when the on-disk store cannot be opened.
/// State lasts for the life of the process only; anonymous identity
/// regenerates on the next run.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorePort for MemoryStore {
    fn get_raw(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &str) -> AppResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_raw("k").unwrap(), None);
        store.set_raw("k", "v").unwrap();
        assert_eq!(store.get_raw("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get_raw("k").unwrap(), None);
    }

    #[test]
    fn clear_drops_everything() {
        let store = MemoryStore::new();
        store.set_raw("a", "1").unwrap();
        store.set_raw("b", "2").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get_raw("a").unwrap(), None);
        assert_eq!(store.get_raw("b").unwrap(), None);
    }
}
