use super::{StageStorage, StageStoreError, DEFAULT_QUOTA_BYTES};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory stage storage scoped to one session.
///
/// Quota is accounted on the encoded text length of all stored values.
pub struct MemoryStorage {
    quota_bytes: usize,
    entries: Mutex<HashMap<String, String>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }
}

impl MemoryStorage {
    pub fn with_quota(quota_bytes: usize) -> Self {
        MemoryStorage {
            quota_bytes,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().values().map(String::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StageStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StageStoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StageStoreError> {
        let mut entries = self.lock();
        let used_by_others: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(_, v)| v.len())
            .sum();
        let available = self.quota_bytes.saturating_sub(used_by_others);

        if value.len() > available {
            return Err(StageStoreError::QuotaExceeded {
                requested: value.len(),
                available,
            });
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StageStoreError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_rejects_without_touching_slot() {
        let storage = MemoryStorage::with_quota(10);
        storage.put("a", "12345").await.unwrap();

        let err = storage.put("a", "12345678901").await.unwrap_err();
        assert!(matches!(
            err,
            StageStoreError::QuotaExceeded { requested: 11, available: 10 }
        ));
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_replacing_a_value_reuses_its_space() {
        let storage = MemoryStorage::with_quota(10);
        storage.put("a", "123456").await.unwrap();
        storage.put("b", "1234").await.unwrap();
        assert!(storage.put("c", "1").await.is_err());

        storage.put("a", "12").await.unwrap();
        storage.put("c", "1234").await.unwrap();
        assert_eq!(storage.used_bytes(), 10);
    }
}
