//! Pages waiting for the user's extension list

use crate::FileInfo;
use std::collections::HashMap;
use std::sync::Mutex;

/// Identifies a user within a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: i64,
    pub user_id: u64,
}

impl SessionKey {
    pub fn new(chat_id: i64, user_id: u64) -> Self {
        Self { chat_id, user_id }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

/// One pending page per key; a newer page replaces the older one.
/// Entries never expire.
#[derive(Debug, Default)]
pub struct SessionStore {
    pending: Mutex<HashMap<SessionKey, FileInfo>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SessionKey) -> Option<FileInfo> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: SessionKey, page: FileInfo) {
        self.lock().insert(key, page);
    }

    pub fn remove(&self, key: &SessionKey) -> Option<FileInfo> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, FileInfo>> {
        // The map stays consistent even if a holder panicked
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(origin: &str) -> FileInfo {
        FileInfo {
            filename: "123456.html".to_string(),
            origin: Some(origin.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_one_pending_page_per_key() {
        let store = SessionStore::new();
        let key = SessionKey::new(-100, 7);

        store.put(key, page("https://a.com"));
        store.put(key, page("https://b.com"));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(&key).and_then(|p| p.origin),
            Some("https://b.com".to_string())
        );
    }

    #[test]
    fn test_remove_consumes() {
        let store = SessionStore::new();
        let key = SessionKey::new(1, 1);
        store.put(key, page("https://a.com"));

        assert!(store.remove(&key).is_some());
        assert!(store.remove(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_are_per_user_and_chat() {
        let store = SessionStore::new();
        store.put(SessionKey::new(1, 1), page("https://a.com"));
        assert!(store.get(&SessionKey::new(1, 2)).is_none());
        assert!(store.get(&SessionKey::new(2, 1)).is_none());
        assert_eq!(SessionKey::new(1, 2).to_string(), "1:2");
    }
}
