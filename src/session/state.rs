//! Session State Holder
//!
//! The four persisted values of a signed-in session, behind a small
//! key/value storage seam. All reads and writes go through [`SessionStore`],
//! which serializes them so a token pair is never observed half-written.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::error::SessionError;
use crate::wire::AuthResponse;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const ACCOUNT_NUMBER_KEY: &str = "accountNumber";
pub const USER_NAME_KEY: &str = "userName";

const SESSION_KEYS: [&str; 4] = [
    ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    ACCOUNT_NUMBER_KEY,
    USER_NAME_KEY,
];

/// Durable string storage the session lives in
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> SessionError {
    SessionError::Storage("storage lock poisoned".to_string())
}

/// Process-local storage; the session is gone when the process exits
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object on disk, so a session survives
/// restarts of the client
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<HashMap<String, String>, SessionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// A signed-in session as persisted on the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub account_number: Option<String>,
    pub user_name: Option<String>,
}

impl From<AuthResponse> for Session {
    fn from(response: AuthResponse) -> Self {
        Session {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            account_number: response.account_number,
            user_name: response.user_name,
        }
    }
}

/// Serialized access to the persisted session
pub struct SessionStore {
    backend: Arc<dyn KeyValueStorage>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, SessionError> {
        self.write_lock.lock().map_err(poisoned)
    }

    /// The stored session, or `None` unless both tokens are present
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        let _guard = self.lock()?;

        let access_token = self.backend.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.backend.get(REFRESH_TOKEN_KEY)?;

        match (access_token, refresh_token) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(Session {
                access_token,
                refresh_token,
                account_number: self.backend.get(ACCOUNT_NUMBER_KEY)?,
                user_name: self.backend.get(USER_NAME_KEY)?,
            })),
            _ => Ok(None),
        }
    }

    pub fn access_token(&self) -> Result<Option<String>, SessionError> {
        let _guard = self.lock()?;
        self.backend.get(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, SessionError> {
        let _guard = self.lock()?;
        self.backend.get(REFRESH_TOKEN_KEY)
    }

    /// Replaces the whole session; identity fields missing from `session`
    /// are removed rather than left over from a previous user
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        let _guard = self.lock()?;

        self.backend.set(ACCESS_TOKEN_KEY, &session.access_token)?;
        self.backend.set(REFRESH_TOKEN_KEY, &session.refresh_token)?;
        match &session.account_number {
            Some(value) => self.backend.set(ACCOUNT_NUMBER_KEY, value)?,
            None => self.backend.remove(ACCOUNT_NUMBER_KEY)?,
        }
        match &session.user_name {
            Some(value) => self.backend.set(USER_NAME_KEY, value)?,
            None => self.backend.remove(USER_NAME_KEY)?,
        }
        Ok(())
    }

    /// Stores a rotated token pair, but only if the refresh token that was
    /// sent to the server is still the stored one. Returns `false` when the
    /// session was cleared or replaced in the meantime.
    pub fn replace_tokens_if(
        &self,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, SessionError> {
        let _guard = self.lock()?;

        let current = self.backend.get(REFRESH_TOKEN_KEY)?;
        if current.as_deref() != Some(expected_refresh_token) {
            return Ok(false);
        }

        self.backend.set(ACCESS_TOKEN_KEY, access_token)?;
        self.backend.set(REFRESH_TOKEN_KEY, refresh_token)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        let _guard = self.lock()?;
        for key in SESSION_KEYS {
            self.backend.remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        Session {
            access_token: "access-1".to_string(),
            refresh_token: "refresh-1".to_string(),
            account_number: Some("VA12345678901".to_string()),
            user_name: Some("Kim".to_string()),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = SessionStore::in_memory();
        assert_eq!(store.load().unwrap(), None);

        store.save(&sample()).unwrap();

        assert_eq!(store.load().unwrap(), Some(sample()));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("access-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_load_requires_both_tokens() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set(ACCESS_TOKEN_KEY, "access-only").unwrap();
        let store = SessionStore::new(backend);

        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_clear_removes_every_key() {
        let backend = Arc::new(MemoryStorage::new());
        let store = SessionStore::new(backend.clone());
        store.save(&sample()).unwrap();

        store.clear().unwrap();

        for key in SESSION_KEYS {
            assert_eq!(backend.get(key).unwrap(), None, "{} left behind", key);
        }
    }

    #[test]
    fn test_replace_tokens_if_matches() {
        let store = SessionStore::in_memory();
        store.save(&sample()).unwrap();

        assert!(store
            .replace_tokens_if("refresh-1", "access-2", "refresh-2")
            .unwrap());

        let session = store.load().unwrap().unwrap();
        assert_eq!(session.access_token, "access-2");
        assert_eq!(session.refresh_token, "refresh-2");
        assert_eq!(session.account_number, sample().account_number);
    }

    #[test]
    fn test_replace_tokens_if_session_changed() {
        let store = SessionStore::in_memory();
        store.save(&sample()).unwrap();

        assert!(!store
            .replace_tokens_if("refresh-0", "access-2", "refresh-2")
            .unwrap());
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        assert!(!store
            .replace_tokens_if("refresh-1", "access-2", "refresh-2")
            .unwrap());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_drops_stale_identity_fields() {
        let store = SessionStore::in_memory();
        store.save(&sample()).unwrap();

        let mut next = sample();
        next.account_number = None;
        store.save(&next).unwrap();

        assert_eq!(store.load().unwrap().unwrap().account_number, None);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let path = std::env::temp_dir().join(format!(
            "easypay-session-{}.json",
            uuid::Uuid::new_v4()
        ));

        {
            let store = SessionStore::new(Arc::new(FileStorage::new(&path)));
            store.save(&sample()).unwrap();
        }

        let store = SessionStore::new(Arc::new(FileStorage::new(&path)));
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("easypay-missing-{}.json", uuid::Uuid::new_v4()));
        let storage = FileStorage::new(&path);

        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }
}
