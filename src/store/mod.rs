pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Raw device-local persistence: string keys to JSON string values.
/// Implementations are injected so tests and degraded modes can swap
/// the mechanism without touching callers.
pub trait StorePort: Send + Sync {
    fn get_raw(&self, key: &str) -> AppResult<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

pub mod keys {
    pub const ANONYMOUS_ID: &str = "anonymous_id";
    pub const ANONYMOUS_PROFILE: &str = "anonymous_profile";
    pub const OWNED_POSTS: &str = "owned_posts";
    pub const PREFERENCES: &str = "preferences";
    pub const DRAFT_POST: &str = "draft_post";
    pub const EDIT_INTENT: &str = "edit_intent";
    pub const ANON_CONVERSATIONS: &str = "anonymous_conversations";
}

/// Reference to a listing created from this device, kept so my-posts
/// and edit/delete work for anonymous owners without any server-side
/// account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedPostRef {
    pub id: String,
    pub title: String,
    pub owner_key: String,
    pub created_at: DateTime<Utc>,
}

/// Cached intent to edit one listing, written when the owner opens the
/// editor and checked again before the update is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditIntent {
    pub post_id: String,
    pub owner_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub theme: String,
    pub notifications: bool,
    pub default_category: String,
    pub default_location: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "light".to_string(),
            notifications: true,
            default_category: String::new(),
            default_location: String::new(),
        }
    }
}

/// Typed facade over a [`StorePort`]. Cloneable; all clones share the
/// underlying store.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<dyn StorePort>,
}

impl LocalStore {
    pub fn new(inner: Arc<dyn StorePort>) -> Self {
        Self { inner }
    }

    /// Open the on-disk store, falling back to an in-memory store when
    /// the database cannot be opened. The fallback loses state on exit
    /// (degraded mode), so it is warned about, not treated as an error.
    pub fn open(db_path: &Path) -> Self {
        match SqliteStore::open(db_path) {
            Ok(store) => Self::new(Arc::new(store)),
            Err(e) => {
                tracing::warn!(
                    "Local store unavailable at {} ({}); state will not persist",
                    db_path.display(),
                    e
                );
                Self::new(Arc::new(MemoryStore::new()))
            }
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.inner.get_raw(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        self.inner.set_raw(key, &serde_json::to_string(value)?)
    }

    pub fn remove(&self, key: &str) -> AppResult<()> {
        self.inner.remove(key)
    }

    // Anonymous identity

    pub fn anonymous_id(&self) -> AppResult<Option<String>> {
        self.get(keys::ANONYMOUS_ID)
    }

    pub fn set_anonymous_id(&self, id: &str) -> AppResult<()> {
        self.set(keys::ANONYMOUS_ID, &id)
    }

    // Owned posts

    pub fn owned_posts(&self) -> AppResult<Vec<OwnedPostRef>> {
        Ok(self.get(keys::OWNED_POSTS)?.unwrap_or_default())
    }

    pub fn add_owned_post(&self, post: OwnedPostRef) -> AppResult<Vec<OwnedPostRef>> {
        let mut posts = self.owned_posts()?;
        posts.push(post);
        self.set(keys::OWNED_POSTS, &posts)?;
        Ok(posts)
    }

    pub fn update_owned_post(&self, id: &str, title: &str) -> AppResult<Vec<OwnedPostRef>> {
        let mut posts = self.owned_posts()?;
        if let Some(entry) = posts.iter_mut().find(|p| p.id == id) {
            entry.title = title.to_string();
            self.set(keys::OWNED_POSTS, &posts)?;
        }
        Ok(posts)
    }

    pub fn remove_owned_post(&self, id: &str) -> AppResult<Vec<OwnedPostRef>> {
        let mut posts = self.owned_posts()?;
        posts.retain(|p| p.id != id);
        self.set(keys::OWNED_POSTS, &posts)?;
        Ok(posts)
    }

    // Preferences

    pub fn preferences(&self) -> AppResult<Preferences> {
        Ok(self.get(keys::PREFERENCES)?.unwrap_or_default())
    }

    pub fn set_preferences(&self, prefs: &Preferences) -> AppResult<()> {
        self.set(keys::PREFERENCES, prefs)
    }

    // Conversations started while anonymous

    pub fn anonymous_conversations(&self) -> AppResult<Vec<String>> {
        Ok(self.get(keys::ANON_CONVERSATIONS)?.unwrap_or_default())
    }

    pub fn track_conversation(&self, id: &str) -> AppResult<()> {
        let mut ids = self.anonymous_conversations()?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.set(keys::ANON_CONVERSATIONS, &ids)?;
        }
        Ok(())
    }

    // Edit intent

    pub fn edit_intent(&self) -> AppResult<Option<EditIntent>> {
        self.get(keys::EDIT_INTENT)
    }

    pub fn set_edit_intent(&self, intent: &EditIntent) -> AppResult<()> {
        self.set(keys::EDIT_INTENT, intent)
    }

    pub fn clear_edit_intent(&self) -> AppResult<()> {
        self.remove(keys::EDIT_INTENT)
    }
}
