use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::AppResult;
use crate::store::{keys, LocalStore};

/// The viewer's identity: an authenticated user id XOR a device-local
/// anonymous token, never both. This is the comparison key against
/// participant, sender, and owner columns everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(String),
    Anonymous(String),
}

impl Identity {
    pub fn key(&self) -> &str {
        match self {
            Identity::User(id) => id,
            Identity::Anonymous(id) => id,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous(_))
    }
}

/// Device-local pseudo-profile for unauthenticated use. Never stored
/// centrally; lives and dies with the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousProfile {
    pub anonymous_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: LocalStore,
}

impl IdentityResolver {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Stable per-device token, generated once and persisted. Not
    /// unique across devices; collisions are tolerated in this domain.
    pub fn get_or_create_anonymous_id(&self) -> AppResult<String> {
        if let Some(id) = self.store.anonymous_id()? {
            return Ok(id);
        }
        let id = generate_anonymous_id();
        self.store.set_anonymous_id(&id)?;
        Ok(id)
    }

    /// Authenticated user id when a session exists, anonymous token
    /// otherwise.
    pub async fn resolve_viewer(&self, backend: &dyn Backend) -> AppResult<Identity> {
        match backend.current_user().await? {
            Some(user) => Ok(Identity::User(user.id)),
            None => Ok(Identity::Anonymous(self.get_or_create_anonymous_id()?)),
        }
    }

    /// Read the anonymous profile, creating it lazily on first read.
    pub fn profile(&self) -> AppResult<AnonymousProfile> {
        if let Some(profile) = self.store.get(keys::ANONYMOUS_PROFILE)? {
            return Ok(profile);
        }
        let now = Utc::now();
        let profile = AnonymousProfile {
            anonymous_id: self.get_or_create_anonymous_id()?,
            display_name: None,
            created_at: now,
            updated_at: now,
        };
        self.store.set(keys::ANONYMOUS_PROFILE, &profile)?;
        Ok(profile)
    }

    pub fn set_display_name(&self, name: &str) -> AppResult<AnonymousProfile> {
        let mut profile = self.profile()?;
        let trimmed = name.trim();
        profile.display_name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        profile.updated_at = Utc::now();
        self.store.set(keys::ANONYMOUS_PROFILE, &profile)?;
        Ok(profile)
    }

    /// Display label for the viewer when posting comments or messages.
    pub fn display_label(&self, viewer: &Identity) -> AppResult<String> {
        match viewer {
            Identity::User(id) => Ok(id.clone()),
            Identity::Anonymous(_) => Ok(self
                .profile()?
                .display_name
                .unwrap_or_else(|| "Anonymous".to_string())),
        }
    }
}

fn generate_anonymous_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..10)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("anon-{}-{}", Utc::now().timestamp(), suffix)
}
