use std::sync::Arc;

use crate::backend::memory::MemoryBackend;
use crate::backend::rest::RestBackend;
use crate::backend::DynBackend;
use crate::composer::ComposerService;
use crate::config::Config;
use crate::error::AppResult;
use crate::feed::FeedService;
use crate::identity::IdentityResolver;
use crate::messages::ConversationService;
use crate::notifications::NotificationService;
use crate::posts::PostService;
use crate::store::LocalStore;

/// Everything the command surface needs: configuration, the backend
/// port, the local store, and the identity resolver built over it.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub backend: DynBackend,
    pub store: LocalStore,
    pub identity: IdentityResolver,
}

impl AppState {
    pub fn new(config: Config, backend: DynBackend, store: LocalStore) -> Self {
        let identity = IdentityResolver::new(store.clone());
        Self {
            config,
            backend,
            store,
            identity,
        }
    }

    /// Wire up against the hosted service, or the in-memory backend in
    /// offline mode.
    pub fn connect(config: Config, offline: bool) -> AppResult<Self> {
        let backend: DynBackend = if offline {
            Arc::new(MemoryBackend::new())
        } else {
            Arc::new(RestBackend::new(
                &config.backend.url,
                &config.backend.api_key,
                config.backend.access_token.clone(),
            )?)
        };
        let store = LocalStore::open(config.db_path());
        Ok(Self::new(config, backend, store))
    }

    pub fn feed(&self) -> FeedService {
        FeedService::new(self.backend.clone())
    }

    pub fn composer(&self) -> ComposerService {
        ComposerService::new(
            self.backend.clone(),
            self.store.clone(),
            self.identity.clone(),
        )
    }

    pub fn posts(&self) -> PostService {
        PostService::new(
            self.backend.clone(),
            self.store.clone(),
            self.identity.clone(),
        )
    }

    pub fn conversations(&self) -> ConversationService {
        ConversationService::new(
            self.backend.clone(),
            self.store.clone(),
            self.identity.clone(),
        )
    }

    pub fn notifications(&self) -> NotificationService {
        NotificationService::new(self.backend.clone(), self.identity.clone())
    }
}
