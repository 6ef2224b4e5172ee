use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::jwt::{SubjectId, decode_claims};
use crate::token_store::{ListenerId, TokenStore, TokenStoreError};

/// Tokens expiring within this window are refreshed at startup.
pub const REFRESH_LEEWAY_MS: i64 = 30_000;
pub const LOGIN_PATH: &str = "/login";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub is_authenticated: bool,
    pub full_name: Option<String>,
}

/// Refresh-token exchange as seen from the session layer.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn try_refresh(&self, subject: Option<&SubjectId>) -> bool;
}

/// Hard reset to the login surface.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, path: &str);
}

/// What startup decided, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInit {
    NoToken,
    UndecodableToken,
    Valid,
    Refreshed,
    RefreshFailed,
}

/// Reactive "am I logged in" view over a [`TokenStore`].
///
/// Store change notifications recompute the state directly from the stored
/// slots; decoding and proactive refresh only happen in [`Self::initialize`].
pub struct SessionContext {
    store: Arc<TokenStore>,
    state: Arc<Mutex<SessionState>>,
    listener: ListenerId,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn new(store: Arc<TokenStore>) -> Self {
        let state = Arc::new(Mutex::new(SessionState::default()));
        let sink = Arc::clone(&state);
        let listener = store.subscribe(move |change| {
            let mut state = lock(&sink);
            state.is_authenticated = change.session.access_token.is_some();
            state.full_name = change.session.full_name.clone();
        });
        Self {
            store,
            state,
            listener,
        }
    }

    pub async fn initialize(&self, refresher: &dyn SessionRefresher) -> SessionInit {
        self.initialize_at(refresher, Utc::now()).await
    }

    pub async fn initialize_at(
        &self,
        refresher: &dyn SessionRefresher,
        now: DateTime<Utc>,
    ) -> SessionInit {
        let Some(token) = self.store.access_token() else {
            self.set_authenticated(false);
            return SessionInit::NoToken;
        };

        let Some(claims) = decode_claims(&token) else {
            self.set_authenticated(self.store.access_token().is_some());
            tracing::debug!("Stored access token is not decodable; keeping session as-is");
            return SessionInit::UndecodableToken;
        };

        let expiring = match claims.exp() {
            Some(exp) => exp.saturating_mul(1_000) <= now.timestamp_millis() + REFRESH_LEEWAY_MS,
            None => true,
        };

        if !expiring {
            let mut state = lock(&self.state);
            state.is_authenticated = true;
            state.full_name = self.store.full_name();
            return SessionInit::Valid;
        }

        let subject = claims.subject();
        tracing::info!(has_subject = subject.is_some(), "Access token near expiry; refreshing");
        if refresher.try_refresh(subject.as_ref()).await {
            self.set_authenticated(self.store.access_token().is_some());
            return SessionInit::Refreshed;
        }

        if let Err(error) = self.store.clear_tokens() {
            tracing::warn!(error = %error, "Failed to clear tokens after rejected refresh");
        }
        self.set_authenticated(false);
        SessionInit::RefreshFailed
    }

    /// Clears tokens, forces the unauthenticated state and hands off to the
    /// login surface. The redirect happens even if the store write fails.
    pub fn logout(&self, redirect: &dyn LoginRedirect) -> Result<(), TokenStoreError> {
        let cleared = self.store.clear_tokens();
        self.set_authenticated(false);
        redirect.redirect_to_login(LOGIN_PATH);
        cleared
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        lock(&self.state).is_authenticated
    }

    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        lock(&self.state).full_name.clone()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    fn set_authenticated(&self, authenticated: bool) {
        lock(&self.state).is_authenticated = authenticated;
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.store.unsubscribe(self.listener);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
