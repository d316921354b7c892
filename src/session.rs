//! Session persistence for the handshake: request/access tokens, the connected user
//! and the last consumed verifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Configuration, Token};

/// Key/value section of the host application's session.
///
/// Implementations only need to persist strings; one section is used per
/// application and consumer key (see [`SessionStorage::section_name`]).
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String);

    fn clear(&self, key: &str);

    fn clear_all(&self);
}

/// Recognized session entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    RequestToken,
    RequestTokenSecret,
    AccessToken,
    AccessTokenSecret,
    UserId,
    Verifier,
    Token,
}

impl SessionKey {
    pub const ALL: [SessionKey; 7] = [
        SessionKey::RequestToken,
        SessionKey::RequestTokenSecret,
        SessionKey::AccessToken,
        SessionKey::AccessTokenSecret,
        SessionKey::UserId,
        SessionKey::Verifier,
        SessionKey::Token,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            SessionKey::RequestToken => "request_token",
            SessionKey::RequestTokenSecret => "request_token_secret",
            SessionKey::AccessToken => "access_token",
            SessionKey::AccessTokenSecret => "access_token_secret",
            SessionKey::UserId => "user_id",
            SessionKey::Verifier => "verifier",
            SessionKey::Token => "token",
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-process [`SessionStore`] for tests, CLIs and single-user hosts.
#[derive(Clone, Debug, Default)]
pub struct MemorySession(Arc<RwLock<HashMap<String, String>>>);

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

impl SessionStore for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.0.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.0.write().insert(key.to_string(), value);
    }

    fn clear(&self, key: &str) {
        self.0.write().remove(key);
    }

    fn clear_all(&self) {
        self.0.write().clear();
    }
}

/// Typed view over a [`SessionStore`] section.
#[derive(Clone)]
pub struct SessionStorage {
    store: Arc<dyn SessionStore>,
}

impl SessionStorage {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        SessionStorage { store }
    }

    /// Name of the session section the host should back this storage with.
    pub fn section_name(config: &Configuration) -> String {
        format!("Flickr/{}", config.consumer_key)
    }

    pub fn get(&self, key: SessionKey) -> Option<String> {
        self.store.get(key.as_str())
    }

    pub fn get_or(&self, key: SessionKey, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set(&self, key: SessionKey, value: impl Into<String>) {
        self.store.set(key.as_str(), value.into());
    }

    pub fn clear(&self, key: SessionKey) {
        self.store.clear(key.as_str());
    }

    pub fn clear_all(&self) {
        self.store.clear_all();
    }

    pub fn request_token(&self) -> Option<Token> {
        self.token_pair(SessionKey::RequestToken, SessionKey::RequestTokenSecret)
    }

    pub fn set_request_token(&self, token: &Token) {
        self.set(SessionKey::RequestToken, token.token.as_str());
        self.set(SessionKey::RequestTokenSecret, token.secret.as_str());
    }

    pub fn access_token(&self) -> Option<Token> {
        self.token_pair(SessionKey::AccessToken, SessionKey::AccessTokenSecret)
    }

    pub fn set_access_token(&self, token: &Token) {
        self.set(SessionKey::AccessToken, token.token.as_str());
        self.set(SessionKey::AccessTokenSecret, token.secret.as_str());
    }

    pub fn user_id(&self) -> Option<String> {
        self.get(SessionKey::UserId).filter(|id| !id.is_empty())
    }

    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.set(SessionKey::UserId, user_id);
    }

    /// The `(verifier, token)` pair of the last successful access-token exchange.
    pub fn consumed_verifier(&self) -> Option<(String, String)> {
        Some((self.get(SessionKey::Verifier)?, self.get(SessionKey::Token)?))
    }

    pub fn set_consumed_verifier(&self, verifier: &str, token: &str) {
        self.set(SessionKey::Verifier, verifier);
        self.set(SessionKey::Token, token);
    }

    fn token_pair(&self, token: SessionKey, secret: SessionKey) -> Option<Token> {
        match (self.get(token), self.get(secret)) {
            (Some(t), Some(s)) if !t.is_empty() => Some(Token::new(t, s)),
            _ => None,
        }
    }
}

impl fmt::Debug for SessionStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStorage")
            .field("access_token_set", &self.get(SessionKey::AccessToken).is_some())
            .field("request_token_set", &self.get(SessionKey::RequestToken).is_some())
            .finish()
    }
}
