//! Authenticated session context
//!
//! The auth collaborator owns a [`Session`] and drives it with
//! [`Session::login`] / [`Session::logout`]. The realtime client receives a
//! clone at construction and only ever reads the current [`AuthCredential`].

use std::sync::Arc;
use tokio::sync::watch;

/// Bearer token plus authenticated flag, as supplied by the auth collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCredential {
    token: Option<String>,
    authenticated: bool,
}

impl AuthCredential {
    /// An authenticated credential carrying a bearer token
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            authenticated: true,
        }
    }

    /// The logged-out credential
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Raw token, if any
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Token to connect with. `None` unless authenticated with a non-empty token.
    pub fn usable_token(&self) -> Option<&str> {
        match self.token.as_deref() {
            Some(token) if self.authenticated && !token.trim().is_empty() => Some(token),
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.usable_token().is_some()
    }
}

/// Shared, explicitly constructed session handle
///
/// Cloning is cheap; all clones observe the same credential.
#[derive(Debug, Clone)]
pub struct Session {
    credential: Arc<watch::Sender<AuthCredential>>,
}

impl Session {
    /// Create a logged-out session
    pub fn new() -> Self {
        Self::with_credential(AuthCredential::anonymous())
    }

    /// Create a session with an initial credential
    pub fn with_credential(credential: AuthCredential) -> Self {
        let (tx, _rx) = watch::channel(credential);
        Self {
            credential: Arc::new(tx),
        }
    }

    /// Install a bearer token (login or token refresh)
    pub fn login(&self, token: impl Into<String>) {
        self.credential.send_replace(AuthCredential::bearer(token));
        tracing::debug!("Session credential installed");
    }

    /// Drop the credential (logout)
    pub fn logout(&self) {
        self.credential.send_replace(AuthCredential::anonymous());
        tracing::debug!("Session credential cleared");
    }

    /// Snapshot of the current credential
    pub fn credential(&self) -> AuthCredential {
        self.credential.borrow().clone()
    }

    /// Receiver notified on every login/logout
    pub fn subscribe(&self) -> watch::Receiver<AuthCredential> {
        self.credential.subscribe()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
