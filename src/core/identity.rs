//! Session identity supplied by the authentication layer
//!
//! The channel never authenticates on its own. An [`IdentityProvider`] hands
//! it the subject id and token for the current session; when none is
//! available the channel simply does not connect.

use crate::core::error::TransportError;
use std::fmt;
use url::Url;

/// Identity used for one connection attempt
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    subject_id: String,
    token: String,
}

impl SessionIdentity {
    pub fn new(subject_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            token: token.into(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Build the connection target: `{endpoint}/{subject_id}?token={token}`
    pub fn connection_url(&self, endpoint: &Url) -> Result<Url, TransportError> {
        let mut url = endpoint.clone();

        url.path_segments_mut()
            .map_err(|()| TransportError::InvalidEndpoint(endpoint.to_string()))?
            .pop_if_empty()
            .push(&self.subject_id);

        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }
}

// Keep tokens out of logs
impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("subject_id", &self.subject_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Source of the current session identity
pub trait IdentityProvider: Send + Sync {
    /// The identity for the current session, or `None` when signed out
    fn current_identity(&self) -> Option<SessionIdentity>;
}

/// Provider that never has an identity
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentityProvider;

impl IdentityProvider for NoIdentityProvider {
    fn current_identity(&self) -> Option<SessionIdentity> {
        None
    }
}

/// Provider holding a fixed identity
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
    identity: SessionIdentity,
}

impl StaticIdentityProvider {
    pub fn new(identity: SessionIdentity) -> Self {
        Self { identity }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_identity(&self) -> Option<SessionIdentity> {
        Some(self.identity.clone())
    }
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<SessionIdentity> + Send + Sync,
{
    fn current_identity(&self) -> Option<SessionIdentity> {
        self()
    }
}
