//! Session-scoped credential cache using moka
//!
//! Maps a caller session to the credentials it has logged in with, one per
//! server. The outer session map is bounded and evicts least-recently-used
//! sessions; each session holds an unbounded (in practice tiny) per-server
//! map.

use crate::server::ServerIdentity;
use dashmap::DashMap;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Default maximum number of cached sessions
pub const DEFAULT_SESSION_CAPACITY: u64 = 10_000;

/// Opaque identifier of a caller's interactive session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Principal and secret used to log into a server
///
/// The secret is never printed; `Debug` shows the principal and a short
/// fingerprint of the secret.
pub struct Credential {
    principal: String,
    secret: SecretString,
}

impl Credential {
    /// Create credential
    #[must_use]
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Login name
    #[inline]
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Secret in clear text, for handing to the backend login call only
    #[inline]
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// First 8 hex digits of the secret's SHA-256, safe to log
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.expose_secret().as_bytes());
        hex::encode(&digest[..4])
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.principal == other.principal
            && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl Eq for Credential {}

type ServerCredentials = Arc<DashMap<ServerIdentity, Arc<Credential>>>;

/// Bounded, concurrent cache of credentials per (session, server)
///
/// Constructed once per process and shared by reference with every request
/// handler. Cloning is cheap and yields a handle onto the same cache.
#[derive(Clone)]
pub struct CredentialStore {
    sessions: Cache<SessionId, ServerCredentials>,
}

impl CredentialStore {
    /// Create store bounded to `max_sessions` sessions, without expiry
    #[must_use]
    pub fn new(max_sessions: u64) -> Self {
        Self::build(max_sessions, None)
    }

    /// Create store whose session entries expire `ttl` after creation
    #[must_use]
    pub fn with_ttl(max_sessions: u64, ttl: Duration) -> Self {
        Self::build(max_sessions, Some(ttl))
    }

    fn build(max_sessions: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_sessions)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            sessions: builder.build(),
        }
    }

    /// Insert or replace the credential for `(session, server)`
    ///
    /// Creates the session entry on first login; may evict the
    /// least-recently-used session when the store is full.
    pub async fn put(&self, session: &SessionId, server: ServerIdentity, credential: Credential) {
        tracing::debug!(
            %session,
            %server,
            principal = credential.principal(),
            fingerprint = %credential.fingerprint(),
            "storing credential"
        );
        let servers = self
            .sessions
            .get_with(session.clone(), async { Arc::new(DashMap::new()) })
            .await;
        servers.insert(server, Arc::new(credential));
    }

    /// Look up the credential for `(session, server)`
    ///
    /// A miss means the caller has to authenticate; it is not an error.
    #[must_use]
    pub async fn get(&self, session: &SessionId, server: &ServerIdentity) -> Option<Arc<Credential>> {
        self.sessions
            .get(session)
            .await
            .and_then(|servers| servers.get(server).map(|entry| Arc::clone(entry.value())))
    }

    /// Drop every credential of `session` (logout). Idempotent.
    pub async fn invalidate(&self, session: &SessionId) {
        tracing::debug!(%session, "invalidating session credentials");
        self.sessions.invalidate(session).await;
    }

    /// Servers the session currently holds credentials for
    #[must_use]
    pub async fn servers_for(&self, session: &SessionId) -> Vec<ServerIdentity> {
        let mut servers: Vec<_> = self
            .sessions
            .get(session)
            .await
            .map(|m| m.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default();
        servers.sort();
        servers
    }

    /// Approximate number of cached sessions
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> u64 {
        self.sessions.entry_count()
    }

    /// Apply pending evictions and expirations
    pub async fn run_pending_tasks(&self) {
        self.sessions.run_pending_tasks().await;
    }
}

impl Default for CredentialStore {
    /// Store with default capacity (10,000 sessions)
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

impl Debug for CredentialStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("sessions", &self.sessions.entry_count())
            .finish()
    }
}
