//! Request-level facade
//!
//! [`DepotBridge`] ties the pieces together for callers that only know
//! locators and sessions: login stores a credential, reads and writes look it
//! up, connect, and hand over to the read path or the submit coordinator.

use crate::backend::{ByteStream, DepotConnection, DepotServer};
use crate::config::BridgeConfig;
use crate::connector::BackendConnector;
use crate::credentials::{Credential, CredentialStore, SessionId};
use crate::error::BridgeError;
use crate::locator::Locator;
use crate::progress::ProgressSink;
use crate::read;
use crate::server::ServerIdentity;
use crate::submit::{SubmitCoordinator, SubmitOutcome};
use std::io;
use std::sync::Arc;

/// Read/write access to depot files by locator, per caller session
#[derive(Debug, Clone)]
pub struct DepotBridge {
    credentials: Arc<CredentialStore>,
    connector: BackendConnector,
    submitter: SubmitCoordinator,
    default_overwrite: bool,
}

impl DepotBridge {
    /// Create bridge with a credential store sized from `config`
    ///
    /// # Errors
    /// `Config` if `config` does not validate
    pub fn new(server: Arc<dyn DepotServer>, config: &BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let credentials = match config.credential_ttl() {
            Some(ttl) => CredentialStore::with_ttl(config.credential_capacity, ttl),
            None => CredentialStore::new(config.credential_capacity),
        };
        Ok(Self::with_credentials(server, Arc::new(credentials), config))
    }

    /// Create bridge sharing an existing credential store
    #[must_use]
    pub fn with_credentials(
        server: Arc<dyn DepotServer>,
        credentials: Arc<CredentialStore>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            credentials,
            connector: BackendConnector::new(server).with_trust_policy(config.trust_policy),
            submitter: SubmitCoordinator::from_config(config),
            default_overwrite: config.default_overwrite,
        }
    }

    /// With progress sink for every backend connection
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.connector = self.connector.with_progress(progress);
        self
    }

    /// Credential store backing this bridge
    #[inline]
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Remember `principal`/`secret` for `server_locator` in `session`
    ///
    /// Nothing is sent to the server here; a wrong secret surfaces as
    /// `AuthenticationFailed` on the next read or write.
    ///
    /// # Errors
    /// `MalformedLocator` if `server_locator` does not name a server
    pub async fn login(
        &self,
        session: &SessionId,
        server_locator: &str,
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<ServerIdentity, BridgeError> {
        let server = ServerIdentity::from_locator(server_locator)?;
        let credential = Credential::new(principal, secret);
        tracing::info!(
            %session,
            %server,
            principal = credential.principal(),
            fingerprint = %credential.fingerprint(),
            "storing credential"
        );
        self.credentials.put(session, server.clone(), credential).await;
        Ok(server)
    }

    /// Forget every credential of `session`
    pub async fn logout(&self, session: &SessionId) {
        tracing::info!(%session, "dropping session credentials");
        self.credentials.invalidate(session).await;
    }

    /// Stream the head revision named by `locator`
    ///
    /// # Errors
    /// `AuthenticationRequired` if the session has no credential for the
    /// server, otherwise as [`read::read`] and [`BackendConnector::connect`]
    pub async fn read(&self, session: &SessionId, locator: &str) -> Result<ByteStream, BridgeError> {
        let parsed = Locator::parse(locator)?;
        let connection = self.connect(session, locator, &parsed).await?;
        read::read(connection.as_ref(), parsed.path()).await
    }

    /// Write `content` as the new head revision, with the configured
    /// overwrite policy
    ///
    /// # Errors
    /// As [`DepotBridge::write_with_policy`]
    pub async fn write(
        &self,
        session: &SessionId,
        locator: &str,
        content: &[u8],
    ) -> Result<SubmitOutcome, BridgeError> {
        self.write_with_policy(session, locator, content, self.default_overwrite)
            .await
    }

    /// Write `content`, replacing a live head revision only if
    /// `overwrite_allowed`
    ///
    /// # Errors
    /// `AuthenticationRequired` if the session has no credential for the
    /// server, otherwise as [`SubmitCoordinator::submit`]
    pub async fn write_with_policy(
        &self,
        session: &SessionId,
        locator: &str,
        content: &[u8],
        overwrite_allowed: bool,
    ) -> Result<SubmitOutcome, BridgeError> {
        let parsed = Locator::parse(locator)?;
        let connection = self.connect(session, locator, &parsed).await?;
        self.submitter
            .submit(connection.as_ref(), parsed.path(), content, overwrite_allowed)
            .await
    }

    /// Buffering writer whose [`ResourceWriter::close`] submits the bytes
    ///
    /// # Errors
    /// `MalformedLocator` if `locator` cannot be parsed
    pub fn writer(&self, session: &SessionId, locator: &str) -> Result<ResourceWriter, BridgeError> {
        Locator::parse(locator)?;
        Ok(ResourceWriter {
            bridge: self.clone(),
            session: session.clone(),
            locator: locator.to_string(),
            overwrite_allowed: self.default_overwrite,
            buffer: Vec::new(),
        })
    }

    async fn connect(
        &self,
        session: &SessionId,
        locator: &str,
        parsed: &Locator,
    ) -> Result<Box<dyn DepotConnection>, BridgeError> {
        let server = parsed.server();
        let Some(credential) = self.credentials.get(session, server).await else {
            tracing::debug!(%session, %server, "no credential cached");
            return Err(BridgeError::AuthenticationRequired {
                locator: locator.to_string(),
                server: server.clone(),
            });
        };
        self.connector.connect(server, &credential).await
    }
}

/// Collects bytes for one depot file and submits them on close
///
/// Dropping the writer without closing it discards the bytes.
#[derive(Debug)]
pub struct ResourceWriter {
    bridge: DepotBridge,
    session: SessionId,
    locator: String,
    overwrite_allowed: bool,
    buffer: Vec<u8>,
}

impl ResourceWriter {
    /// Override the bridge's default overwrite policy
    #[inline]
    #[must_use]
    pub fn overwrite_allowed(mut self, allowed: bool) -> Self {
        self.overwrite_allowed = allowed;
        self
    }

    /// Bytes buffered so far
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Submit the buffered bytes
    ///
    /// # Errors
    /// As [`DepotBridge::write_with_policy`]
    pub async fn close(self) -> Result<SubmitOutcome, BridgeError> {
        self.bridge
            .write_with_policy(
                &self.session,
                &self.locator,
                &self.buffer,
                self.overwrite_allowed,
            )
            .await
    }
}

impl io::Write for ResourceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
