//! Authenticated connections
//!
//! [`BackendConnector`] turns a server identity plus a cached credential into
//! a logged-in [`DepotConnection`]. Secured transports establish trust before
//! the secret is sent.

use crate::backend::{DepotConnection, DepotServer, TrustPolicy};
use crate::credentials::Credential;
use crate::error::BridgeError;
use crate::progress::{NoopProgress, ProgressSink};
use crate::server::ServerIdentity;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Opens and authenticates connections for single requests
///
/// Connections are not pooled; each read or submit gets its own.
#[derive(Clone)]
pub struct BackendConnector {
    server: Arc<dyn DepotServer>,
    trust: TrustPolicy,
    progress: Arc<dyn ProgressSink>,
}

impl BackendConnector {
    /// Create connector with accept-on-first-use trust and no progress sink
    #[must_use]
    pub fn new(server: Arc<dyn DepotServer>) -> Self {
        Self {
            server,
            trust: TrustPolicy::default(),
            progress: Arc::new(NoopProgress),
        }
    }

    /// With trust policy for secured transports
    #[inline]
    #[must_use]
    pub fn with_trust_policy(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    /// With progress sink registered on every connection
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Open a connection to `server` and log in with `credential`
    ///
    /// # Errors
    /// - `ConnectionError` if the server is unreachable or trust fails
    /// - `AuthenticationFailed` if the server rejects the credential
    pub async fn connect(
        &self,
        server: &ServerIdentity,
        credential: &Credential,
    ) -> Result<Box<dyn DepotConnection>, BridgeError> {
        let principal = credential.principal();
        tracing::debug!(%server, principal, "opening depot connection");

        let mut connection = self
            .server
            .open(server, Arc::clone(&self.progress))
            .await
            .map_err(|e| {
                tracing::error!(%server, error = %e, "cannot reach depot server");
                BridgeError::from_connect(server, principal, e)
            })?;

        if server.is_secure() {
            connection.establish_trust(self.trust).await.map_err(|e| {
                tracing::error!(%server, policy = ?self.trust, error = %e, "trust not established");
                BridgeError::ConnectionError {
                    server: server.clone(),
                    message: format!("trust not established: {}", e.message()),
                }
            })?;
        }

        connection
            .login(principal, credential.expose_secret())
            .await
            .map_err(|e| {
                tracing::warn!(%server, principal, error = %e, "login rejected");
                BridgeError::from_connect(server, principal, e)
            })?;

        tracing::info!(%server, principal, "connected");
        Ok(connection)
    }
}

impl Debug for BackendConnector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnector")
            .field("trust", &self.trust)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDepotConnection;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Hands out one prepared connection
    struct OneShot {
        connection: Mutex<Option<MockDepotConnection>>,
        open_error: Option<BackendError>,
    }

    impl OneShot {
        fn new(connection: MockDepotConnection) -> Self {
            Self {
                connection: Mutex::new(Some(connection)),
                open_error: None,
            }
        }

        fn failing(err: BackendError) -> Self {
            Self {
                connection: Mutex::new(None),
                open_error: Some(err),
            }
        }
    }

    #[async_trait]
    impl DepotServer for OneShot {
        async fn open(
            &self,
            _server: &ServerIdentity,
            _progress: Arc<dyn ProgressSink>,
        ) -> Result<Box<dyn DepotConnection>, BackendError> {
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let connection = self.connection.lock().unwrap().take().unwrap();
            Ok(Box::new(connection))
        }
    }

    fn plain() -> ServerIdentity {
        ServerIdentity::new(false, "depot", 1666)
    }

    fn secure() -> ServerIdentity {
        ServerIdentity::new(true, "depot", 1666)
    }

    #[tokio::test]
    async fn plain_connection_skips_trust() {
        let mut mock = MockDepotConnection::new();
        mock.expect_establish_trust().never();
        mock.expect_login()
            .withf(|user, secret| user.to_string() == "alice" && secret.to_string() == "pw")
            .times(1)
            .returning(|_, _| Ok(()));

        let connector = BackendConnector::new(Arc::new(OneShot::new(mock)));
        let result = connector.connect(&plain(), &Credential::new("alice", "pw")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn secure_connection_trusts_before_login() {
        let mut seq = mockall::Sequence::new();
        let mut mock = MockDepotConnection::new();
        mock.expect_establish_trust()
            .withf(|policy| *policy == TrustPolicy::AcceptOnFirstUse)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let connector = BackendConnector::new(Arc::new(OneShot::new(mock)));
        assert!(connector.connect(&secure(), &Credential::new("alice", "pw")).await.is_ok());
    }

    #[tokio::test]
    async fn untrusted_server_is_connection_error() {
        let mut mock = MockDepotConnection::new();
        mock.expect_establish_trust()
            .returning(|_| Err(BackendError::Connection("fingerprint unknown".into())));
        mock.expect_login().never();

        let connector = BackendConnector::new(Arc::new(OneShot::new(mock)))
            .with_trust_policy(TrustPolicy::Strict);
        let err = connector
            .connect(&secure(), &Credential::new("alice", "pw"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::ConnectionError { .. }));
    }

    #[tokio::test]
    async fn rejected_login_is_authentication_failed() {
        let mut mock = MockDepotConnection::new();
        mock.expect_login()
            .returning(|_, _| Err(BackendError::Access("password invalid".into())));

        let connector = BackendConnector::new(Arc::new(OneShot::new(mock)));
        let err = connector
            .connect(&plain(), &Credential::new("alice", "wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::AuthenticationFailed { ref principal, .. } if principal == "alice"));
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_error() {
        let connector = BackendConnector::new(Arc::new(OneShot::failing(BackendError::Connection(
            "connection refused".into(),
        ))));
        let err = connector
            .connect(&plain(), &Credential::new("alice", "pw"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::ConnectionError { .. }));
    }
}
