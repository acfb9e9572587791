//! Normalized server identity
//!
//! [`ServerIdentity`] is the key under which credentials are cached and the
//! target a connection is opened against.

use crate::error::BridgeError;
use crate::locator::{self, Scheme};
use std::fmt::{self, Display, Formatter};

/// Port used when a locator does not name one
pub const DEFAULT_PORT: u16 = 1666;

/// Transport security, host and port of a depot server
///
/// Host names are stored lower-cased so that `Depot.Example.com` and
/// `depot.example.com` share credentials.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerIdentity {
    secure: bool,
    host: String,
    port: u16,
}

impl ServerIdentity {
    /// Create identity, normalizing the host
    #[inline]
    #[must_use]
    pub fn new(secure: bool, host: impl AsRef<str>, port: u16) -> Self {
        Self {
            secure,
            host: host.as_ref().trim().to_ascii_lowercase(),
            port,
        }
    }

    /// Parse a server-only locator such as `perforcessl://host:1666`
    ///
    /// Any path component is ignored, so a full resource locator is accepted
    /// as well.
    ///
    /// # Errors
    /// Returns `MalformedLocator` if scheme, host or port are invalid
    pub fn from_locator(input: &str) -> Result<Self, BridgeError> {
        let (scheme, authority, _) = locator::split(input)?;
        locator::parse_authority(input, scheme, authority)
    }

    /// Whether the transport must be secured before login
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Lower-cased host name
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Server address in depot port syntax (`ssl:host:port` or `host:port`)
    #[must_use]
    pub fn address(&self) -> String {
        if self.secure {
            format!("ssl:{}:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Display for ServerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure {
            Scheme::Secure
        } else {
            Scheme::Plain
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme.canonical(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme.canonical(), self.host, self.port)
        }
    }
}
