//! Resource locators
//!
//! Translates `scheme://host[:port]//depot/path` strings into a
//! [`ServerIdentity`] and a [`RepositoryPath`].
//!
//! | Scheme | Transport |
//! |---|---|
//! | `perforce`, `p4java` | plain |
//! | `perforcessl`, `p4javassl` | secure |

use crate::error::BridgeError;
use crate::server::{ServerIdentity, DEFAULT_PORT};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Characters escaped when rendering a repository path back into a locator
const PATH_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'?').add(b'"');

/// Locator scheme family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP transport
    Plain,
    /// Transport secured before login
    Secure,
}

impl Scheme {
    /// Resolve a scheme name (case-insensitive)
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "perforce" | "p4java" => Some(Self::Plain),
            "perforcessl" | "p4javassl" => Some(Self::Secure),
            _ => None,
        }
    }

    /// Scheme name used when rendering locators
    #[inline]
    #[must_use]
    pub fn canonical(self) -> &'static str {
        match self {
            Self::Plain => "perforce",
            Self::Secure => "perforcessl",
        }
    }

    /// Whether this scheme requires a secured transport
    #[inline]
    #[must_use]
    pub fn is_secure(self) -> bool {
        matches!(self, Self::Secure)
    }
}

/// Server-relative path of a single versioned file, e.g. `//depot/a/b.txt`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepositoryPath(String);

impl RepositoryPath {
    /// Validate and wrap a repository path
    ///
    /// # Errors
    /// Returns `MalformedLocator` if the path is not a single depot file
    pub fn new(path: impl Into<String>) -> Result<Self, BridgeError> {
        let path = path.into();
        let reject = |reason: &str| Err(BridgeError::malformed(path.clone(), reason));

        let Some(rest) = path.strip_prefix("//") else {
            return reject("repository path must start with //");
        };
        if rest.is_empty() || rest.starts_with('/') {
            return reject("repository path names no depot");
        }
        if path.ends_with('/') {
            return reject("repository path names a directory");
        }
        if rest.split('/').any(str::is_empty) {
            return reject("repository path has an empty segment");
        }
        if rest.split('/').any(|segment| matches!(segment, "." | "..")) {
            return reject("relative segments are not allowed");
        }
        if path.contains("...") || path.contains(['*', '@', '#']) {
            return reject("wildcards and revision specifiers are not allowed");
        }
        if path.chars().any(char::is_control) {
            return reject("control characters are not allowed");
        }
        Ok(Self(path))
    }

    /// Path as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (the file name)
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Depot name (first segment after `//`)
    #[inline]
    #[must_use]
    pub fn depot(&self) -> &str {
        self.0[2..].split('/').next().unwrap_or_default()
    }
}

impl Display for RepositoryPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RepositoryPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parsed resource locator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    server: ServerIdentity,
    path: RepositoryPath,
}

impl Locator {
    /// Combine a server and a path
    #[inline]
    #[must_use]
    pub fn new(server: ServerIdentity, path: RepositoryPath) -> Self {
        Self { server, path }
    }

    /// Parse a resource locator
    ///
    /// # Errors
    /// Returns `MalformedLocator` if scheme, host, port or path are invalid
    pub fn parse(input: &str) -> Result<Self, BridgeError> {
        let (scheme, authority, raw_path) = split(input)?;
        let server = parse_authority(input, scheme, authority)?;

        if raw_path.is_empty() {
            return Err(BridgeError::malformed(input, "missing repository path"));
        }
        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| BridgeError::malformed(input, "repository path is not valid UTF-8"))?;
        let path = RepositoryPath::new(decoded.into_owned())
            .map_err(|e| match e {
                BridgeError::MalformedLocator { reason, .. } => BridgeError::malformed(input, reason),
                other => other,
            })?;

        Ok(Self { server, path })
    }

    /// Target server
    #[inline]
    #[must_use]
    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    /// Target repository path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &RepositoryPath {
        &self.path
    }

    /// Split into parts
    #[inline]
    #[must_use]
    pub fn into_parts(self) -> (ServerIdentity, RepositoryPath) {
        (self.server, self.path)
    }
}

impl FromStr for Locator {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.server,
            utf8_percent_encode(self.path.as_str(), PATH_ESCAPES)
        )
    }
}

/// Split `scheme://authority/path` into its three raw parts
///
/// The path keeps its leading separator and may be empty.
pub(crate) fn split(input: &str) -> Result<(Scheme, &str, &str), BridgeError> {
    let trimmed = input.trim();
    let Some((scheme_name, rest)) = trimmed.split_once("://") else {
        return Err(BridgeError::malformed(input, "missing scheme separator '://'"));
    };
    let scheme = Scheme::from_name(scheme_name)
        .ok_or_else(|| BridgeError::malformed(input, format!("unsupported scheme '{scheme_name}'")))?;

    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    Ok((scheme, authority, path))
}

/// Parse `host[:port]` (or `[v6]:port`) into a server identity
pub(crate) fn parse_authority(
    input: &str,
    scheme: Scheme,
    authority: &str,
) -> Result<ServerIdentity, BridgeError> {
    if authority.contains('@') {
        return Err(BridgeError::malformed(input, "user info is not allowed in locators"));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let Some((host, after)) = bracketed.split_once(']') else {
            return Err(BridgeError::malformed(input, "unterminated IPv6 host"));
        };
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or_else(|| {
                BridgeError::malformed(input, "unexpected characters after IPv6 host")
            })?),
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(BridgeError::malformed(input, "missing host"));
    }

    let port = match port {
        None | Some("") => DEFAULT_PORT,
        Some(p) => p
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| BridgeError::malformed(input, format!("invalid port '{p}'")))?,
    };

    Ok(ServerIdentity::new(scheme.is_secure(), host, port))
}
