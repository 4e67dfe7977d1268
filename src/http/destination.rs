//! Connection targets.

use std::fmt;

use thiserror::Error;
use url::Url;

/// A host string that cannot be used as a destination.
#[derive(Debug, Error)]
#[error("invalid destination host {host:?}")]
pub struct InvalidDestination {
    /// The rejected host string.
    pub host: String,
}

/// Host, optional port and transport security of a connection slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: Option<u16>,
    secure: bool,
}

impl Destination {
    /// Creates a destination from parts.
    pub fn new(host: impl Into<String>, port: Option<u16>, secure: bool) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            secure,
        }
    }

    /// Parses `host` or `host:port`. A port equal to the scheme default is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDestination`] if the string is not a valid authority.
    pub fn parse(authority: &str, secure: bool) -> Result<Self, InvalidDestination> {
        let scheme = if secure { "https" } else { "http" };
        let invalid = || InvalidDestination {
            host: authority.to_string(),
        };
        if authority.is_empty() || authority.contains(['/', '?', '#', '@']) {
            return Err(invalid());
        }
        let url = Url::parse(&format!("{scheme}://{authority}/")).map_err(|_| invalid())?;
        let host = url.host_str().ok_or_else(invalid)?;
        Ok(Self::new(host, url.port(), secure))
    }

    /// Host name or address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to connect to, defaulting to 443 or 80.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 443 } else { 80 })
    }

    /// Whether the connection is TLS-wrapped.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Value of the `Host` header: the host, plus the port when explicit.
    #[must_use]
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// Same destination with a different host and port.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDestination`] if `authority` does not parse.
    pub fn with_authority(&self, authority: &str) -> Result<Self, InvalidDestination> {
        Self::parse(authority, self.secure)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        write!(f, "{scheme}://{}", self.authority())
    }
}
