use std::{fmt, str::FromStr};

use url::Url;

use crate::error::{Error, Result};

/// A parsed `scheme://host:port` transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Scheme token, e.g. `tcp`. Informational only.
    pub scheme: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Parse a transport URI. Host and port are required; a scheme with a
    /// well-known default port (`http`, `ws`, ..) may omit it.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::invalid_uri(uri, e.to_string()))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_uri(uri, "missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::invalid_uri(uri, "missing port"))?;
        if !matches!(url.path(), "" | "/") {
            return Err(Error::invalid_uri(uri, "unexpected path"));
        }
        Ok(Self {
            scheme: url.scheme().to_string(),
            // IPv6 hosts come back bracketed; tokio expects them bare.
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }

    /// `host:port` form suitable for socket address resolution.
    pub fn authority(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}
