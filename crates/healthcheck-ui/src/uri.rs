//! URI resolution and credential handling.
//!
//! Endpoint and webhook URIs may be absolute or relative to the service's own
//! listen address. URIs may also embed basic-auth credentials; those are kept
//! in memory only, and everything persisted or echoed back uses [`redact`].

use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UriError {
    #[error("invalid URI '{uri}': {source}")]
    Invalid {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("URI '{0}' is not an http(s) endpoint")]
    UnsupportedScheme(String),
}

/// Base address the service is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddresses {
    base: Url,
}

impl ServerAddresses {
    /// Build from the address the API listener is bound to. Unspecified bind
    /// addresses map to `localhost`.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self, UriError> {
        let raw = if addr.ip().is_unspecified() {
            format!("http://localhost:{}/", addr.port())
        } else {
            format!("http://{addr}/")
        };
        let base = Url::parse(&raw).map_err(|source| UriError::Invalid { uri: raw, source })?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn absolute_from_relative(&self, relative: &str) -> Result<Url, UriError> {
        self.base.join(relative).map_err(|source| UriError::Invalid {
            uri: relative.to_string(),
            source,
        })
    }

    /// Resolve a configured URI: absolute http(s) URIs are used as-is, anything
    /// else is joined to the base address.
    pub fn resolve(&self, raw: &str) -> Result<Url, UriError> {
        match Url::parse(raw) {
            Ok(url) if is_http_endpoint(&url) => Ok(url),
            _ => {
                let url = self.absolute_from_relative(raw)?;
                if is_http_endpoint(&url) {
                    Ok(url)
                } else {
                    Err(UriError::UnsupportedScheme(raw.to_string()))
                }
            }
        }
    }
}

/// Whether `url` is an absolute http(s) URL with a host.
pub fn is_http_endpoint(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}

/// Basic-auth credentials taken from URI user-info.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

fn has_credentials(url: &Url) -> bool {
    !url.username().is_empty() || url.password().is_some()
}

/// Split user-info off a URL. The returned URL carries no credentials.
pub fn split_credentials(url: &Url) -> (Url, Option<Credentials>) {
    if !has_credentials(url) {
        return (url.clone(), None);
    }

    let credentials = Credentials {
        username: decode(url.username()),
        password: url.password().map(decode),
    };

    let mut stripped = url.clone();
    // Only fails for cannot-be-a-base URLs, which never carry user-info.
    let _ = stripped.set_username("");
    let _ = stripped.set_password(None);

    (stripped, Some(credentials))
}

fn decode(component: &str) -> String {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| component.to_string())
}

/// Externally visible form of a URI: the host (and explicit port) when the URI
/// carries credentials, the URI unchanged otherwise.
pub fn redact(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if has_credentials(&url) => {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        _ => raw.to_string(),
    }
}

/// Full URIs of stored endpoints that embed credentials, by endpoint name.
///
/// Names are matched the way the store matches them: trimmed and
/// case-insensitive. Shared between the store, which registers every URI it
/// persists, and the collector. Never serialized; `Debug` only lists names.
#[derive(Default)]
pub struct EndpointSecrets {
    by_name: DashMap<String, Url>,
}

fn secret_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl EndpointSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `raw` for `name` if it carries credentials, otherwise drop any
    /// earlier entry for that name.
    pub fn register(&self, name: &str, raw: &str) {
        match Url::parse(raw.trim()) {
            Ok(url) if has_credentials(&url) => {
                self.by_name.insert(secret_key(name), url);
            }
            _ => self.forget(name),
        }
    }

    pub fn forget(&self, name: &str) {
        self.by_name.remove(&secret_key(name));
    }

    pub fn get(&self, name: &str) -> Option<Url> {
        self.by_name.get(&secret_key(name)).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl fmt::Debug for EndpointSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.by_name.iter().map(|entry| entry.key().clone()))
            .finish()
    }
}
