//! Client identity resolution.
//!
//! Authentication happens in the front-end reverse proxy, which injects one of
//! two trusted headers. The identity token is the first present header's
//! `name:value` pair, or the peer address when neither header is present.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Header carrying the client certificate subject.
pub const DEFAULT_CERT_HEADER: &str = "CMS-AUTH-CERT";
/// Header carrying the console host name.
pub const DEFAULT_HOST_HEADER: &str = "CMS-AUTH-HOST";

/// Identity token bound to a session at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which rule produced an identity; selects the user label policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Certificate,
    Console,
    Peer,
}

/// The identity of the client issuing the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    identity: ClientIdentity,
    kind: IdentityKind,
    /// Raw header value or peer address the identity was built from.
    credential: String,
}

impl Requester {
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// Human-readable label for a session created by this requester.
    ///
    /// Certificates yield the `CN` component, preferring one that contains a
    /// space (a person's name over a numeric id). Consoles yield
    /// `Console <last word>`, anything else `Host <address>`.
    pub fn user_label(&self) -> String {
        match self.kind {
            IdentityKind::Certificate => {
                let names: Vec<&str> = self
                    .credential
                    .split("/CN=")
                    .skip(1)
                    .map(|rest| rest.split('/').next().unwrap_or(rest))
                    .filter(|name| !name.is_empty())
                    .collect();
                names
                    .iter()
                    .find(|name| name.contains(' '))
                    .or_else(|| names.first())
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| self.credential.clone())
            }
            IdentityKind::Console => {
                let host = self
                    .credential
                    .split_whitespace()
                    .last()
                    .unwrap_or(&self.credential);
                format!("Console {}", host)
            }
            IdentityKind::Peer => format!("Host {}", self.credential),
        }
    }
}

/// Derives a `Requester` from request metadata.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    cert_header: String,
    host_header: String,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CERT_HEADER, DEFAULT_HOST_HEADER)
    }
}

impl IdentityResolver {
    pub fn new(cert_header: impl Into<String>, host_header: impl Into<String>) -> Self {
        Self {
            cert_header: cert_header.into(),
            host_header: host_header.into(),
        }
    }

    /// Resolve the requester identity.
    ///
    /// `header` looks a header up by name; `peer` is the network peer, if
    /// known. Deterministic and side-effect free.
    pub fn resolve<F>(&self, header: F, peer: Option<IpAddr>) -> Requester
    where
        F: Fn(&str) -> Option<String>,
    {
        let candidates = [
            (&self.cert_header, IdentityKind::Certificate),
            (&self.host_header, IdentityKind::Console),
        ];
        for (name, kind) in candidates {
            if let Some(value) = header(name) {
                return Requester {
                    identity: ClientIdentity::new(format!("{}:{}", name, value)),
                    kind,
                    credential: value,
                };
            }
        }

        let address = peer
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Requester {
            identity: ClientIdentity::new(address.clone()),
            kind: IdentityKind::Peer,
            credential: address,
        }
    }
}
