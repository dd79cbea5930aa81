use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::identity::ClientIdentity;

/// Opaque, URL-safe session token.
///
/// Only ASCII letters, digits, `-` and `_` are accepted, so an id is always
/// safe to use as a file name inside the session directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate `raw` against the session id alphabet.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if Self::is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CoreError::InvalidSessionId(raw.to_string()))
        }
    }

    /// Returns true if `raw` is a non-empty token of `[A-Za-z0-9_-]`.
    pub fn is_valid(raw: &str) -> bool {
        !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::InvalidSessionId(value))
        }
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Server-side state bound to one browser session.
///
/// This is the serializable payload only. The per-session lock lives in the
/// store's slot for the session and is never part of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Immutable after creation.
    id: SessionId,
    /// Identity of the client that created the session. Immutable.
    client_identity: ClientIdentity,
    /// Workspace that handles session-scoped calls.
    pub workspace_name: String,
    /// Human-readable user name derived from the identity at creation.
    pub user_label: String,
    #[serde(default)]
    pub is_public: bool,
    pub last_access_time: DateTime<Utc>,
    /// Plugin-owned values, opaque to the server.
    #[serde(default)]
    pub extension_fields: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn new(
        id: SessionId,
        client_identity: ClientIdentity,
        user_label: String,
        workspace_name: String,
    ) -> Self {
        Self {
            id,
            client_identity,
            workspace_name,
            user_label,
            is_public: false,
            last_access_time: Utc::now(),
            extension_fields: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn client_identity(&self) -> &ClientIdentity {
        &self.client_identity
    }

    /// Returns true if this state still carries the given id and identity.
    pub fn is_bound_to(&self, id: &SessionId, client_identity: &ClientIdentity) -> bool {
        self.id == *id && self.client_identity == *client_identity
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extension_fields.get(key)
    }

    pub fn set_extension(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extension_fields.insert(key.into(), value.into());
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access_time = now;
    }
}
