//! Caller identity, resolved by the auth collaborator before any cart or
//! order call. The core trusts it and never re-verifies credentials.

use serde::{Deserialize, Serialize};

/// Who owns a cart
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    /// Registered, authenticated user
    User(String),
    /// Anonymous browsing session
    Guest(String),
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Identity::User(id.into())
    }

    pub fn guest(session_id: impl Into<String>) -> Self {
        Identity::Guest(session_id.into())
    }

    /// The user id, if this is a registered user
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Identity::User(id) => Some(id),
            Identity::Guest(_) => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::User(id) => write!(f, "user:{}", id),
            Identity::Guest(id) => write!(f, "guest:{}", id),
        }
    }
}
