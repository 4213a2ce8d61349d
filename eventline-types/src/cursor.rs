//! Opaque change cursor issued by the remote store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marks a position in a zone's change feed: "everything up to here has
/// been seen".
///
/// The bytes are issued by the remote store and never interpreted locally.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(Vec<u8>);

impl ChangeCursor {
    /// Wraps raw cursor bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the cursor, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Interprets the cursor as UTF-8, for stores that issue textual tokens.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<Vec<u8>> for ChangeCursor {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for ChangeCursor {
    fn from(token: &str) -> Self {
        Self(token.as_bytes().to_vec())
    }
}

impl From<String> for ChangeCursor {
    fn from(token: String) -> Self {
        Self(token.into_bytes())
    }
}

// Cursors can be long server tokens; keep logs readable.
impl fmt::Debug for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) if s.len() <= 32 => write!(f, "ChangeCursor({s:?})"),
            _ => write!(f, "ChangeCursor({} bytes)", self.0.len()),
        }
    }
}
