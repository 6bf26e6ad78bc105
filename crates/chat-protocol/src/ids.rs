//! Typed ID wrappers.
//!
//! IDs are opaque String wrappers (serde-transparent). Producers pick the
//! format; consumers only compare them for equality.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier for a chat session.
    SessionId
);
typed_id!(
    /// Correlates every event of one assistant turn.
    RequestId
);
typed_id!(
    /// Producer-assigned identifier of one tool invocation within a turn.
    ToolId
);
typed_id!(
    /// Unique identifier for a stored message.
    MessageId
);
typed_id!(
    /// Unique identifier for an uploaded file.
    FileId
);

fn short_hex(len: usize) -> String {
    let mut hex = uuid::Uuid::new_v4().simple().to_string();
    hex.truncate(len);
    hex
}

impl RequestId {
    /// `req_` followed by 12 random hex characters.
    pub fn generate() -> Self {
        Self(format!("req_{}", short_hex(12)))
    }
}

impl ToolId {
    /// `tool_` followed by 8 random hex characters.
    pub fn generate() -> Self {
        Self(format!("tool_{}", short_hex(8)))
    }
}
