//! Typed ID wrappers for sessions, workflows, calls, turns, and events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up session IDs, workflow IDs, and
/// call IDs at compile time. They are strings underneath; the protocol
/// imposes no format. `generate()` mints a fresh UUIDv4 for callers that
/// don't bring their own.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Mint a fresh random ID.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(WorkflowId, "Unique identifier for a workflow execution.");
typed_id!(CallId, "Unique identifier for a single tool call.");
typed_id!(TurnId, "Unique identifier for one turn in a session's history.");
typed_id!(EventId, "Unique identifier for a processing event.");
