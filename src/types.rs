//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based identity of an upgraded connection
//! - `SessionId`: UUID-based identity of a paired session

use std::fmt;

use uuid::Uuid;

/// UUID-backed identifier newtype with `new`, `Default` and `Display`
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identity of an upgraded connection
    ///
    /// Two distinct connections never share an id, so equality on the id is
    /// handle identity.
    ConnectionId
);

uuid_id!(
    /// Identity of a paired session, used only in logs
    SessionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display_is_uuid() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }

    #[test]
    fn test_session_ids_differ() {
        assert_ne!(SessionId::new(), SessionId::default());
    }
}
