use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use uuid::Uuid;

/// Row identifiers owned by the relational store.
macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map(Self)
            }
        }
    };
}

numeric_id!(UserId);
numeric_id!(ConversationId);
numeric_id!(MessageId);

/// Identifies one physical connection. A user who reconnects gets a new
/// `ConnectionId` while keeping the same `UserId`.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display_and_parse() {
        let id = UserId::new(42);
        assert_eq!(id.to_string(), "42");
        let parsed: UserId = "42".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_trims_whitespace() {
        let parsed: ConversationId = " 7 ".parse().unwrap();
        assert_eq!(parsed.get(), 7);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("abc".parse::<MessageId>().is_err());
        assert!("".parse::<UserId>().is_err());
    }

    #[test]
    fn numeric_ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&UserId::new(9)).unwrap();
        assert_eq!(json, "9");
        let back: UserId = serde_json::from_str("9").unwrap();
        assert_eq!(back, UserId::new(9));
    }

    #[test]
    fn ids_order_by_value() {
        assert!(UserId::new(1) < UserId::new(2));
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
