use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Doctor,
    Patient,
    Admin,
}

/// A contact as tracked by the presence roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

const CONVERSATION_ID_SEPARATOR: &str = "_";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("participant identifier must not be empty")]
pub struct EmptyParticipant;

/// Public correlation token for a pairwise conversation.
///
/// Derived identically by both participants regardless of argument
/// order, and used as the sole key matching inbound events to local
/// conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn derive(a: &UserId, b: &UserId) -> Result<Self, EmptyParticipant> {
        if a.0.trim().is_empty() || b.0.trim().is_empty() {
            return Err(EmptyParticipant);
        }
        let (lo, hi) = if a.0 <= b.0 { (&a.0, &b.0) } else { (&b.0, &a.0) };
        Ok(Self(format!("{lo}{CONVERSATION_ID_SEPARATOR}{hi}")))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_commutative() {
        let a = UserId::from("u1");
        let b = UserId::from("u2");
        assert_eq!(
            ConversationId::derive(&a, &b).expect("derive"),
            ConversationId::derive(&b, &a).expect("derive")
        );
    }

    #[test]
    fn conversation_id_joins_sorted_pair() {
        let id = ConversationId::derive(&UserId::from("u2"), &UserId::from("u1")).expect("derive");
        assert_eq!(id.0, "u1_u2");
    }

    #[test]
    fn distinct_pairs_produce_distinct_ids() {
        let ab = ConversationId::derive(&UserId::from("a"), &UserId::from("b")).expect("derive");
        let ac = ConversationId::derive(&UserId::from("a"), &UserId::from("c")).expect("derive");
        assert_ne!(ab, ac);
    }

    #[test]
    fn empty_participant_is_rejected() {
        let err = ConversationId::derive(&UserId::from(""), &UserId::from("u2"))
            .expect_err("empty id must fail");
        assert_eq!(err, EmptyParticipant);
        assert!(ConversationId::derive(&UserId::from("u1"), &UserId::from("   ")).is_err());
    }
}
