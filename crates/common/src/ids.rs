use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Defines a string-backed identifier newtype.
///
/// Record-store identifiers are opaque strings assigned by whoever created the
/// record, so they are kept as strings rather than parsed into UUIDs.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
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

string_id!(
    /// Identifier of a saga instance.
    ///
    /// Either supplied by the caller (so a retried task lands in the same
    /// idempotency namespace) or generated by the coordinator.
    SagaId
);

string_id!(
    /// Product identifier.
    ProductId
);

string_id!(
    /// User identifier.
    UserId
);

string_id!(
    /// Order identifier.
    OrderId
);

string_id!(
    /// Payment gateway transaction identifier.
    TransactionId
);

impl SagaId {
    /// Generates a fresh random saga ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl OrderId {
    /// Generates a fresh order ID of the form `order-<uuid>`.
    pub fn generate() -> Self {
        Self(format!("order-{}", Uuid::new_v4()))
    }
}

/// Reference handed to operators when a saga ends in a fatal inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(Uuid);

impl IncidentId {
    /// Creates a new random incident ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an incident ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "INC-{}", self.0.simple())
    }
}
