//! Opaque entity identifiers.
//!
//! Client-created entities get `dev_`/`conn_` prefixed uuids; the persistence
//! service may hand out integers instead. Both decode into the same string
//! form so lookups never depend on which side minted the id.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Wire form of an id before normalization.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Int(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
        }
    }
}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
        #[serde(from = "RawId")]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh client-side id.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<RawId> for $name {
            fn from(raw: RawId) -> Self {
                Self(raw.into())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<i64> for $name {
            fn from(n: i64) -> Self {
                Self(n.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Identity of a device, stable for the device's lifetime.
    DeviceId,
    "dev"
);
entity_id!(
    /// Identity of a connection.
    ConnectionId,
    "conn"
);
