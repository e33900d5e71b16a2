//! Type-safe identifier newtypes for the bastion domain model.
//!
//! The persistence layer hands out numeric primary keys for every entity.
//! Wrapping them keeps a `ContainerId` from being passed where a
//! `BackendId` is expected when the engine cross-references relations.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw primary key
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw primary key
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Project identifier.
    ///
    /// Projects own containers and backends.
    ProjectId
);

numeric_id!(
    /// Backend identifier.
    ///
    /// Appears in generated HAProxy backend names, so it must stay stable
    /// for the lifetime of a backend.
    BackendId
);

numeric_id!(
    /// Domain identifier.
    DomainId
);

numeric_id!(
    /// Container identifier.
    ContainerId
);

numeric_id!(
    /// Identifier of a real (human) user holding SSH grants.
    UserId
);
