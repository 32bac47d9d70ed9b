//! Identity and authorization records attached to a node.

use serde::{Deserialize, Serialize};

/// Identity record attached to a node once it has authenticated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account identifier.
    pub id: String,
}

impl Account {
    /// Account with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Named authorization unit held by a node.
///
/// A node's scope collection is small (a handful per connection) and ids
/// are unique within it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// Scope identifier, unique within one node's collection.
    pub id: String,
}

impl Scope {
    /// Scope with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}
