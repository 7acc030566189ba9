use serde::{Deserialize, Serialize};

use crate::UserId;

/// A marketplace user. Read-only as far as sagas are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    pub address: String,
}

impl User {
    /// Creates a user with an address.
    pub fn new(id: impl Into<UserId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            address: address.into(),
        }
    }
}
