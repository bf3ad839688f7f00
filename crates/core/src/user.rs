// SPDX-License-Identifier: MIT

//! Job-owning users and the all-users admin sentinel.

use serde::{Deserialize, Serialize};

/// The user scope of a request or job.
///
/// The launcher represents "any user" (administrator scope) as the literal
/// `"*"`. An empty username is representable because job submissions may
/// omit the owner and have it filled in from the request; every other use
/// of an empty user is a validation error at the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(String);

impl User {
    pub const ALL_USERS: &'static str = "*";

    /// The admin-scope sentinel (`"*"`).
    pub fn all_users() -> Self {
        Self(Self::ALL_USERS.to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_all_users(&self) -> bool {
        self.0 == Self::ALL_USERS
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this user may see jobs owned by `owner`.
    pub fn can_see(&self, owner: &User) -> bool {
        self.is_all_users() || self == owner
    }
}

impl Default for User {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for User {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for User {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
#[path = "user_tests.rs"]
mod tests;
