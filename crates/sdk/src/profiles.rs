// SPDX-License-Identifier: MIT

//! User-profiles overlay: hierarchical per-user configuration.
//!
//! An INI-style file with three section kinds: `[*]` applies to everyone,
//! `[@group]` to members of a POSIX group, `[user]` to one user. Lookup is
//! most-specific-wins (user > group > all); among equally specific
//! sections the later one in the file wins, and within a section the last
//! duplicate key wins. Group membership is resolved once at load time.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("profile parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("unknown profile field {name:?} at line {line}")]
    UnknownField { name: String, line: usize },

    #[error("no value for {name:?} is configured for user {user:?}")]
    MissingValue { name: String, user: String },

    #[error("value {value:?} for {name:?} is not a valid {expected}")]
    TypeMismatch { name: String, value: String, expected: &'static str },
}

/// Resolves POSIX group membership.
pub trait GroupResolver {
    /// The members of a named group; empty when the group does not exist.
    fn members(&self, group: &str) -> Vec<String>;
}

/// Resolver backed by the OS group database.
///
/// Like `getgrnam`, this surfaces secondary members only; users whose
/// primary gid points at the group without an explicit membership entry
/// are not matched.
pub struct OsGroupResolver;

impl GroupResolver for OsGroupResolver {
    fn members(&self, group: &str) -> Vec<String> {
        match nix::unistd::Group::from_name(group) {
            Ok(Some(group)) => group.mem,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    All,
    Group { members: BTreeSet<String> },
    User(String),
}

impl Scope {
    fn applies_to(&self, user: &str) -> bool {
        match self {
            Self::All => true,
            Self::Group { members } => members.contains(user),
            Self::User(name) => name == user,
        }
    }

    /// Specificity rank: user > group > all.
    fn rank(&self) -> u8 {
        match self {
            Self::All => 0,
            Self::Group { .. } => 1,
            Self::User(_) => 2,
        }
    }
}

#[derive(Debug)]
struct Section {
    scope: Scope,
    /// Key/value pairs in file order; duplicates keep the last.
    values: Vec<(String, String)>,
}

/// A loaded user-profiles file.
#[derive(Debug)]
pub struct UserProfiles {
    sections: Vec<Section>,
}

impl UserProfiles {
    /// Parse profile file content. `valid_fields` is the closed set of
    /// value names the plugin declares; any other key is fatal.
    pub fn load(
        content: &str,
        valid_fields: &BTreeSet<String>,
        resolver: &dyn GroupResolver,
    ) -> Result<Self, ProfilesError> {
        let mut sections: Vec<Section> = Vec::new();

        for (index, raw_line) in content.lines().enumerate() {
            let line = index + 1;
            let text = raw_line.trim();
            if text.is_empty() || text.starts_with('#') || text.starts_with(';') {
                continue;
            }

            if let Some(header) = text.strip_prefix('[') {
                let Some(name) = header.strip_suffix(']') else {
                    return Err(ProfilesError::Parse {
                        line,
                        message: format!("unterminated section header {text:?}"),
                    });
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(ProfilesError::Parse {
                        line,
                        message: "empty section name".to_string(),
                    });
                }
                let scope = if name == "*" {
                    Scope::All
                } else if let Some(group) = name.strip_prefix('@') {
                    Scope::Group { members: resolver.members(group).into_iter().collect() }
                } else {
                    Scope::User(name.to_string())
                };
                sections.push(Section { scope, values: Vec::new() });
                continue;
            }

            let Some((key, value)) = text.split_once('=') else {
                return Err(ProfilesError::Parse {
                    line,
                    message: format!("expected key=value, got {text:?}"),
                });
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            if !valid_fields.contains(&key) {
                return Err(ProfilesError::UnknownField { name: key, line });
            }
            let Some(section) = sections.last_mut() else {
                return Err(ProfilesError::Parse {
                    line,
                    message: format!("value {key:?} outside of any section"),
                });
            };
            section.values.push((key, value));
        }

        Ok(Self { sections })
    }

    /// The raw value of `name` for `user`, if any section provides one.
    fn lookup(&self, name: &str, user: &str) -> Option<&str> {
        let mut best: Option<(u8, &str)> = None;
        for section in &self.sections {
            if !section.scope.applies_to(user) {
                continue;
            }
            let rank = section.scope.rank();
            // Within a section the last duplicate key wins.
            let value = section
                .values
                .iter()
                .rev()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str());
            if let Some(value) = value {
                // Later sections of equal specificity override earlier ones.
                if best.map_or(true, |(best_rank, _)| rank >= best_rank) {
                    best = Some((rank, value));
                }
            }
        }
        best.map(|(_, value)| value)
    }

    fn require(&self, name: &str, user: &str) -> Result<&str, ProfilesError> {
        self.lookup(name, user).ok_or_else(|| ProfilesError::MissingValue {
            name: name.to_string(),
            user: user.to_string(),
        })
    }

    pub fn get_string(&self, name: &str, user: &str) -> Result<String, ProfilesError> {
        Ok(self.require(name, user)?.to_string())
    }

    pub fn get_bool(&self, name: &str, user: &str) -> Result<bool, ProfilesError> {
        let value = self.require(name, user)?;
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(mismatch(name, value, "bool")),
        }
    }

    pub fn get_int(&self, name: &str, user: &str) -> Result<i64, ProfilesError> {
        let value = self.require(name, user)?;
        value.parse().map_err(|_| mismatch(name, value, "int"))
    }

    pub fn get_uint(&self, name: &str, user: &str) -> Result<u64, ProfilesError> {
        let value = self.require(name, user)?;
        value.parse().map_err(|_| mismatch(name, value, "uint"))
    }

    pub fn get_double(&self, name: &str, user: &str) -> Result<f64, ProfilesError> {
        let value = self.require(name, user)?;
        value.parse().map_err(|_| mismatch(name, value, "float"))
    }

    /// Comma-separated list, entries trimmed, order preserved.
    pub fn get_string_list(&self, name: &str, user: &str) -> Result<Vec<String>, ProfilesError> {
        let value = self.require(name, user)?;
        Ok(split_list(value))
    }

    /// Comma-separated set, entries trimmed and deduplicated.
    pub fn get_string_set(
        &self,
        name: &str,
        user: &str,
    ) -> Result<BTreeSet<String>, ProfilesError> {
        Ok(self.get_string_list(name, user)?.into_iter().collect())
    }

    /// `key=value;key=value` map.
    pub fn get_string_map(
        &self,
        name: &str,
        user: &str,
    ) -> Result<BTreeMap<String, String>, ProfilesError> {
        let value = self.require(name, user)?;
        let mut map = BTreeMap::new();
        for entry in value.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((key, entry_value)) = entry.split_once('=') else {
                return Err(mismatch(name, value, "map"));
            };
            map.insert(key.trim().to_string(), entry_value.trim().to_string());
        }
        Ok(map)
    }
}

fn mismatch(name: &str, value: &str, expected: &'static str) -> ProfilesError {
    ProfilesError::TypeMismatch { name: name.to_string(), value: value.to_string(), expected }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "profiles_tests.rs"]
mod tests;
