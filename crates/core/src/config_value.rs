// SPDX-License-Identifier: MIT

//! Custom per-backend job configuration values.

use serde::{Deserialize, Serialize};

/// Declared type of a [`ConfigValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigValueType {
    Enum,
    Float,
    Int,
    String,
}

crate::simple_display! {
    ConfigValueType {
        Enum => "enum",
        Float => "float",
        Int => "int",
        String => "string",
    }
}

/// A custom name/typed-value pair carried on a job (`config` on the wire).
///
/// Values travel as strings with a declared type; [`ConfigValue::validate`]
/// checks that the string parses as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "valueType")]
    pub value_type: ConfigValueType,
}

impl ConfigValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>, value_type: ConfigValueType) -> Self {
        Self { name: name.into(), value: value.into(), value_type }
    }

    /// Declaration-only entry, used when advertising supported config keys.
    pub fn declaration(name: impl Into<String>, value_type: ConfigValueType) -> Self {
        Self { name: name.into(), value: String::new(), value_type }
    }

    /// Check that the value parses as its declared type.
    pub fn validate(&self) -> Result<(), String> {
        match self.value_type {
            ConfigValueType::Int if self.value.parse::<i64>().is_err() => {
                Err(format!("config value {:?} is not an int: {:?}", self.name, self.value))
            }
            ConfigValueType::Float if self.value.parse::<f64>().is_err() => {
                Err(format!("config value {:?} is not a float: {:?}", self.name, self.value))
            }
            _ => Ok(()),
        }
    }
}
