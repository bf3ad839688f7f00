// SPDX-License-Identifier: MIT

//! Job mounts and their tagged source variants.
//!
//! On the wire a mount is `{mountPath, readOnly, type, source}` where
//! `type` selects the shape of `source`. Unknown types are retained as
//! passthrough so the plugin can echo them back unmodified.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A filesystem mount requested for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Mount {
    pub mount_path: String,
    pub read_only: bool,
    pub source: MountSource,
}

impl Mount {
    /// The host source path, if this is a host mount.
    pub fn host_source_path(&self) -> Option<&str> {
        match &self.source {
            MountSource::Host(src) => Some(&src.path),
            _ => None,
        }
    }
}

/// The backing store of a [`Mount`], tagged by the wire `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum MountSource {
    Host(HostMountSource),
    Nfs(NfsMountSource),
    CephFs(CephFsMountSource),
    GlusterFs(GlusterFsMountSource),
    AzureFile(AzureFileMountSource),
    /// An unrecognized mount type; the raw source object is retained.
    Passthrough { mount_type: String, source: Value },
}

impl MountSource {
    pub fn type_str(&self) -> &str {
        match self {
            Self::Host(_) => "host",
            Self::Nfs(_) => "nfs",
            Self::CephFs(_) => "cephFs",
            Self::GlusterFs(_) => "glusterFs",
            Self::AzureFile(_) => "azureFile",
            Self::Passthrough { mount_type, .. } => mount_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMountSource {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NfsMountSource {
    pub host: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CephFsMountSource {
    pub monitors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlusterFsMountSource {
    pub endpoints: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureFileMountSource {
    pub secret_name: String,
    pub share_name: String,
}

impl Serialize for Mount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let source = match &self.source {
            MountSource::Host(src) => serde_json::to_value(src),
            MountSource::Nfs(src) => serde_json::to_value(src),
            MountSource::CephFs(src) => serde_json::to_value(src),
            MountSource::GlusterFs(src) => serde_json::to_value(src),
            MountSource::AzureFile(src) => serde_json::to_value(src),
            MountSource::Passthrough { source, .. } => Ok(source.clone()),
        }
        .map_err(serde::ser::Error::custom)?;

        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("mountPath", &self.mount_path)?;
        map.serialize_entry("readOnly", &self.read_only)?;
        map.serialize_entry("type", self.source.type_str())?;
        map.serialize_entry("source", &source)?;
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MountWire {
    mount_path: String,
    #[serde(default)]
    read_only: bool,
    #[serde(rename = "type")]
    mount_type: String,
    source: Value,
}

impl<'de> Deserialize<'de> for Mount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = MountWire::deserialize(deserializer)?;
        let parse = D::Error::custom;
        let source = match wire.mount_type.as_str() {
            "host" => MountSource::Host(serde_json::from_value(wire.source).map_err(parse)?),
            "nfs" => MountSource::Nfs(serde_json::from_value(wire.source).map_err(parse)?),
            "cephFs" => MountSource::CephFs(serde_json::from_value(wire.source).map_err(parse)?),
            "glusterFs" => {
                MountSource::GlusterFs(serde_json::from_value(wire.source).map_err(parse)?)
            }
            "azureFile" => {
                MountSource::AzureFile(serde_json::from_value(wire.source).map_err(parse)?)
            }
            _ => MountSource::Passthrough { mount_type: wire.mount_type, source: wire.source },
        };
        Ok(Mount { mount_path: wire.mount_path, read_only: wire.read_only, source })
    }
}

#[cfg(test)]
#[path = "mount_tests.rs"]
mod tests;
