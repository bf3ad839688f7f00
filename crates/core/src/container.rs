// SPDX-License-Identifier: MIT

//! Container spec accepted on job submissions.

use serde::{Deserialize, Serialize};

/// Container to run the job in, for backends that support images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supplemental_group_ids: Vec<i64>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            run_as_user_id: None,
            run_as_group_id: None,
            supplemental_group_ids: Vec::new(),
        }
    }
}
