//! Lightweight dataset model: the version-index entry the repository keeps
//! per dataset version, and the document shape method results use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsref::Ref;

/// One row of the repository's version index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VersionInfo {
    pub username: String,
    #[serde(rename = "profileID", skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub commit_title: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub body_size: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body_format: String,
    /// Working directory this version is linked to, empty when unlinked.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fsi_path: String,
    /// Whether the linked working directory has uncommitted changes.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fsi_dirty: bool,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl VersionInfo {
    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }

    pub fn dataset_ref(&self) -> Ref {
        Ref {
            username: self.username.clone(),
            profile_id: self.profile_id.clone(),
            name: self.name.clone(),
            path: self.path.clone(),
        }
    }
}

/// Commit metadata for one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commit {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// User-facing descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Structural description of the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Structure {
    pub format: String,
    pub length: u64,
    pub entries: u64,
}

/// A full dataset document as returned by `dataset.get` and produced by
/// transforms. Components are optional; an index-only view carries none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dataset {
    pub username: String,
    #[serde(rename = "profileID", skip_serializing_if = "String::is_empty")]
    pub profile_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<Structure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Dataset {
    pub fn alias(&self) -> String {
        format!("{}/{}", self.username, self.name)
    }
}

/// A peer this node knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub peername: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub address: String,
    pub connected: bool,
}
