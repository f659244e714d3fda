//! Data models for mirrored resources
//!
//! A resource is an opaque JSON object identified by its type and id,
//! plus named ordered relations to other resources.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Free-form resource fields
pub type ResourceData = Map<String, Value>;

/// Key under which the server stores links inside `resource_data`
pub const LINKS_FIELD: &str = "_links";

/// Identifies one resource: `(resource_type, resource_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

/// Link target, encoded on the wire as `["todo_item", "milk"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct TargetId {
    pub resource_type: String,
    pub resource_id: String,
}

impl TargetId {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }

    /// The mirror key of the linked resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }
}

impl From<(String, String)> for TargetId {
    fn from((resource_type, resource_id): (String, String)) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }
}

impl From<TargetId> for (String, String) {
    fn from(target: TargetId) -> Self {
        (target.resource_type, target.resource_id)
    }
}

/// One entry of a named relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub target_id: TargetId,
}

/// A locally mirrored server resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub data: ResourceData,
    /// Relation name to ordered link targets
    #[serde(default)]
    pub links: BTreeMap<String, Vec<Link>>,
}

impl Resource {
    /// Create a resource with no links
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        data: ResourceData,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            data,
            links: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.resource_type.clone(), self.resource_id.clone())
    }

    /// Links under a relation, empty if the relation was never used
    pub fn links_for(&self, relation: &str) -> &[Link] {
        self.links.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A resource as returned by the collection and resource endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Omitted by some servers; the requested collection is used then
    #[serde(default, alias = "resource_name", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub resource_id: String,
    #[serde(default)]
    pub resource_data: ResourceData,
}

impl ResourceRecord {
    /// Convert to a resource, falling back to `default_type` when untyped
    ///
    /// Relations the server stored under `_links` are moved out of the
    /// data into `links`. Non-array entries (such as `latest`) are dropped.
    pub fn into_resource(self, default_type: &str) -> Resource {
        let resource_type = self
            .resource_type
            .unwrap_or_else(|| default_type.to_string());
        let mut resource = Resource::new(resource_type, self.resource_id, self.resource_data);

        let Some(stored) = resource.data.remove(LINKS_FIELD) else {
            return resource;
        };
        let Value::Object(stored) = stored else {
            warn!("Dropping non-object {} on {}", LINKS_FIELD, resource.key());
            return resource;
        };

        for (relation, entries) in stored {
            // `latest` maps target types to ids rather than listing links
            if !entries.is_array() {
                continue;
            }
            match serde_json::from_value::<Vec<Link>>(entries) {
                Ok(entries) => {
                    resource.links.insert(relation, entries);
                }
                Err(e) => warn!(
                    "Skipping unreadable relation '{}' on {}: {}",
                    relation,
                    resource.key(),
                    e
                ),
            }
        }
        resource
    }
}
