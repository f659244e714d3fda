//! Resource mirror
//!
//! The local copy of server resources, keyed by `(type, id)`. All mutation
//! goes through [`Mirror::apply`] (live events) or [`Mirror::seed`]
//! (snapshot records), and every successful mutation is reported to the
//! registered observers.
//!
//! ## Merge rules
//!
//! - `create` on a known key is a no-op, so re-delivered creates are safe
//! - `patch` overwrites each `$set` field, leaving other fields alone
//! - `add_link` appends; re-delivery appends a second copy
//! - `delete` removes the entry
//!
//! Events for a resource the mirror does not hold are dropped, never
//! buffered.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::message::ResourceEvent;
use crate::models::{Link, Resource, ResourceData, ResourceKey, ResourceRecord};

/// A successful mutation of the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorChange {
    Created(ResourceKey),
    Patched {
        key: ResourceKey,
        fields: Vec<String>,
    },
    Linked {
        key: ResourceKey,
        relation: String,
    },
    Deleted(ResourceKey),
}

impl MirrorChange {
    /// The resource that changed
    pub fn key(&self) -> &ResourceKey {
        match self {
            MirrorChange::Created(key) | MirrorChange::Deleted(key) => key,
            MirrorChange::Patched { key, .. } | MirrorChange::Linked { key, .. } => key,
        }
    }
}

type Observer = Box<dyn FnMut(&MirrorChange) + Send>;

/// Client-local cache of server resources
#[derive(Default)]
pub struct Mirror {
    resources: BTreeMap<ResourceKey, Resource>,
    observers: Vec<Observer>,
}

impl fmt::Debug for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mirror")
            .field("resources", &self.resources)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback run after every successful mutation
    pub fn observe<F>(&mut self, observer: F)
    where
        F: FnMut(&MirrorChange) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Apply a decoded event
    ///
    /// Returns the change that was made, or `None` if the event was a no-op.
    pub fn apply(&mut self, event: ResourceEvent) -> Option<MirrorChange> {
        let change = match event {
            ResourceEvent::Create { key, data } => self.insert(key, data, BTreeMap::new()),
            ResourceEvent::Patch {
                resource_type,
                resource_id,
                set,
            } => {
                let key = self.resolve(resource_type.as_deref(), &resource_id, "patch")?;
                if set.is_empty() {
                    return None;
                }
                let resource = self.resources.get_mut(&key)?;
                let fields: Vec<String> = set.keys().cloned().collect();
                for (field, value) in set {
                    resource.data.insert(field, value);
                }
                Some(MirrorChange::Patched { key, fields })
            }
            ResourceEvent::AddLink {
                resource_type,
                resource_id,
                relation,
                link,
            } => {
                let key = self.resolve(resource_type.as_deref(), &resource_id, "add_link")?;
                let resource = self.resources.get_mut(&key)?;
                resource
                    .links
                    .entry(relation.clone())
                    .or_default()
                    .push(link);
                Some(MirrorChange::Linked { key, relation })
            }
            ResourceEvent::Delete {
                resource_type,
                resource_id,
            } => {
                let key = self.resolve(resource_type.as_deref(), &resource_id, "delete")?;
                self.resources.remove(&key);
                Some(MirrorChange::Deleted(key))
            }
        }?;

        self.notify(&change);
        Some(change)
    }

    /// Insert a snapshot record with `create` semantics
    ///
    /// Relations the server stored under `_links` in the record's data are
    /// moved into the resource's links.
    pub fn seed(&mut self, resource_type: &str, record: ResourceRecord) -> Option<MirrorChange> {
        let resource = record.into_resource(resource_type);
        let change = self.insert(resource.key(), resource.data, resource.links)?;
        self.notify(&change);
        Some(change)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// All resources with the given id, across types
    pub fn find_by_id<'a>(&'a self, resource_id: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .values()
            .filter(move |r| r.resource_id == resource_id)
    }

    /// Resources of one type, ordered by id
    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Resource> {
        self.resources
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Owned copy of every resource, ordered by key
    pub fn snapshot(&self) -> Vec<Resource> {
        self.resources.values().cloned().collect()
    }

    fn insert(
        &mut self,
        key: ResourceKey,
        data: ResourceData,
        links: BTreeMap<String, Vec<Link>>,
    ) -> Option<MirrorChange> {
        match self.resources.entry(key) {
            Entry::Occupied(entry) => {
                debug!("Ignoring create for known resource {}", entry.key());
                None
            }
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                entry.insert(Resource {
                    resource_type: key.resource_type.clone(),
                    resource_id: key.resource_id.clone(),
                    data,
                    links,
                });
                Some(MirrorChange::Created(key))
            }
        }
    }

    /// Find the mirrored resource an event refers to
    ///
    /// Without a type, the id must match exactly one resource.
    fn resolve(
        &self,
        resource_type: Option<&str>,
        resource_id: &str,
        action: &str,
    ) -> Option<ResourceKey> {
        let resolved = match resource_type {
            Some(resource_type) => {
                let key = ResourceKey::new(resource_type, resource_id);
                self.resources.contains_key(&key).then_some(key)
            }
            None => {
                let mut matches = self.find_by_id(resource_id).map(Resource::key);
                match (matches.next(), matches.next()) {
                    (Some(key), None) => Some(key),
                    (Some(_), Some(_)) => {
                        debug!(
                            "Ignoring {} for ambiguous id '{}' (present in several types)",
                            action, resource_id
                        );
                        return None;
                    }
                    (None, _) => None,
                }
            }
        };

        if resolved.is_none() {
            debug!("Ignoring {} for unknown resource '{}'", action, resource_id);
        }
        resolved
    }

    fn notify(&mut self, change: &MirrorChange) {
        for observer in &mut self.observers {
            observer(change);
        }
    }
}
