// src/catalog/mod.rs

//! Resource catalog
//!
//! Owns every resource participating in a transaction. Resources live in an
//! arena and are addressed by stable `ResourceId` indices, which keeps
//! container parent pointers and graph edges free of ownership cycles and
//! makes adjacency bookkeeping O(1).
//!
//! The catalog also tracks containment: a resource added with `add_child`
//! belongs to its parent, and the member closure of a container is derived
//! from these parent pointers.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::{EdgeLabel, Graph};
use crate::resource::{Resource, ResourceRef};

/// Stable arena index of a resource within a catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Slot {
    resource: Box<dyn Resource>,
    parent: Option<ResourceId>,
    removed: bool,
}

/// Arena of resources plus the container hierarchy
#[derive(Default)]
pub struct Catalog {
    slots: Vec<Slot>,
    by_ref: HashMap<ResourceRef, ResourceId>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a top-level resource
    pub fn add_resource(&mut self, resource: Box<dyn Resource>) -> Result<ResourceId> {
        self.insert(resource, None)
    }

    /// Add a resource contained in `parent`
    pub fn add_child(
        &mut self,
        parent: ResourceId,
        resource: Box<dyn Resource>,
    ) -> Result<ResourceId> {
        self.insert(resource, Some(parent))
    }

    fn insert(
        &mut self,
        resource: Box<dyn Resource>,
        parent: Option<ResourceId>,
    ) -> Result<ResourceId> {
        let reference = resource.reference();
        if self.by_ref.contains_key(&reference) {
            return Err(Error::DuplicateResource(reference.to_string()));
        }
        let id = ResourceId(self.slots.len());
        self.slots.push(Slot {
            resource,
            parent,
            removed: false,
        });
        self.by_ref.insert(reference, id);
        Ok(id)
    }

    /// Look up a resource, or None if the id is stale
    pub fn get(&self, id: ResourceId) -> Option<&dyn Resource> {
        self.slots
            .get(id.0)
            .filter(|slot| !slot.removed)
            .map(|slot| slot.resource.as_ref())
    }

    /// Mutable resource lookup
    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut (dyn Resource + 'static)> {
        self.slots
            .get_mut(id.0)
            .filter(|slot| !slot.removed)
            .map(|slot| slot.resource.as_mut())
    }

    /// Find a resource by its (kind, name) reference
    pub fn find(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.by_ref.get(reference).copied()
    }

    /// The container a resource belongs to, if any
    pub fn parent(&self, id: ResourceId) -> Option<ResourceId> {
        self.slots
            .get(id.0)
            .filter(|slot| !slot.removed)
            .and_then(|slot| slot.parent)
    }

    /// Direct members of a container, in insertion order
    pub fn members(&self, id: ResourceId) -> Vec<ResourceId> {
        self.ids()
            .into_iter()
            .filter(|child| self.parent(*child) == Some(id))
            .collect()
    }

    /// Whether the resource's role is purely aggregational
    pub fn is_container(&self, id: ResourceId) -> bool {
        self.get(id).is_some_and(|resource| resource.is_container())
    }

    /// Live resource ids in insertion order
    pub fn ids(&self) -> Vec<ResourceId> {
        (0..self.slots.len())
            .map(ResourceId)
            .filter(|id| !self.slots[id.0].removed)
            .collect()
    }

    /// Printable reference for log messages; survives removal
    pub fn reference(&self, id: ResourceId) -> String {
        match self.get(id) {
            Some(resource) => resource.reference().to_string(),
            None => format!("<removed resource {}>", id),
        }
    }

    /// Distinct kinds across live resources
    pub fn kinds(&self) -> HashSet<String> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|resource| resource.kind().to_string())
            .collect()
    }

    /// The containment hierarchy as a graph with parent -> child edges
    pub fn containment_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for id in self.ids() {
            graph.add_vertex(id);
            if let Some(parent) = self.parent(id) {
                graph.add_edge(parent, id, EdgeLabel::default());
            }
        }
        graph
    }

    /// Drop a resource from the catalog; its id becomes stale
    pub fn remove(&mut self, id: ResourceId) {
        if let Some(slot) = self.slots.get_mut(id.0)
            && !slot.removed
        {
            slot.removed = true;
            let reference = slot.resource.reference();
            self.by_ref.remove(&reference);
        }
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.removed).count()
    }

    /// Whether the catalog holds no live resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
