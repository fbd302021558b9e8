// src/resource/mod.rs

//! The resource contract
//!
//! A resource is a declarative unit of desired state: a kind tag, a name
//! unique within the kind, declared relationships to other resources, and
//! the ability to compute the changes that bring the system from its
//! observed state to the declared one.
//!
//! The engine depends on a deliberately narrow capability set. Optional
//! capabilities (generation, flush, callbacks, sync caching) have default
//! no-op bodies, so simple resources implement only `kind`, `name`, and
//! `evaluate`.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::catalog::Catalog;
use crate::change::Change;

/// Printable (kind, name) reference, unique within a catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

/// How a declared relationship binds two resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The target must be applied before this resource
    Require,
    /// This resource must be applied before the target
    Before,
    /// Like `Before`, and the target reacts to this resource's events
    Notify,
    /// Like `Require`, and this resource reacts to the target's events
    Subscribe,
}

/// A relationship declared on a resource
///
/// `Notify` and `Subscribe` usually carry a callback; without one the edge
/// orders evaluation but delivers nothing.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelationKind,
    pub target: ResourceRef,
    pub callback: Option<String>,
}

impl Relationship {
    pub fn new(kind: RelationKind, target: ResourceRef) -> Self {
        Self {
            kind,
            target,
            callback: None,
        }
    }

    /// Name the callback to invoke on the subscriber when the edge fires
    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }
}

/// Backend access for a resource
///
/// Providers of the same kind share one `prefetch` call per transaction, so
/// bulk state queries run once instead of per resource.
pub trait Provider {
    /// Provider kind; resources reporting the same kind share a prefetch
    fn kind(&self) -> &str;

    /// Bulk-load backend state ahead of evaluation
    fn prefetch(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Contract between the engine and a unit of desired state
pub trait Resource {
    /// Kind tag, e.g. `file` or `service`
    fn kind(&self) -> &str;

    /// Name, unique within the kind
    fn name(&self) -> &str;

    /// Printable reference
    fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.name())
    }

    /// Relationships declared on this resource
    fn relationships(&self) -> Vec<Relationship> {
        Vec::new()
    }

    /// Implicit dependencies, e.g. a file requiring its parent directory;
    /// only inserted where no explicit edge already exists
    fn autorequire(&self, _catalog: &Catalog) -> Vec<ResourceRef> {
        Vec::new()
    }

    /// Tags used for run filtering
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether the resource's schedule allows applying it now
    fn scheduled(&self) -> bool {
        true
    }

    /// Whether this resource only aggregates members and is never applied
    fn is_container(&self) -> bool {
        false
    }

    /// Backend provider, if the resource has one
    fn provider(&self) -> Option<&dyn Provider> {
        None
    }

    /// Contribute additional resources before evaluation starts
    fn generate(&mut self) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }

    /// Contribute additional resources while this one is being applied;
    /// children inherit this resource's graph edges and run right after it
    fn eval_generate(&mut self) -> Vec<Box<dyn Resource>> {
        Vec::new()
    }

    /// Compute the changes that bring observed state to desired state
    ///
    /// An empty list means the resource is already in sync.
    fn evaluate(&mut self) -> anyhow::Result<Vec<Change>>;

    /// Push buffered state to the backend after changes were applied
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Invoke a named callback, e.g. `restart` on a service
    fn run_callback(&mut self, name: &str) -> anyhow::Result<()> {
        anyhow::bail!("{} does not respond to '{}'", self.reference(), name)
    }

    /// Record the time this resource was last brought in sync
    fn mark_synced(&mut self, _when: DateTime<Utc>) {}

    /// Release any state held outside the catalog; called when a generated
    /// resource is discarded at cleanup
    fn remove(&mut self) {}
}

/// A purely aggregational resource
///
/// Groups member resources and is never applied itself; the relationship
/// builder splices its external edges onto the members.
pub struct Component {
    name: String,
}

impl Component {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Resource for Component {
    fn kind(&self) -> &str {
        "component"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_container(&self) -> bool {
        true
    }

    fn evaluate(&mut self) -> anyhow::Result<Vec<Change>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_display() {
        let reference = ResourceRef::new("file", "/etc/motd");
        assert_eq!(reference.to_string(), "file[/etc/motd]");
    }

    #[test]
    fn test_relationship_builder() {
        let rel = Relationship::new(
            RelationKind::Subscribe,
            ResourceRef::new("file", "/etc/app.conf"),
        )
        .with_callback("restart");

        assert_eq!(rel.kind, RelationKind::Subscribe);
        assert_eq!(rel.callback.as_deref(), Some("restart"));
    }

    #[test]
    fn test_component_is_container() {
        let mut component = Component::new("web");
        assert!(component.is_container());
        assert_eq!(component.reference().to_string(), "component[web]");
        assert!(component.evaluate().unwrap().is_empty());
    }

    #[test]
    fn test_default_callback_rejects() {
        let mut component = Component::new("web");
        let err = component.run_callback("restart").unwrap_err();
        assert!(err.to_string().contains("does not respond"));
    }
}
