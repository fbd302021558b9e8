// src/change/mod.rs

//! Change and event model
//!
//! A `Change` is a single property-level diff on one resource: the observed
//! value, the desired value, and a caller-supplied applier that can move the
//! property in either direction. Applying a change emits `Event`s, which the
//! transaction routes into subscription edges.

use std::fmt;

use uuid::Uuid;

use crate::catalog::ResourceId;

/// Event kind synthesized when a trigger callback fires
pub const TRIGGERED: &str = "triggered";

/// A value emitted by change application or synthesized by the trigger
/// engine, used to route subscription callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event kind, e.g. `file_changed`
    pub kind: String,
    /// The resource that produced the event
    pub source: ResourceId,
    /// The transaction the event belongs to
    pub transaction: Option<Uuid>,
    /// Human-readable description
    pub message: String,
}

impl Event {
    pub fn new(
        kind: impl Into<String>,
        source: ResourceId,
        transaction: Option<Uuid>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source,
            transaction,
            message: message.into(),
        }
    }
}

/// Caller-supplied applier for a single property diff
///
/// `forward` applies the diff and `backward` reverts it; each returns the
/// kinds of events the operation produced. An empty list means the
/// operation was a no-op.
pub trait ChangeOp {
    fn forward(&mut self) -> anyhow::Result<Vec<String>>;

    fn backward(&mut self) -> anyhow::Result<Vec<String>>;
}

/// A property-level diff recorded by the transaction
///
/// Created by `Resource::evaluate`; the transaction stamps ownership before
/// applying it and flips `changed` once `forward` produced an event.
pub struct Change {
    property: String,
    is: String,
    should: String,
    op: Box<dyn ChangeOp>,
    resource: Option<ResourceId>,
    transaction: Option<Uuid>,
    changed: bool,
}

impl Change {
    pub fn new(
        property: impl Into<String>,
        is: impl Into<String>,
        should: impl Into<String>,
        op: Box<dyn ChangeOp>,
    ) -> Self {
        Self {
            property: property.into(),
            is: is.into(),
            should: should.into(),
            op,
            resource: None,
            transaction: None,
            changed: false,
        }
    }

    /// The property this change touches
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Printable observed value
    pub fn is(&self) -> &str {
        &self.is
    }

    /// Printable desired value
    pub fn should(&self) -> &str {
        &self.should
    }

    /// The resource this change belongs to; set when the transaction
    /// records the change
    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    /// The owning transaction's id
    pub fn transaction(&self) -> Option<Uuid> {
        self.transaction
    }

    /// True once `forward` produced at least one event
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub(crate) fn stamp(&mut self, resource: ResourceId, transaction: Uuid) {
        self.resource = Some(resource);
        self.transaction = Some(transaction);
    }

    pub(crate) fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }

    /// Apply the diff, minting events stamped with this change's owner
    pub fn forward(&mut self) -> anyhow::Result<Vec<Event>> {
        let Some(source) = self.resource else {
            anyhow::bail!("change '{}' is not attached to a transaction", self.property);
        };
        let kinds = self.op.forward()?;
        let message = format!(
            "{} changed '{}' to '{}'",
            self.property, self.is, self.should
        );
        Ok(kinds
            .into_iter()
            .map(|kind| Event::new(kind, source, self.transaction, message.clone()))
            .collect())
    }

    /// Revert the diff
    pub fn backward(&mut self) -> anyhow::Result<Vec<Event>> {
        let Some(source) = self.resource else {
            anyhow::bail!("change '{}' is not attached to a transaction", self.property);
        };
        let kinds = self.op.backward()?;
        let message = format!("{} reverted to '{}'", self.property, self.is);
        Ok(kinds
            .into_iter()
            .map(|kind| Event::new(kind, source, self.transaction, message.clone()))
            .collect())
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}' -> '{}'", self.property, self.is, self.should)
    }
}
