// tests/common/mod.rs

//! Shared test harness: scripted resources recording everything they do
//! into a journal, so tests can assert ordering and outcomes.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use converge::{
    Catalog, Change, ChangeOp, Provider, RelationKind, Relationship, Resource, ResourceRef,
};

/// Shared, ordered record of what the scripted resources did
#[derive(Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Position of the first entry equal to `wanted`
    pub fn position(&self, wanted: &str) -> Option<usize> {
        self.0.borrow().iter().position(|entry| entry == wanted)
    }

    pub fn contains(&self, wanted: &str) -> bool {
        self.position(wanted).is_some()
    }
}

/// One scripted property diff
pub struct ChangeSpec {
    pub property: String,
    pub is: String,
    pub should: String,
    pub events: Vec<String>,
    pub fail_forward: bool,
    pub fail_backward: bool,
}

impl ChangeSpec {
    pub fn new(property: &str, events: &[&str]) -> Self {
        Self {
            property: property.to_string(),
            is: "absent".to_string(),
            should: "present".to_string(),
            events: events.iter().map(|event| event.to_string()).collect(),
            fail_forward: false,
            fail_backward: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_forward = true;
        self
    }

    pub fn failing_backward(mut self) -> Self {
        self.fail_backward = true;
        self
    }
}

struct ScriptedOp {
    label: String,
    events: Vec<String>,
    fail_forward: bool,
    fail_backward: bool,
    journal: Journal,
}

impl ChangeOp for ScriptedOp {
    fn forward(&mut self) -> anyhow::Result<Vec<String>> {
        if self.fail_forward {
            anyhow::bail!("forward refused");
        }
        self.journal.record(format!("forward:{}", self.label));
        Ok(self.events.clone())
    }

    fn backward(&mut self) -> anyhow::Result<Vec<String>> {
        if self.fail_backward {
            anyhow::bail!("backward refused");
        }
        self.journal.record(format!("backward:{}", self.label));
        Ok(self.events.clone())
    }
}

/// Provider stub recording prefetch calls
pub struct ScriptedProvider {
    kind: String,
    journal: Journal,
    fail: bool,
}

impl Provider for ScriptedProvider {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn prefetch(&self) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("backend unavailable");
        }
        self.journal.record(format!("prefetch:{}", self.kind));
        Ok(())
    }
}

/// Resource driven entirely by its builder configuration
pub struct Scripted {
    kind: String,
    name: String,
    tags: Vec<String>,
    scheduled: bool,
    container: bool,
    relationships: Vec<Relationship>,
    changes: Vec<ChangeSpec>,
    fail_evaluate: bool,
    fail_callback: bool,
    generated: Vec<Scripted>,
    eval_generated: Vec<Scripted>,
    provider: Option<ScriptedProvider>,
    journal: Journal,
}

impl Scripted {
    pub fn new(kind: &str, name: &str, journal: &Journal) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            tags: Vec::new(),
            scheduled: true,
            container: false,
            relationships: Vec::new(),
            changes: Vec::new(),
            fail_evaluate: false,
            fail_callback: false,
            generated: Vec::new(),
            eval_generated: Vec::new(),
            provider: None,
            journal: journal.clone(),
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn unscheduled(mut self) -> Self {
        self.scheduled = false;
        self
    }

    pub fn container(mut self) -> Self {
        self.container = true;
        self
    }

    pub fn require(mut self, kind: &str, name: &str) -> Self {
        self.relationships.push(Relationship::new(
            RelationKind::Require,
            ResourceRef::new(kind, name),
        ));
        self
    }

    pub fn before(mut self, kind: &str, name: &str) -> Self {
        self.relationships.push(Relationship::new(
            RelationKind::Before,
            ResourceRef::new(kind, name),
        ));
        self
    }

    pub fn notify(mut self, kind: &str, name: &str, callback: &str) -> Self {
        self.relationships.push(
            Relationship::new(RelationKind::Notify, ResourceRef::new(kind, name))
                .with_callback(callback),
        );
        self
    }

    pub fn subscribe(mut self, kind: &str, name: &str, callback: &str) -> Self {
        self.relationships.push(
            Relationship::new(RelationKind::Subscribe, ResourceRef::new(kind, name))
                .with_callback(callback),
        );
        self
    }

    pub fn change(mut self, spec: ChangeSpec) -> Self {
        self.changes.push(spec);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_evaluate = true;
        self
    }

    pub fn callback_fails(mut self) -> Self {
        self.fail_callback = true;
        self
    }

    pub fn generates(mut self, child: Scripted) -> Self {
        self.generated.push(child);
        self
    }

    pub fn eval_generates(mut self, child: Scripted) -> Self {
        self.eval_generated.push(child);
        self
    }

    pub fn with_provider(mut self, kind: &str) -> Self {
        self.provider = Some(ScriptedProvider {
            kind: kind.to_string(),
            journal: self.journal.clone(),
            fail: false,
        });
        self
    }

    pub fn with_failing_provider(mut self, kind: &str) -> Self {
        self.provider = Some(ScriptedProvider {
            kind: kind.to_string(),
            journal: self.journal.clone(),
            fail: true,
        });
        self
    }

    pub fn boxed(self) -> Box<dyn Resource> {
        Box::new(self)
    }
}

impl Resource for Scripted {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relationships(&self) -> Vec<Relationship> {
        self.relationships.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn scheduled(&self) -> bool {
        self.scheduled
    }

    fn is_container(&self) -> bool {
        self.container
    }

    fn provider(&self) -> Option<&dyn Provider> {
        self.provider.as_ref().map(|provider| provider as &dyn Provider)
    }

    fn generate(&mut self) -> Vec<Box<dyn Resource>> {
        std::mem::take(&mut self.generated)
            .into_iter()
            .map(|child| child.boxed())
            .collect()
    }

    fn eval_generate(&mut self) -> Vec<Box<dyn Resource>> {
        std::mem::take(&mut self.eval_generated)
            .into_iter()
            .map(|child| child.boxed())
            .collect()
    }

    fn evaluate(&mut self) -> anyhow::Result<Vec<Change>> {
        self.journal.record(format!("evaluate:{}", self.name));
        if self.fail_evaluate {
            anyhow::bail!("observed state unreadable");
        }
        let changes = std::mem::take(&mut self.changes)
            .into_iter()
            .map(|spec| {
                Change::new(
                    spec.property.clone(),
                    spec.is.clone(),
                    spec.should.clone(),
                    Box::new(ScriptedOp {
                        label: format!("{}:{}", self.name, spec.property),
                        events: spec.events,
                        fail_forward: spec.fail_forward,
                        fail_backward: spec.fail_backward,
                        journal: self.journal.clone(),
                    }),
                )
            })
            .collect();
        Ok(changes)
    }

    fn run_callback(&mut self, name: &str) -> anyhow::Result<()> {
        if self.fail_callback {
            anyhow::bail!("callback refused");
        }
        self.journal.record(format!("callback:{}:{}", self.name, name));
        Ok(())
    }

    fn remove(&mut self) {
        self.journal.record(format!("remove:{}", self.name));
    }
}

/// Build a catalog from scripted resources, returning their ids in order
pub fn catalog_of(resources: Vec<Scripted>) -> (Catalog, Vec<converge::ResourceId>) {
    let mut catalog = Catalog::new();
    let mut ids = Vec::new();
    for resource in resources {
        ids.push(catalog.add_resource(resource.boxed()).unwrap());
    }
    (catalog, ids)
}
