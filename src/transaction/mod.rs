// src/transaction/mod.rs

//! The transaction engine
//!
//! Drives a catalog of resources from observed state to desired state in a
//! single sequential pass:
//!
//! - **prepare**: prefetch provider state, run pre-evaluation generation,
//!   build the relationship graph, topologically sort it
//! - **evaluate**: per resource, apply filters, compute and apply changes,
//!   route emitted events into subscription edges, deliver triggers
//! - **cleanup**: discard resources that were generated during the run
//! - **rollback**: revert recorded changes in reverse insertion order
//!
//! A failure inside one resource never aborts the run; it marks the
//! resource failed and transitively skips everything that depends on it.
//! Only preparation problems (a cyclic graph, an unresolvable dependency)
//! surface as errors.
//!
//! A transaction instance is single-use: `evaluate` consumes its freshness
//! and a second call reports `Error::AlreadyEvaluated`.

mod trigger;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, ResourceId};
use crate::change::{Change, Event};
use crate::error::{Error, Result};
use crate::graph::{Direction, Edge, Graph};
use crate::relationship;
use crate::report::{LogEntry, LogLevel, Report, ResourceMetrics};

/// Split a comma-separated tag list into individual tags
pub fn parse_tag_spec(spec: &str) -> Vec<String> {
    spec.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// Options controlling a transaction run
///
/// Passed explicitly at construction; the engine reads no process-wide
/// state.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// When non-empty, only resources carrying at least one of these tags
    /// are evaluated
    pub tags: Vec<String>,
    /// Bypass tag filtering
    pub ignore_tags: bool,
    /// Bypass schedule filtering
    pub ignore_schedules: bool,
    /// Log caught errors with their full debug representation
    pub trace: bool,
}

impl TransactionOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the run to resources carrying one of these tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the run using a comma-separated tag list
    pub fn with_tag_spec(self, spec: &str) -> Self {
        self.with_tags(parse_tag_spec(spec))
    }

    /// Bypass tag filtering
    pub fn with_ignore_tags(mut self, ignore: bool) -> Self {
        self.ignore_tags = ignore;
        self
    }

    /// Bypass schedule filtering
    pub fn with_ignore_schedules(mut self, ignore: bool) -> Self {
        self.ignore_schedules = ignore;
        self
    }

    /// Log caught errors verbosely
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

/// A single configuration run over one catalog
pub struct Transaction {
    id: Uuid,
    catalog: Catalog,
    options: TransactionOptions,
    relgraph: Graph,
    sorted: Vec<ResourceId>,
    cursor: usize,
    failures: HashMap<ResourceId, u32>,
    targets: HashMap<ResourceId, Vec<Edge>>,
    triggered: HashMap<ResourceId, HashMap<String, u32>>,
    changes: Vec<Change>,
    generated: Vec<ResourceId>,
    metrics: ResourceMetrics,
    time_metrics: HashMap<String, f64>,
    /// Kinds present when evaluation finished, taken before cleanup
    /// discards generated resources
    known_kinds: HashSet<String>,
    report: Report,
    evaluated: bool,
}

impl Transaction {
    /// Create a transaction over a catalog
    pub fn new(catalog: Catalog, options: TransactionOptions) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            catalog,
            options,
            relgraph: Graph::new(),
            sorted: Vec::new(),
            cursor: 0,
            failures: HashMap::new(),
            targets: HashMap::new(),
            triggered: HashMap::new(),
            changes: Vec::new(),
            generated: Vec::new(),
            metrics: ResourceMetrics::default(),
            time_metrics: HashMap::new(),
            known_kinds: HashSet::new(),
            report: Report::new(id),
            evaluated: false,
        }
    }

    /// The transaction's id; stamped onto changes and events
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The options this transaction runs with
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// The catalog being applied
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Outcome counters accumulated so far
    pub fn metrics(&self) -> &ResourceMetrics {
        &self.metrics
    }

    /// Changes recorded so far, in insertion order
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The order resources were (or will be) evaluated in
    pub fn evaluation_order(&self) -> &[ResourceId] {
        &self.sorted
    }

    /// The spliced, auto-required relationship graph
    pub fn relationship_graph(&self) -> &Graph {
        &self.relgraph
    }

    /// Subscription edges whose events have fired at this resource
    pub fn targets(&self, id: ResourceId) -> &[Edge] {
        self.targets.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// How often a callback has been triggered on a resource
    pub fn triggered_count(&self, id: ResourceId, callback: &str) -> u32 {
        self.triggered
            .get(&id)
            .and_then(|callbacks| callbacks.get(callback))
            .copied()
            .unwrap_or(0)
    }

    /// Current failure count of a resource
    pub fn failures(&self, id: ResourceId) -> u32 {
        self.failure_count(id)
    }

    /// Run the transaction: prepare, evaluate every resource in
    /// topological order, clean up generated resources
    ///
    /// Returns every event the run emitted. Recoverable failures are
    /// recorded in the metrics; only preparation problems surface as `Err`.
    pub fn evaluate(&mut self) -> Result<Vec<Event>> {
        if self.evaluated {
            return Err(Error::AlreadyEvaluated);
        }
        self.evaluated = true;

        self.report.open_sink();
        if let Err(err) = self.prepare() {
            self.report.close_sink();
            self.known_kinds = self.catalog.kinds();
            self.cleanup();
            return Err(err);
        }
        info!(transaction = %self.id, resources = self.sorted.len(), "applying configuration");

        let mut events = Vec::new();
        self.cursor = 0;
        while self.cursor < self.sorted.len() {
            let id = self.sorted[self.cursor];
            events.extend(self.eval_resource(id));
            self.cursor += 1;
        }

        self.report.close_sink();
        self.known_kinds = self.catalog.kinds();
        self.cleanup();
        Ok(events)
    }

    /// Revert recorded changes in strict reverse insertion order
    ///
    /// Only changes that actually applied (`changed`) are reverted. A
    /// failing reversal is logged and skipped; the remaining changes are
    /// still attempted. Events emitted by reversals are routed and
    /// triggered like forward events.
    pub fn rollback(&mut self) -> Vec<Event> {
        self.targets.clear();
        self.triggered.clear();

        let mut all_events = Vec::new();
        for idx in (0..self.changes.len()).rev() {
            if !self.changes[idx].changed() {
                continue;
            }
            let resource = self.changes[idx].resource();
            let events = match self.changes[idx].backward() {
                Ok(events) => events,
                Err(err) => {
                    let message = format!(
                        "Could not roll back {}: {}",
                        self.changes[idx],
                        self.describe_error(&err)
                    );
                    self.log(LogLevel::Err, resource, message);
                    continue;
                }
            };
            self.route_events(&events);
            all_events.extend(events);
            if let Some(resource) = resource {
                all_events.extend(self.trigger(resource));
            }
        }
        all_events
    }

    /// Finalize counters and emit the structured report
    pub fn generate_report(&mut self) -> Report {
        self.metrics.total = self.sorted.len() as u64;
        self.metrics.failed = self.failures.values().filter(|count| **count > 0).count() as u64;

        let mut report = self.report.clone();
        report.new_metric("resources", self.metrics.values());

        // only aggregate time goes out; per-kind buckets stay internal.
        // kinds are judged against the catalog as it stood before cleanup,
        // so generated resources still shield their buckets
        let total: f64 = self.time_metrics.values().sum();
        let mut kinds = self.catalog.kinds();
        kinds.extend(self.known_kinds.iter().cloned());
        let mut time_values: BTreeMap<String, f64> = self
            .time_metrics
            .iter()
            .filter(|(name, _)| !kinds.contains(*name))
            .map(|(name, seconds)| (name.clone(), *seconds))
            .collect();
        time_values.insert("total".to_string(), total);
        report.new_metric("time", time_values);

        let mut change_values = BTreeMap::new();
        change_values.insert("total".to_string(), self.changes.len() as f64);
        report.new_metric("changes", change_values);

        report.set_time(Utc::now());
        report
    }

    fn prepare(&mut self) -> Result<()> {
        self.prefetch();
        self.generate();
        let (graph, sorted) = relationship::build(&self.catalog)?;
        self.relgraph = graph;
        self.sorted = sorted;
        Ok(())
    }

    /// Call each provider kind's prefetch once; failures are warnings
    fn prefetch(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        let mut warnings: Vec<(ResourceId, String)> = Vec::new();
        for id in self.catalog.ids() {
            let Some(resource) = self.catalog.get(id) else {
                continue;
            };
            let Some(provider) = resource.provider() else {
                continue;
            };
            if !seen.insert(provider.kind().to_string()) {
                continue;
            }
            debug!(provider = provider.kind(), "prefetching provider state");
            if let Err(err) = provider.prefetch() {
                warnings.push((
                    id,
                    format!(
                        "Could not prefetch {}: {}",
                        provider.kind(),
                        self.describe_error(&err)
                    ),
                ));
            }
        }
        for (id, message) in warnings {
            self.log(LogLevel::Warning, Some(id), message);
        }
    }

    /// Fixed point of pre-evaluation generation: generated resources may
    /// themselves generate
    fn generate(&mut self) {
        let mut pending = self.catalog.ids();
        while !pending.is_empty() {
            let mut fresh = Vec::new();
            for id in pending {
                let children = match self.catalog.get_mut(id) {
                    Some(resource) => resource.generate(),
                    None => continue,
                };
                for child in children {
                    let reference = child.reference().to_string();
                    match self.catalog.add_child(id, child) {
                        Ok(child_id) => {
                            debug!(parent = %self.catalog.reference(id), child = %reference,
                                "generated resource");
                            self.generated.push(child_id);
                            fresh.push(child_id);
                        }
                        Err(err) => {
                            let message =
                                format!("Could not add generated resource {reference}: {err}");
                            self.log(LogLevel::Warning, Some(id), message);
                        }
                    }
                }
            }
            pending = fresh;
        }
    }

    /// Evaluate a single resource: filters, apply, trigger, event routing
    fn eval_resource(&mut self, id: ResourceId) -> Vec<Event> {
        let Some(kind) = self.catalog.get(id).map(|r| r.kind().to_string()) else {
            return Vec::new();
        };
        if !self.tagged(id) {
            self.log(
                LogLevel::Debug,
                Some(id),
                "Not tagged with any configured tag; skipping".to_string(),
            );
            return Vec::new();
        }
        if !self.scheduled(id) {
            self.log(LogLevel::Debug, Some(id), "Not scheduled; skipping".to_string());
            return Vec::new();
        }
        self.metrics.scheduled += 1;

        let start = Instant::now();
        let mut events = self.apply(id);
        *self.time_metrics.entry(kind).or_insert(0.0) += start.elapsed().as_secs_f64();

        events.extend(self.trigger(id));
        self.route_events(&events);
        events
    }

    /// Apply one resource's changes, unless a dependency already failed
    fn apply(&mut self, id: ResourceId) -> Vec<Event> {
        // a failure anywhere upstream blocks the whole dependent subtree
        let blocked: Vec<(ResourceId, u32)> = self
            .relgraph
            .reachable(id, Direction::In)
            .into_iter()
            .filter(|dependency| *dependency != id)
            .filter_map(|dependency| {
                let count = self.failure_count(dependency);
                (count > 0).then_some((dependency, count))
            })
            .collect();
        if !blocked.is_empty() {
            for (dependency, count) in blocked {
                let message = format!(
                    "Dependency {} has {} failures",
                    self.catalog.reference(dependency),
                    count
                );
                self.log(LogLevel::Warning, Some(id), message);
            }
            self.metrics.skipped += 1;
            return Vec::new();
        }

        self.eval_generate(id);

        let evaluated = self.catalog.get_mut(id).map(|resource| resource.evaluate());
        let changes = match evaluated {
            None => return Vec::new(),
            Some(Ok(changes)) => changes,
            Some(Err(err)) => {
                let message = format!("Failed to evaluate: {}", self.describe_error(&err));
                self.log(LogLevel::Err, Some(id), message);
                self.add_failure(id);
                return Vec::new();
            }
        };
        if changes.is_empty() {
            return Vec::new();
        }
        self.metrics.out_of_sync += 1;

        let mut events = Vec::new();
        for mut change in changes {
            change.stamp(id, self.id);
            self.changes.push(change);
            let idx = self.changes.len() - 1;
            match self.changes[idx].forward() {
                Ok(produced) => {
                    if !produced.is_empty() {
                        self.changes[idx].set_changed(true);
                        self.metrics.applied += 1;
                        for event in &produced {
                            self.log(LogLevel::Notice, Some(id), event.message.clone());
                        }
                        events.extend(produced);
                    }
                }
                Err(err) => {
                    let message = format!(
                        "Change {} failed: {}",
                        self.changes[idx],
                        self.describe_error(&err)
                    );
                    self.log(LogLevel::Err, Some(id), message);
                    self.add_failure(id);
                }
            }
        }

        // the resource was out of sync; note the sync time and let it push
        // buffered state
        let now = Utc::now();
        let flushed = match self.catalog.get_mut(id) {
            Some(resource) => {
                resource.mark_synced(now);
                resource.flush()
            }
            None => Ok(()),
        };
        if let Err(err) = flushed {
            let message = format!("Failed to flush: {}", self.describe_error(&err));
            self.log(LogLevel::Err, Some(id), message);
        }

        events
    }

    /// Insert resources generated mid-apply right after the cursor, wired
    /// with their parent's edges
    fn eval_generate(&mut self, id: ResourceId) {
        let children = match self.catalog.get_mut(id) {
            Some(resource) => resource.eval_generate(),
            None => return,
        };
        if children.is_empty() {
            return;
        }
        let outbound: Vec<Edge> = self
            .relgraph
            .edges_for(id, Direction::Out)
            .into_iter()
            .cloned()
            .collect();
        let inbound: Vec<Edge> = self
            .relgraph
            .edges_for(id, Direction::In)
            .into_iter()
            .cloned()
            .collect();

        let mut position = self.cursor + 1;
        for child in children {
            let reference = child.reference().to_string();
            let child_id = match self.catalog.add_child(id, child) {
                Ok(child_id) => child_id,
                Err(err) => {
                    let message = format!("Could not add generated resource {reference}: {err}");
                    self.log(LogLevel::Warning, Some(id), message);
                    continue;
                }
            };
            debug!(parent = %self.catalog.reference(id), child = %reference,
                "generated during apply");
            self.relgraph.add_vertex(child_id);
            for edge in &outbound {
                self.relgraph.add_edge(child_id, edge.target, edge.label.clone());
            }
            for edge in &inbound {
                self.relgraph.add_edge(edge.source, child_id, edge.label.clone());
            }
            let insert_at = position.min(self.sorted.len());
            self.sorted.insert(insert_at, child_id);
            position += 1;
            self.generated.push(child_id);
        }
    }

    /// Match events against subscription edges and queue them at their
    /// targets
    fn route_events(&mut self, events: &[Event]) {
        for event in events {
            for edge in self.relgraph.matching_edges(event) {
                self.targets.entry(edge.target).or_default().push(edge);
            }
        }
    }

    /// Discard resources generated during this run
    fn cleanup(&mut self) {
        for id in self.generated.clone() {
            if let Some(resource) = self.catalog.get_mut(id) {
                resource.remove();
            }
            self.catalog.remove(id);
            self.relgraph.remove_vertex(id);
        }
    }

    fn tagged(&self, id: ResourceId) -> bool {
        if self.options.ignore_tags || self.options.tags.is_empty() {
            return true;
        }
        let Some(resource) = self.catalog.get(id) else {
            return false;
        };
        let tags = resource.tags();
        self.options.tags.iter().any(|tag| tags.contains(tag))
    }

    fn scheduled(&self, id: ResourceId) -> bool {
        if self.options.ignore_schedules {
            return true;
        }
        self.catalog
            .get(id)
            .is_some_and(|resource| resource.scheduled())
    }

    fn failure_count(&self, id: ResourceId) -> u32 {
        self.failures.get(&id).copied().unwrap_or(0)
    }

    fn add_failure(&mut self, id: ResourceId) {
        *self.failures.entry(id).or_insert(0) += 1;
    }

    fn describe_error(&self, err: &anyhow::Error) -> String {
        if self.options.trace {
            format!("{err:?}")
        } else {
            format!("{err:#}")
        }
    }

    /// Emit a message on behalf of a resource; mirrored into the report
    /// while its sink is open
    fn log(&mut self, level: LogLevel, source: Option<ResourceId>, message: String) {
        let source_ref = source.map(|id| self.catalog.reference(id));
        match level {
            LogLevel::Debug => debug!(source = source_ref.as_deref(), "{message}"),
            LogLevel::Info | LogLevel::Notice => info!(source = source_ref.as_deref(), "{message}"),
            LogLevel::Warning => warn!(source = source_ref.as_deref(), "{message}"),
            LogLevel::Err => error!(source = source_ref.as_deref(), "{message}"),
        }
        self.report.log(LogEntry {
            level,
            source: source_ref,
            message,
            time: Utc::now(),
        });
    }
}
