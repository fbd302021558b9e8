// src/transaction/trigger.rs

//! Upward-recursive trigger delivery
//!
//! After a resource is applied, the events routed to it and to every
//! container it sits in are delivered here. Edges queued at each level
//! group by callback; each callback runs once per level, and a `triggered`
//! event is synthesized for every invocation so subscribers of the
//! subscriber keep firing.

use std::collections::HashMap;

use crate::catalog::ResourceId;
use crate::change::{Event, TRIGGERED};
use crate::report::LogLevel;

use super::Transaction;

impl Transaction {
    /// Deliver queued events to a resource and its container chain,
    /// bottom-up
    ///
    /// Within one level, callbacks run in the insertion order of their
    /// first contributing edge. Edges without a callback order evaluation
    /// only and deliver nothing.
    pub(crate) fn trigger(&mut self, child: ResourceId) -> Vec<Event> {
        let mut triggered_events = Vec::new();
        let mut current = Some(child);

        while let Some(id) = current {
            let edges = self.targets.get(&id).cloned().unwrap_or_default();
            if !edges.is_empty() {
                let mut order: Vec<String> = Vec::new();
                let mut counts: HashMap<String, usize> = HashMap::new();
                for edge in &edges {
                    if let Some(callback) = &edge.label.callback {
                        if !counts.contains_key(callback) {
                            order.push(callback.clone());
                        }
                        *counts.entry(callback.clone()).or_insert(0) += 1;
                    }
                }

                for callback in order {
                    let subscriptions = counts[&callback];
                    let message =
                        format!("Triggering '{callback}' from {subscriptions} subscriptions");
                    self.log(LogLevel::Notice, Some(id), message.clone());

                    let outcome = self
                        .catalog
                        .get_mut(id)
                        .map(|resource| resource.run_callback(&callback));
                    match outcome {
                        // gone from the catalog, e.g. rolled back after cleanup
                        None => continue,
                        Some(Ok(())) => self.metrics.restarted += 1,
                        Some(Err(err)) => {
                            let detail = format!(
                                "Failed to call {}: {}",
                                callback,
                                self.describe_error(&err)
                            );
                            self.log(LogLevel::Err, Some(id), detail);
                            self.metrics.failed_restarts += 1;
                        }
                    }

                    *self
                        .triggered
                        .entry(id)
                        .or_default()
                        .entry(callback)
                        .or_insert(0) += 1;
                    triggered_events.push(Event::new(TRIGGERED, id, Some(self.id), message));
                }
            }
            current = self.catalog.parent(id);
        }

        triggered_events
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::super::{Transaction, TransactionOptions};
    use crate::catalog::Catalog;
    use crate::change::{Change, TRIGGERED};
    use crate::graph::{Edge, EdgeLabel, EventFilter};
    use crate::resource::Resource;

    struct Recorder {
        name: String,
        container: bool,
        hits: Rc<Cell<u32>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &str, container: bool, hits: &Rc<Cell<u32>>) -> Box<Self> {
            Box::new(Self {
                name: name.to_string(),
                container,
                hits: Rc::clone(hits),
                fail: false,
            })
        }
    }

    impl Resource for Recorder {
        fn kind(&self) -> &str {
            "recorder"
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn is_container(&self) -> bool {
            self.container
        }

        fn evaluate(&mut self) -> anyhow::Result<Vec<Change>> {
            Ok(Vec::new())
        }

        fn run_callback(&mut self, _name: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("callback refused");
            }
            self.hits.set(self.hits.get() + 1);
            Ok(())
        }
    }

    fn restart_edge(source: crate::ResourceId, target: crate::ResourceId) -> Edge {
        Edge {
            source,
            target,
            label: EdgeLabel {
                event: EventFilter::Any,
                callback: Some("restart".to_string()),
            },
        }
    }

    #[test]
    fn test_trigger_walks_container_chain() {
        let hits = Rc::new(Cell::new(0));
        let mut catalog = Catalog::new();
        let outer = catalog
            .add_resource(Recorder::new("outer", true, &hits))
            .unwrap();
        let inner = catalog
            .add_child(outer, Recorder::new("inner", true, &hits))
            .unwrap();
        let leaf = catalog
            .add_child(inner, Recorder::new("leaf", false, &hits))
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default());
        transaction
            .targets
            .insert(outer, vec![restart_edge(leaf, outer)]);

        let events = transaction.trigger(leaf);

        // the callback queued two levels up still fires
        assert_eq!(hits.get(), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TRIGGERED);
        assert_eq!(events[0].source, outer);
        assert_eq!(transaction.metrics().restarted, 1);
        assert_eq!(transaction.triggered_count(outer, "restart"), 1);
    }

    #[test]
    fn test_trigger_groups_edges_by_callback() {
        let hits = Rc::new(Cell::new(0));
        let mut catalog = Catalog::new();
        let a = catalog.add_resource(Recorder::new("a", false, &hits)).unwrap();
        let b = catalog.add_resource(Recorder::new("b", false, &hits)).unwrap();
        let svc = catalog
            .add_resource(Recorder::new("svc", false, &hits))
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default());
        transaction
            .targets
            .insert(svc, vec![restart_edge(a, svc), restart_edge(b, svc)]);

        let events = transaction.trigger(svc);

        // two contributing subscriptions, one invocation
        assert_eq!(hits.get(), 1);
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("2 subscriptions"));
        assert_eq!(transaction.triggered_count(svc, "restart"), 1);
    }

    #[test]
    fn test_failing_callback_counts_failed_restart() {
        let hits = Rc::new(Cell::new(0));
        let mut catalog = Catalog::new();
        let svc = catalog
            .add_resource(Box::new(Recorder {
                name: "svc".to_string(),
                container: false,
                hits: Rc::clone(&hits),
                fail: true,
            }))
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default());
        transaction.targets.insert(svc, vec![restart_edge(svc, svc)]);

        let events = transaction.trigger(svc);

        assert_eq!(hits.get(), 0);
        assert_eq!(transaction.metrics().failed_restarts, 1);
        assert_eq!(transaction.metrics().restarted, 0);
        // the triggered event is synthesized regardless of the outcome
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_edges_without_callback_deliver_nothing() {
        let hits = Rc::new(Cell::new(0));
        let mut catalog = Catalog::new();
        let svc = catalog
            .add_resource(Recorder::new("svc", false, &hits))
            .unwrap();

        let mut transaction = Transaction::new(catalog, TransactionOptions::default());
        transaction.targets.insert(
            svc,
            vec![Edge {
                source: svc,
                target: svc,
                label: EdgeLabel::default(),
            }],
        );

        assert!(transaction.trigger(svc).is_empty());
        assert_eq!(hits.get(), 0);
    }
}
