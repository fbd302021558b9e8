// src/relationship/mod.rs

//! Relationship graph construction
//!
//! Derives the evaluation-time graph from a catalog in four steps:
//! declared edges, container splicing, auto-required edges, and a
//! topological sort. The result contains no container vertices; every
//! external edge of a container has been redistributed onto its member
//! closure.

use tracing::debug;

use crate::catalog::{Catalog, ResourceId};
use crate::error::{Error, Result};
use crate::graph::{EdgeLabel, EventFilter, Graph};
use crate::resource::RelationKind;

/// Build the relationship graph and its evaluation order
///
/// Fails when a declared relationship names a resource missing from the
/// catalog or when the resulting graph is cyclic; both stop the transaction
/// before any resource runs.
pub fn build(catalog: &Catalog) -> Result<(Graph, Vec<ResourceId>)> {
    let mut graph = Graph::new();

    // declared edges
    for id in catalog.ids() {
        graph.add_vertex(id);
        let Some(resource) = catalog.get(id) else {
            continue;
        };
        for relationship in resource.relationships() {
            let Some(other) = catalog.find(&relationship.target) else {
                return Err(Error::MissingDependency {
                    depender: catalog.reference(id),
                    target: relationship.target.to_string(),
                });
            };
            let (source, target) = match relationship.kind {
                RelationKind::Require | RelationKind::Subscribe => (other, id),
                RelationKind::Before | RelationKind::Notify => (id, other),
            };
            let event = match relationship.kind {
                RelationKind::Require | RelationKind::Before => EventFilter::None,
                RelationKind::Notify | RelationKind::Subscribe => EventFilter::Any,
            };
            graph.add_edge(
                source,
                target,
                EdgeLabel {
                    event,
                    callback: relationship.callback.clone(),
                },
            );
        }
    }

    // redistribute container-incident edges onto member closures
    let containment = catalog.containment_graph();
    graph.splice(&containment, |id| catalog.is_container(id));

    // implicit edges, only where no explicit edge already exists
    for id in graph.vertices().collect::<Vec<_>>() {
        let Some(resource) = catalog.get(id) else {
            continue;
        };
        for wanted in resource.autorequire(catalog) {
            let Some(dependency) = catalog.find(&wanted) else {
                debug!(resource = %catalog.reference(id), target = %wanted,
                    "autorequire target not in catalog");
                continue;
            };
            if dependency == id || catalog.is_container(dependency) {
                continue;
            }
            if graph.has_edge(dependency, id) {
                continue;
            }
            debug!(resource = %catalog.reference(id), dependency = %wanted, "autorequiring");
            graph.add_edge(dependency, id, EdgeLabel::default());
        }
    }

    let sorted = match graph.topsort() {
        Ok(sorted) => sorted,
        Err(Error::DependencyCycle(_)) => {
            // rebuild the message with resource references instead of ids
            let cycle = graph.find_cycle().unwrap_or_default();
            let path = cycle
                .iter()
                .map(|id| catalog.reference(*id))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::DependencyCycle(path));
        }
        Err(other) => return Err(other),
    };

    Ok((graph, sorted))
}
