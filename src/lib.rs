// src/lib.rs

//! Converge
//!
//! Transactional configuration engine. A caller declares resources (desired
//! states of system objects such as files, services, packages) and the
//! relationships between them; the engine builds a relationship graph,
//! orders it topologically, and drives each resource from observed to
//! desired state. Along the way it records metrics, routes events along
//! subscription edges, triggers callbacks on subscribers, skips resources
//! whose dependencies failed, and can roll back applied changes in reverse
//! order.
//!
//! # Architecture
//!
//! - Catalog: arena of resources plus the container hierarchy
//! - Relationship graph: declared edges, spliced containers, auto-requires
//! - Transaction: sequential evaluator with partial-failure semantics
//! - Report: counters, aggregate timings, captured log entries
//!
//! Resource and provider implementations (the code that actually reads
//! and writes the system) live outside this crate, behind the `Resource`
//! and `Provider` traits.

pub mod catalog;
pub mod change;
mod error;
pub mod graph;
pub mod relationship;
pub mod report;
pub mod resource;
pub mod transaction;

pub use catalog::{Catalog, ResourceId};
pub use change::{Change, ChangeOp, Event, TRIGGERED};
pub use error::{Error, Result};
pub use graph::{Direction, Edge, EdgeLabel, EventFilter, Graph};
pub use report::{LogEntry, LogLevel, Metric, Report, ResourceMetrics};
pub use resource::{Component, Provider, RelationKind, Relationship, Resource, ResourceRef};
pub use transaction::{parse_tag_spec, Transaction, TransactionOptions};
