//! Choreography specification model for ChoreoAtlas
//!
//! A **FlowSpec** declares the intended cross-service choreography of a
//! distributed transaction. It binds service aliases to per-service
//! **ServiceSpec** documents and describes the call sequence in one of
//! two representations:
//!
//! - **Flow**: an ordered list of steps, where a step is either a leaf
//!   call (`alias.operationId`) or a parallel group of leaf steps whose
//!   executions must overlap.
//! - **Graph**: an explicit DAG of call nodes with `depends` edges and
//!   variable dataflow between node inputs and outputs.
//!
//! Exactly one of the two must be present. Graph edges are derived from
//! `depends` at load time, before any consumer observes them, and the
//! derivation is idempotent.
//!
//! Specs are loaded once per run and held immutable thereafter.

#![deny(unsafe_code)]

mod convert;
mod errors;
mod flow;
mod service;

pub use convert::convert_graph_to_flow;
pub use errors::{SpecError, SpecResult};
pub use flow::{
    load_flow_spec, FlowInfo, FlowSpec, FlowStep, GraphEdge, GraphNode, GraphSpec, OpIndex,
    ServiceBinding,
};
pub use service::{load_service_spec, ServiceOperation, ServiceSpecFile};
