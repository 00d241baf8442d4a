//! Validation engine for ChoreoAtlas
//!
//! Turns a FlowSpec, its ServiceSpecs, and an observed trace into
//! per-step PASS/FAIL/SKIP results. Four cooperating pieces:
//!
//! - **Static lint**: structural, call-resolution, and dataflow checks
//!   over the spec alone, before any trace is read.
//! - **Call graph**: spans linked by parent, follows, and concurrent
//!   edges, with tolerance-aware constraint checks.
//! - **Matching engine**: binds steps/nodes to spans under one of
//!   three strategies (time-sequence, causality, DAG), selected
//!   deterministically from the spec shape and trace metadata.
//! - **Condition evaluator**: projects a matched span into a variable
//!   environment and evaluates CEL-style pre/postconditions, with
//!   SKIP-on-unsupported semantics.
//!
//! The whole pass is synchronous and deterministic: ordering is driven
//! by declared spec order, Kahn topological order with lexicographic
//! tie-break, and ascending span start times.

#![deny(unsafe_code)]

mod callgraph;
mod conditions;
mod engine;
mod expr;
mod lint;
mod matching;
mod result;

pub use callgraph::{
    CallEdge, CallGraph, CallGraphStats, CallNode, CycleError, EdgeRelationship, EdgeViolation,
    ViolationKind,
};
pub use conditions::{evaluate_conditions, evaluate_conditions_with};
pub use engine::{validate_against_trace, CausalityMode, ValidationConfig};
pub use expr::{CelEngine, Env, ExprEngine, ExprError, Program};
pub use lint::{has_errors, lint_flow, IssueLevel, LintIssue};
pub use matching::{normalize, split_call};
pub use result::{ConditionKind, ConditionResult, StepResult, StepStatus};
