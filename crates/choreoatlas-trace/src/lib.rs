//! Trace model for ChoreoAtlas
//!
//! A **Trace** is the observed side of a distributed transaction: a
//! collection of **Span**s, each recording one service operation with
//! its timing and attributes. Two wire formats are decoded into the
//! same internal model:
//!
//! - **Native JSON**: an explicit `{ "spans": [...] }` document.
//! - **OTLP-JSON**: the standard `resourceSpans[].scopeSpans[].spans[]`
//!   shape. The decoder projects OTLP attribute values to native
//!   types, copies trace/span/parent ids under `otlp.*` keys, extracts
//!   the resource `service.name`, and synthesises `response.status`
//!   when the span carries an OK status without an HTTP status code.
//!
//! Traces are loaded once per run and read-only afterwards.

#![deny(unsafe_code)]

mod errors;
mod native;
mod otlp;
mod span;

pub use errors::{TraceError, TraceResult};
pub use native::load_trace;
pub use otlp::load_otlp_trace;
pub use span::{Span, Trace};
