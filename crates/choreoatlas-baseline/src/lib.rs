//! Baseline gate for ChoreoAtlas
//!
//! Reduces a run's step and condition outcomes to a PASS/FAIL gate
//! decision, in one of two modes:
//!
//! - **Absolute**: coverage ratios must meet fixed thresholds.
//! - **Relative**: a previously recorded baseline supplies the
//!   reference; the thresholds become *tolerated degradation
//!   fractions* and the gate passes while the deltas stay above the
//!   allowed drop.
//!
//! A baseline records which steps were covered and which conditions
//! passed, together with a `sha256:` hash of the flow file so drifting
//! specs are detectable.

#![deny(unsafe_code)]

mod errors;
mod gate;
mod record;

pub use errors::{BaselineError, BaselineResult};
pub use gate::{evaluate_gate, GateResult, ThresholdConfig};
pub use record::{load_baseline, record_baseline, save_baseline, BaselineRecord};
