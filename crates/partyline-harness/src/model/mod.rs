//! Reference models for model-based testing.
//!
//! - [`Operation`]: random host operations applied to a cluster
//! - [`GateModel`]: single-slot oracle for the create/join request gate
//! - [`expected_reset_calls`]: engine call order of a full reset

mod gate;
mod operation;
mod reset;

pub use gate::{GateModel, GateOp, ModelRequest};
pub use operation::{Operation, PeerId};
pub use reset::{RESET_CALLS, expected_reset_calls, reset_calls};
