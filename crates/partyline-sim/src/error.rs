//! Simulator errors.

use std::path::PathBuf;

use partyline_core::SessionError;
use partyline_harness::SimError;
use thiserror::Error;

/// Errors that end a simulation run.
#[derive(Error, Debug)]
pub enum RunError {
    /// Arguments describe an impossible network
    #[error("invalid network configuration: {0}")]
    Config(#[from] SessionError),

    /// The cluster could not be set up
    #[error("simulation setup failed: {0}")]
    Setup(#[from] SimError),

    /// Session invariants were broken during the run
    #[error("{count} invariant violations")]
    Violations {
        /// Violations recorded
        count: usize,
    },

    /// The report could not be encoded
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),

    /// The report could not be written
    #[error("failed to write report to {}: {source}", path.display())]
    Write {
        /// Report destination
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },
}
