//! Deterministic simulation harness for partyline sessions.
//!
//! [`SimNetwork`] is an in-process relay that plays the peer network engine
//! for any number of devices; [`SimEngine`] is one device's view of it,
//! implementing [`partyline_core::Engine`]. A [`Cluster`] runs one real
//! session per device on a seeded relay, so every run with the same seed
//! produces the same handles, drops and events.
//!
//! # Model-Based Testing
//!
//! The `model` module provides reference behaviour for the request gate and
//! the engine traffic of a reset, plus the random [`Operation`]s a cluster
//! accepts.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold between ticks
//! on every path a random operation sequence takes. Use
//! [`InvariantRegistry::standard()`] for the common session invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod invariants;
pub mod model;
pub mod scripted;
pub mod sim_engine;
pub mod sim_network;

pub use cluster::{APP_ID, Cluster, SETTLE_TICKS, SimSession, entity_id};
pub use error::SimError;
pub use invariants::{
    ExclusiveRequests, HandlesSetOnce, Invariant, InvariantKind, InvariantRegistry,
    InvariantResult, RosterUniqueness, SessionSnapshot, StageConsistency, SystemSnapshot,
    Violation,
};
pub use model::{GateModel, GateOp, ModelRequest, Operation, PeerId, expected_reset_calls};
pub use scripted::{ScriptedIdentity, ScriptedPlatform};
pub use sim_engine::SimEngine;
pub use sim_network::{
    DeviceId, SharedSimNetwork, SimNetwork, TrafficStats, create_shared_network, lock,
};
