//! Partyline session core.
//!
//! Orchestrates a game voice/text/data session on top of an opaque peer
//! network engine. The engine is asynchronous: requests return at once and
//! their outcomes arrive as [`engine::StateChange`]s that must be drained
//! every tick. This crate turns that queue into a small, ordered state
//! machine the host can drive with a single call per frame.
//!
//! # Architecture
//!
//! Everything runs on the host's thread. [`Session::advance`] is the only
//! place the session makes progress on its own:
//!
//! 1. release operations that were waiting for the local user,
//! 2. drain and reconcile the engine's state changes,
//! 3. let the policy provider drain its platform notifications,
//! 4. step the task sequencer (multi-tick resets).
//!
//! Host calls such as [`Session::join_network`] either act immediately or
//! stage their parameters until the session is ready for them. Failures are
//! returned, logged through `tracing` and raised as
//! [`SessionEvent::Error`].
//!
//! # Components
//!
//! - [`Session`]: connection state machine and host API
//! - [`roster::Roster`]: local and remote participants
//! - [`queue`]: staged parameters waiting on a precondition
//! - [`sequencer::TaskSequencer`]: ordered multi-tick tasks
//! - [`engine::Engine`]: the engine seam
//! - [`identity::IdentityProvider`] and [`policy::PolicyProvider`]: backend
//!   seams for sign-in and platform rules

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod identity;
pub mod network_id;
pub mod policy;
pub mod queue;
pub mod roster;
pub mod sequencer;
mod session;
pub mod state;

pub use config::{
    AccessibilityMode, DeliveryOption, LogLevel, MAX_PLAYERS, MAX_RECIPIENTS, NetworkConfiguration,
    SessionConfig,
};
pub use engine::{Engine, EngineError, StateChange};
pub use error::{ErrorKind, ErrorType, SessionError};
pub use event::{ChatMessageType, ChatState, DataListener, SessionEvent};
pub use identity::{IdentityError, IdentityProvider, LocalIdentity};
pub use network_id::NetworkId;
pub use policy::{NoPolicy, PolicyContext, PolicyProvider};
pub use roster::{EntityId, Participant, Roster};
pub use session::Session;
pub use state::{ConnectionStage, SessionStage};
