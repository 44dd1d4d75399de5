//! Session error types.
//!
//! Every failure the session can report, grouped by how it arises:
//! configuration errors and precondition errors are rejected before any
//! engine call; engine errors come back from a synchronous engine call;
//! completion errors arrive later in the state change queue.
//!
//! All of them travel the same channel: they are logged and pushed to the
//! host as [`crate::SessionEvent::Error`]. Public operations additionally
//! return them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    engine::{AudioDirection, EngineError},
    roster::EntityId,
    state::ConnectionStage,
};

/// Errors reported by the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No application id was configured
    #[error("app id cannot be empty")]
    MissingAppId,

    /// Requested player count is outside the supported range
    #[error("max player count {requested} is out of range, must be between 1 and {max}")]
    InvalidPlayerCount {
        /// Requested maximum
        requested: u32,
        /// Largest supported value
        max: u32,
    },

    /// Empty network identity
    #[error("network id cannot be empty")]
    MissingNetworkId,

    /// Network identity without a separator or with an empty side
    #[error("network id is not in the expected format")]
    MalformedNetworkId,

    /// Data message without bytes
    #[error("data message cannot be empty")]
    EmptyPayload,

    /// More recipients than the engine can address in one send
    #[error("too many recipients: {count} exceeds the maximum of {max}")]
    TooManyRecipients {
        /// Recipients requested
        count: usize,
        /// Maximum recipients
        max: usize,
    },

    /// Voice level outside `[0, 1]`
    #[error("value {level} is out of range, must be between 0 and 1")]
    VoiceLevelOutOfRange {
        /// Rejected level
        level: f32,
    },

    /// Neither the policy provider nor the identity provider has a user
    #[error("no user is logged in, sign in before creating or joining a network")]
    NoUserLoggedIn,

    /// Operation requires a connected network
    #[error("connect to a network before calling this method (stage {stage:?})")]
    NotConnected {
        /// Stage when the call was made
        stage: ConnectionStage,
    },

    /// Operation requires the local user to exist
    #[error("the local user has not been created yet")]
    NoLocalUser,

    /// No participant with this identity
    #[error("participant not found: {entity_id}")]
    ParticipantNotFound {
        /// Identity that was looked up
        entity_id: EntityId,
    },

    /// Synchronous engine call failed
    #[error("{operation} failed: {source}")]
    Engine {
        /// Engine call that failed
        operation: &'static str,
        /// Engine failure
        source: EngineError,
    },

    /// Asynchronous engine operation reported failure
    #[error("{operation} completed with failure: {source}")]
    Completion {
        /// Operation that completed
        operation: &'static str,
        /// Engine failure
        source: EngineError,
    },

    /// The identity backend could not produce a token
    #[error("identity request failed: {reason}")]
    Identity {
        /// Backend-provided reason
        reason: String,
    },

    /// The engine found no audio device
    #[error("no audio {direction:?} device found")]
    NoAudioDevice {
        /// Input or output
        direction: AudioDirection,
    },
}

/// Which part of the taxonomy an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad arguments; rejected before any engine call.
    Configuration,
    /// Called in a stage that does not allow it; rejected before any engine
    /// call.
    Precondition,
    /// A synchronous engine call failed.
    Engine,
    /// An asynchronous engine operation reported failure.
    Completion,
    /// The identity backend failed.
    Identity,
}

/// Severity of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorType {
    /// Something the host asked for did not happen.
    Error,
    /// Degraded but working.
    Warning,
}

impl SessionError {
    /// Taxonomy group of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingAppId
            | Self::InvalidPlayerCount { .. }
            | Self::MissingNetworkId
            | Self::MalformedNetworkId
            | Self::EmptyPayload
            | Self::TooManyRecipients { .. }
            | Self::VoiceLevelOutOfRange { .. } => ErrorKind::Configuration,
            Self::NoUserLoggedIn
            | Self::NotConnected { .. }
            | Self::NoLocalUser
            | Self::ParticipantNotFound { .. } => ErrorKind::Precondition,
            Self::Engine { .. } => ErrorKind::Engine,
            Self::Completion { .. } | Self::NoAudioDevice { .. } => ErrorKind::Completion,
            Self::Identity { .. } => ErrorKind::Identity,
        }
    }

    /// Numeric code reported to the host.
    ///
    /// Engine failures report the engine's own code; everything else uses a
    /// stable code above the engine's range.
    pub fn code(&self) -> u32 {
        match self {
            Self::Engine { source, .. } | Self::Completion { source, .. } => source.code,
            Self::NoAudioDevice { .. } => EngineError::RESOURCE_NOT_FOUND,
            Self::MissingAppId => 10_001,
            Self::InvalidPlayerCount { .. } => 10_002,
            Self::MissingNetworkId => 10_003,
            Self::MalformedNetworkId => 10_004,
            Self::EmptyPayload => 10_005,
            Self::TooManyRecipients { .. } => 10_006,
            Self::VoiceLevelOutOfRange { .. } => 10_007,
            Self::NoUserLoggedIn => 10_101,
            Self::NotConnected { .. } => 10_102,
            Self::NoLocalUser => 10_103,
            Self::ParticipantNotFound { .. } => 10_104,
            Self::Identity { .. } => 10_201,
        }
    }

    /// Severity reported to the host.
    pub fn severity(&self) -> ErrorType {
        match self {
            Self::NoAudioDevice { .. } => ErrorType::Warning,
            _ => ErrorType::Error,
        }
    }

    /// Returns true if the error was raised before any engine call.
    pub fn is_rejection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Precondition)
    }
}
