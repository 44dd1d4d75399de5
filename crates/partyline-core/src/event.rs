//! Events the session raises for the host.
//!
//! The session queues events in the order they happen; the host drains them
//! with [`crate::Session::take_events`] after each advance. Data messages can
//! additionally be observed without a copy through a [`DataListener`], which
//! sees the engine's buffer before it is handed back.

use bytes::Bytes;

use crate::{
    error::{ErrorKind, ErrorType, SessionError},
    network_id::NetworkId,
    roster::Participant,
};

/// Borrowed-buffer observer for incoming data messages.
pub type DataListener = Box<dyn FnMut(&Participant, &[u8])>;

/// How a chat message was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatMessageType {
    /// Typed text.
    Text,
    /// Transcribed voice.
    SpeechToText,
}

/// Talking indicator of a participant, as the host should display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatState {
    /// No microphone, or the participant has no chat control yet.
    NoAudioInput,
    /// Muted locally.
    Muted,
    /// Muted by platform policy.
    MutedByPlatform,
    /// Not speaking.
    Silent,
    /// Speaking.
    Talking,
}

/// Event raised to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The local participant is connected and ready.
    NetworkJoined {
        /// Identity to share with other players.
        network_id: NetworkId,
    },

    /// The local participant left the network.
    NetworkLeft {
        /// Identity of the network that was left, if one was published.
        network_id: Option<NetworkId>,
    },

    /// The network identity changed; peers should use the new one.
    NetworkChanged {
        /// New identity.
        network_id: NetworkId,
    },

    /// A remote participant joined.
    RemoteJoined {
        /// Snapshot of the participant as it joined.
        participant: Participant,
    },

    /// A remote participant left.
    RemoteLeft {
        /// Snapshot of the participant as it left.
        participant: Participant,
    },

    /// A chat message arrived.
    ChatReceived {
        /// Sender (the local participant for self-transcriptions).
        from: Participant,
        /// Translated text if available, otherwise the original.
        message: String,
        /// Typed or transcribed.
        kind: ChatMessageType,
    },

    /// A data message arrived.
    DataReceived {
        /// Sender.
        from: Participant,
        /// Owned copy of the message bytes.
        payload: Bytes,
    },

    /// Something failed or degraded.
    Error {
        /// Numeric code; the engine's code for engine failures.
        code: u32,
        /// Human-readable description.
        message: String,
        /// Error or warning.
        error_type: ErrorType,
        /// Taxonomy group.
        kind: ErrorKind,
    },
}

impl From<&SessionError> for SessionEvent {
    fn from(err: &SessionError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            error_type: err.severity(),
            kind: err.kind(),
        }
    }
}

impl SessionEvent {
    /// `true` for [`Self::Error`] events of [`ErrorType::Error`] severity.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { error_type: ErrorType::Error, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_carries_code_and_severity() {
        let event = SessionEvent::from(&SessionError::EmptyPayload);
        assert!(event.is_error());
        assert!(matches!(
            event,
            SessionEvent::Error { code: 10_005, kind: ErrorKind::Configuration, .. }
        ));
    }
}
