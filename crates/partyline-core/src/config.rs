//! Session and network configuration.

use serde::{Deserialize, Serialize};

use crate::{
    engine::{DirectPeerConnectivity, EngineNetworkConfig, SendOptions},
    error::SessionError,
};

/// Largest network the session will create.
pub const MAX_PLAYERS: u32 = 32;

/// Most recipients a single data or chat message may name.
pub const MAX_RECIPIENTS: usize = MAX_PLAYERS as usize;

/// How much the session logs about its own successful steps.
///
/// Errors and warnings are always logged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    /// Only errors and warnings.
    None,
    /// Stage transitions and network lifecycle.
    #[default]
    Minimal,
    /// Every operation and state change.
    Verbose,
}

/// Accessibility feature switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessibilityMode {
    /// Off.
    #[default]
    None,
    /// On.
    Enabled,
    /// Whatever the platform policy provider prefers.
    PlatformDefault,
}

/// Delivery guarantee for a data message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryOption {
    /// May be dropped.
    BestEffort,
    /// Retransmitted until acknowledged.
    #[default]
    Guaranteed,
}

impl From<DeliveryOption> for SendOptions {
    fn from(delivery: DeliveryOption) -> Self {
        Self {
            guaranteed: delivery == DeliveryOption::Guaranteed,
            sequential: true,
            coalesce: true,
        }
    }
}

/// Parameters for creating a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    /// Maximum number of players, `1..=MAX_PLAYERS`.
    pub max_player_count: u32,
    /// Which peers may connect directly.
    pub direct_peer_connectivity: DirectPeerConnectivity,
}

impl Default for NetworkConfiguration {
    fn default() -> Self {
        Self {
            max_player_count: MAX_PLAYERS,
            direct_peer_connectivity: DirectPeerConnectivity::default(),
        }
    }
}

impl NetworkConfiguration {
    /// Check the configuration before any engine call.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.max_player_count == 0 || self.max_player_count > MAX_PLAYERS {
            return Err(SessionError::InvalidPlayerCount {
                requested: self.max_player_count,
                max: MAX_PLAYERS,
            });
        }
        Ok(())
    }

    /// Engine limits for this configuration: one user, one device and one
    /// endpoint per player.
    pub fn to_engine_config(&self) -> EngineNetworkConfig {
        EngineNetworkConfig {
            max_user_count: self.max_player_count,
            max_device_count: self.max_player_count,
            max_users_per_device: 1,
            max_devices_per_user: 1,
            max_endpoints_per_device: 1,
            direct_peer_connectivity: self.direct_peer_connectivity,
        }
    }
}

/// Session configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Application id passed to the engine at initialization.
    pub app_id: String,
    /// Diagnostic verbosity.
    pub log_level: LogLevel,
    /// Speak outgoing chat text.
    pub text_to_speech: AccessibilityMode,
    /// Transcribe incoming voice.
    pub speech_to_text: AccessibilityMode,
    /// Translate incoming chat text.
    pub translate_chat: bool,
    /// Language code for the local chat control. `None` uses the engine
    /// default.
    pub language: Option<String>,
    /// Queue an owned copy of every data message as
    /// [`crate::SessionEvent::DataReceived`].
    pub copy_data_messages: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            log_level: LogLevel::default(),
            text_to_speech: AccessibilityMode::None,
            speech_to_text: AccessibilityMode::None,
            translate_chat: false,
            language: None,
            copy_data_messages: true,
        }
    }
}

impl SessionConfig {
    /// Configuration for `app_id` with every other field defaulted.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), ..Self::default() }
    }
}
