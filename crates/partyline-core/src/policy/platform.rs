//! Reference platform policy.
//!
//! Peers tell each other their platform identity with a small internal data
//! message. Platform work that needs a remote's identity waits until that
//! message has arrived:
//!
//! - registering the remote with the platform waits in a keyed queue, one
//!   entry per remote;
//! - a permission update needs both the local and the target identity and
//!   waits in a single slot. A newer update replaces a waiting one, even
//!   for a different pair.

use std::collections::HashMap;

use crate::{
    config::DeliveryOption,
    engine::{ChatPermissions, EngineError, TranscriptionOptions},
    error::SessionError,
    identity::{IdentityError, LocalIdentity},
    policy::{PolicyContext, PolicyProvider},
    queue::{KeyedQueue, Staged},
    roster::{EntityId, Participant, Roster},
};

/// Prefix of the identity exchange message.
pub const IDENTITY_MESSAGE_PREFIX: &str = "PFP-PLATFORM-ID:";

/// Notification from the platform backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformNotice {
    /// Sign-in finished.
    SignInCompleted(Result<LocalIdentity, IdentityError>),
    /// The permissions required between two platform users changed.
    RequiredPermissionsChanged(PermissionUpdate),
}

/// Permission update between two platform users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionUpdate {
    /// Platform id of the local user.
    pub local_platform_id: String,
    /// Platform id of the remote user.
    pub target_platform_id: String,
}

/// Platform services behind [`PlatformPolicy`].
pub trait PlatformBackend {
    /// Start signing in the platform user.
    fn sign_in(&mut self);

    /// Platform id of the signed-in user.
    fn local_platform_id(&self) -> Option<String>;

    /// Make a remote platform user known to the platform.
    fn register_remote_user(&mut self, platform_id: &str) -> Result<(), EngineError>;

    /// Notifications since the last call, in order.
    fn poll_notices(&mut self) -> Vec<PlatformNotice>;

    /// Platform accessibility preference for text-to-speech.
    fn text_to_speech_enabled(&self) -> bool {
        false
    }

    /// Platform accessibility preference for speech-to-text.
    fn speech_to_text_enabled(&self) -> bool {
        false
    }

    /// Drop platform state. Returns `false` if the platform refused.
    fn clean_up(&mut self) -> bool {
        true
    }
}

/// Policy provider exchanging platform identities between peers.
#[derive(Debug)]
pub struct PlatformPolicy<B> {
    backend: B,
    registrations: KeyedQueue<EntityId, ()>,
    permission_update: Staged<PermissionUpdate>,
    permissions: HashMap<EntityId, ChatPermissions>,
}

impl<B: PlatformBackend> PlatformPolicy<B> {
    /// Create a new policy over `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            registrations: KeyedQueue::new(),
            permission_update: Staged::new(),
            permissions: HashMap::new(),
        }
    }

    /// The platform backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable platform backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Remotes waiting for their platform identity before registration.
    pub fn pending_registrations(&self) -> impl Iterator<Item = &EntityId> {
        self.registrations.keys()
    }

    /// Permission update waiting for platform identities.
    pub fn pending_permission_update(&self) -> Option<&PermissionUpdate> {
        self.permission_update.params()
    }

    /// Request a permission update; runs now if both identities are known,
    /// otherwise waits.
    pub fn request_permission_update(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        update: PermissionUpdate,
    ) {
        if is_ready(ctx.roster(), &update) {
            self.complete_permission_update(ctx, &update);
            return;
        }

        if self.permission_update.stage(update) {
            tracing::debug!("permission update replaced a waiting one");
        }
    }

    fn complete_permission_update(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        update: &PermissionUpdate,
    ) {
        let Some(local) = ctx.roster().local().chat_control() else {
            ctx.report(SessionError::NoLocalUser);
            return;
        };
        let Some((entity_id, target)) = ctx
            .roster()
            .by_platform_id(&update.target_platform_id)
            .filter(|p| !p.is_local())
            .and_then(|p| p.chat_control().map(|c| (p.entity_id().clone(), c)))
        else {
            return;
        };

        let permissions = match ctx.engine().get_permissions(local, target) {
            Ok(permissions) => permissions,
            Err(source) => {
                ctx.report(SessionError::Engine { operation: "get_permissions", source });
                return;
            },
        };

        match ctx.apply_platform_permissions(&entity_id, permissions) {
            Ok(()) => {
                tracing::debug!(
                    entity_id = %entity_id,
                    bits = permissions.bits(),
                    "platform permissions applied"
                );
                self.permissions.insert(entity_id, permissions);
            },
            Err(err) => ctx.report(err),
        }
    }

    fn register_remote(&mut self, ctx: &mut PolicyContext<'_>, entity_id: &EntityId) {
        let Some(platform_id) =
            ctx.roster().remote(entity_id).and_then(Participant::platform_id).map(str::to_owned)
        else {
            self.registrations.insert(entity_id.clone(), ());
            return;
        };

        if let Err(source) = self.backend.register_remote_user(&platform_id) {
            // retried from the queue next tick
            self.registrations.insert(entity_id.clone(), ());
            ctx.report(SessionError::Engine { operation: "register_remote_user", source });
            return;
        }
        self.registrations.remove(entity_id);
    }
}

/// Both users of `update` have a chat control and a known platform id.
fn is_ready(roster: &Roster, update: &PermissionUpdate) -> bool {
    let has_control =
        |id: &str| roster.by_platform_id(id).is_some_and(|p| p.chat_control().is_some());
    has_control(&update.local_platform_id) && has_control(&update.target_platform_id)
}

/// Platform id carried by an identity exchange message.
fn parse_identity_message(payload: &[u8]) -> Option<&str> {
    std::str::from_utf8(payload)
        .ok()?
        .strip_prefix(IDENTITY_MESSAGE_PREFIX)
        .filter(|id| !id.is_empty())
}

impl<B: PlatformBackend> PolicyProvider for PlatformPolicy<B> {
    fn handles_sign_in(&self) -> bool {
        true
    }

    fn sign_in(&mut self, _ctx: &mut PolicyContext<'_>) {
        self.backend.sign_in();
    }

    fn create_or_update_platform_user(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        entity_id: &EntityId,
        is_local: bool,
    ) {
        if !is_local {
            self.register_remote(ctx, entity_id);
            return;
        }

        if let Some(platform_id) = self.backend.local_platform_id() {
            ctx.roster_mut().local_mut().set_platform_id(platform_id);
        }
    }

    fn send_platform_identity(&mut self, ctx: &mut PolicyContext<'_>, targets: &[EntityId]) {
        let Some(platform_id) = self.backend.local_platform_id() else {
            return;
        };

        let message = format!("{IDENTITY_MESSAGE_PREFIX}{platform_id}");
        if let Err(err) = ctx.send_data(targets, message.as_bytes(), DeliveryOption::Guaranteed) {
            ctx.report(err);
        }
    }

    fn chat_permissions(&self, target: &Participant) -> ChatPermissions {
        self.permissions.get(target.entity_id()).copied().unwrap_or(ChatPermissions::ALL)
    }

    fn transcription_preference(&self) -> TranscriptionOptions {
        if self.backend.speech_to_text_enabled() {
            TranscriptionOptions::OTHERS_MATCHING_LANGUAGE
        } else {
            TranscriptionOptions::NONE
        }
    }

    fn is_text_to_speech_enabled(&self) -> bool {
        self.backend.text_to_speech_enabled()
    }

    fn process_endpoint_message(
        &mut self,
        ctx: &mut PolicyContext<'_>,
        from: &EntityId,
        payload: &[u8],
    ) -> bool {
        let Some(platform_id) = parse_identity_message(payload) else {
            return false;
        };

        match ctx.roster_mut().remote_mut(from) {
            Some(participant) => participant.set_platform_id(platform_id),
            None => ctx.report(SessionError::ParticipantNotFound { entity_id: from.clone() }),
        }
        true
    }

    fn process_queued_operations(&mut self, ctx: &mut PolicyContext<'_>) {
        if let Some(update) = self.permission_update.release_if(|u| is_ready(ctx.roster(), u)) {
            self.complete_permission_update(ctx, &update);
        }

        let backend = &mut self.backend;
        self.registrations.drain_completed(|entity_id, ()| {
            let Some(platform_id) =
                ctx.roster().remote(entity_id).and_then(Participant::platform_id)
            else {
                // participant left before its identity arrived
                return ctx.roster().remote(entity_id).is_none();
            };
            match backend.register_remote_user(platform_id) {
                Ok(()) => true,
                Err(source) => {
                    ctx.report(SessionError::Engine { operation: "register_remote_user", source });
                    false
                },
            }
        });
    }

    fn process_state_changes(&mut self, ctx: &mut PolicyContext<'_>) {
        for notice in self.backend.poll_notices() {
            match notice {
                PlatformNotice::SignInCompleted(result) => ctx.complete_sign_in(result),
                PlatformNotice::RequiredPermissionsChanged(update) => {
                    self.request_permission_update(ctx, update);
                },
            }
        }
    }

    fn clean_up(&mut self) -> bool {
        self.registrations.clear();
        self.permission_update.cancel();
        self.permissions.clear();
        self.backend.clean_up()
    }
}
