//! Session state machine.
//!
//! The `Session` owns the engine, the roster and every piece of per-network
//! state. Host calls are synchronous; anything that depends on an engine
//! completion or on the local user existing is finished later, inside
//! [`Session::advance`].

mod messaging;
mod network;
mod reconciler;

use crate::{
    config::{AccessibilityMode, LogLevel, SessionConfig},
    engine::{
        ChatControlHandle, EndpointHandle, Engine, EngineError, EngineHandle, EngineResult,
        LocalUserHandle, NetworkDescriptor, NetworkHandle, TextChatOptions, TranscriptionOptions,
    },
    error::{ErrorType, SessionError},
    event::{DataListener, SessionEvent},
    identity::{IdentityError, IdentityProvider, LocalIdentity},
    network_id::NetworkId,
    policy::{NoPolicy, PolicyContext, PolicyOutcome, PolicyProvider},
    queue::{NetworkRequest, NetworkRequests},
    roster::{EntityId, Participant, Roster},
    sequencer::{ResetTask, SessionControl, TaskSequencer, reset_plan},
    state::{ConnectionStage, SessionStage},
};

/// Voice/text/data session over an engine `E`.
///
/// `I` supplies the local identity unless the policy provider `P` handles
/// sign-in itself.
pub struct Session<E, I, P = NoPolicy> {
    /// Configuration; accessibility fields may change at runtime.
    config: SessionConfig,

    /// Network/voice engine.
    engine: E,

    /// Identity backend.
    identity: I,

    /// Platform policy provider.
    policy: P,

    /// Current connection stage.
    stage: ConnectionStage,

    /// Local and remote participants.
    roster: Roster,

    /// Engine handle, set while initialized.
    engine_handle: Option<EngineHandle>,

    /// Engine user for the local identity, set once identity resolved.
    local_user: Option<LocalUserHandle>,

    /// Network being connected to, or connected.
    network: Option<NetworkHandle>,

    /// Descriptor of `network`.
    descriptor: Option<NetworkDescriptor>,

    /// Invitation used to authenticate on `network`.
    invitation_id: Option<String>,

    /// Identity published to the host.
    network_id: Option<NetworkId>,

    /// Requests waiting for the local user.
    requests: NetworkRequests,

    /// Requests waiting for the current network to be destroyed.
    after_leave: NetworkRequests,

    /// A leave has been issued and its completion not yet seen.
    leaving: bool,

    /// Chat controls of every remote, for broadcast chat.
    chat_controls: Vec<ChatControlHandle>,

    /// Reused buffer for targeted chat recipients.
    control_scratch: Vec<ChatControlHandle>,

    /// Reused buffer for targeted data recipients.
    endpoint_scratch: Vec<EndpointHandle>,

    /// Multi-tick tasks (session reset).
    sequencer: TaskSequencer<ResetTask>,

    /// Events not yet taken by the host.
    events: Vec<SessionEvent>,

    /// Borrowed-buffer data message observer.
    data_listener: Option<DataListener>,
}

impl<E: Engine, I: IdentityProvider> Session<E, I, NoPolicy> {
    /// Create a session without a platform policy.
    pub fn new(config: SessionConfig, engine: E, identity: I) -> Self {
        Self::with_policy(config, engine, identity, NoPolicy)
    }
}

impl<E, I, P> Session<E, I, P>
where
    E: Engine,
    I: IdentityProvider,
    P: PolicyProvider,
{
    /// Create a session with a platform policy provider.
    pub fn with_policy(config: SessionConfig, engine: E, identity: I, policy: P) -> Self {
        Self {
            config,
            engine,
            identity,
            policy,
            stage: ConnectionStage::NotInitialized,
            roster: Roster::new(),
            engine_handle: None,
            local_user: None,
            network: None,
            descriptor: None,
            invitation_id: None,
            network_id: None,
            requests: NetworkRequests::default(),
            after_leave: NetworkRequests::default(),
            leaving: false,
            chat_controls: Vec::new(),
            control_scratch: Vec::new(),
            endpoint_scratch: Vec::new(),
            sequencer: TaskSequencer::new(),
            events: Vec::new(),
            data_listener: None,
        }
    }

    /// Stage as exposed to the host.
    pub fn stage(&self) -> SessionStage {
        self.stage.public()
    }

    /// Internal connection stage.
    pub fn connection_stage(&self) -> ConnectionStage {
        self.stage
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Identity of the connected network, once published.
    pub fn network_id(&self) -> Option<&NetworkId> {
        self.network_id.as_ref()
    }

    /// The local participant.
    pub fn local_participant(&self) -> &Participant {
        self.roster.local()
    }

    /// Remote participants in join order.
    pub fn remote_participants(&self) -> &[Participant] {
        self.roster.remotes()
    }

    /// Any participant by identity, local included.
    pub fn participant(&self, entity_id: &EntityId) -> Option<&Participant> {
        self.roster.participant(entity_id)
    }

    /// Full roster.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Mutable engine.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Mutable identity backend.
    pub fn identity_mut(&mut self) -> &mut I {
        &mut self.identity
    }

    /// The policy provider.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable policy provider.
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Requests waiting for the local user.
    pub fn pending_requests(&self) -> &NetworkRequests {
        &self.requests
    }

    /// Requests waiting for the current network to be torn down.
    pub fn requests_after_leave(&self) -> &NetworkRequests {
        &self.after_leave
    }

    /// `true` between a leave request and its completion.
    pub fn is_leaving(&self) -> bool {
        self.leaving
    }

    /// `true` while a reset is still running.
    pub fn is_resetting(&self) -> bool {
        self.sequencer.has_work()
    }

    /// Take every event raised since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Observe data messages in the engine's buffer, before any copy.
    pub fn set_data_listener(&mut self, listener: impl FnMut(&Participant, &[u8]) + 'static) {
        self.data_listener = Some(Box::new(listener));
    }

    /// Remove the data listener.
    pub fn clear_data_listener(&mut self) {
        self.data_listener = None;
    }

    /// Initialize the engine.
    ///
    /// A no-op once initialized. An empty application id is rejected
    /// without touching the engine.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        if self.stage > ConnectionStage::PendingInitialization {
            return Ok(());
        }
        if self.config.app_id.is_empty() {
            return self.reject(SessionError::MissingAppId);
        }

        self.set_stage(ConnectionStage::PendingInitialization);
        match self.engine.initialize(&self.config.app_id) {
            Ok(handle) => {
                self.engine_handle = Some(handle);
                self.set_stage(ConnectionStage::Initialized);
                Ok(())
            },
            Err(source) => {
                if source.code == EngineError::ALREADY_INITIALIZED {
                    tracing::error!("engine is already initialized by another owner");
                }
                self.reject(SessionError::Engine { operation: "initialize", source })
            },
        }
    }

    /// Release the engine and forget every participant and network.
    ///
    /// If the engine refuses, nothing is released and the error is
    /// returned.
    pub fn cleanup(&mut self) -> Result<(), SessionError> {
        if self.stage == ConnectionStage::NotInitialized {
            return Ok(());
        }
        if let Some(engine) = self.engine_handle
            && let Err(source) = self.engine.cleanup(engine)
        {
            return self.reject(SessionError::Engine { operation: "cleanup", source });
        }

        if !self.policy.clean_up() {
            tracing::warn!("policy provider failed to clean up");
        }

        self.requests.cancel();
        self.after_leave.cancel();
        self.leaving = false;
        self.roster.reset();
        self.chat_controls.clear();
        self.engine_handle = None;
        self.local_user = None;
        self.network = None;
        self.descriptor = None;
        self.invitation_id = None;
        self.network_id = None;
        self.set_stage(ConnectionStage::NotInitialized);
        Ok(())
    }

    /// Abandon any reset and release the engine.
    pub fn suspend(&mut self) -> Result<(), SessionError> {
        self.sequencer.clear();
        self.cleanup()
    }

    /// Initialize again after [`Self::suspend`].
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.initialize()
    }

    /// Tear everything down and bring it back, rejoining the current
    /// network if connected. Runs over the following advances.
    ///
    /// A reset already in progress is replaced.
    pub fn reset_session(&mut self) {
        let plan = reset_plan(self.stage, self.network_id.as_ref());
        if self.logs(LogLevel::Minimal) {
            tracing::info!(stage = ?self.stage, tasks = plan.len(), "session reset scheduled");
        }
        self.sequencer.clear();
        self.sequencer.extend(plan);
    }

    /// Make progress. Call once per host tick.
    pub fn advance(&mut self) {
        if self.stage.is_initialized() {
            self.process_queued_operations();
            self.reconcile();
            self.call_policy(|policy, ctx| policy.process_state_changes(ctx));
        }

        if self.sequencer.has_work() {
            let mut sequencer = std::mem::take(&mut self.sequencer);
            sequencer.step(self);
            self.sequencer = sequencer;
        }
    }

    /// Replace the local user's identity token.
    pub fn update_entity_token(&mut self, token: &str) -> Result<(), SessionError> {
        let Some(user) = self.local_user else {
            return self.reject(SessionError::NoLocalUser);
        };
        let result = self.engine.update_local_user_token(user, token);
        self.check("update_local_user_token", result)
    }

    fn process_queued_operations(&mut self) {
        if self.requests.is_queued() && self.stage == ConnectionStage::Initialized {
            self.request_identity();
        }

        if self.stage == ConnectionStage::LoginRequestIssued
            && !self.policy.handles_sign_in()
            && let Some(result) = self.identity.poll_token()
        {
            self.complete_identity(result);
        }

        self.call_policy(|policy, ctx| policy.process_queued_operations(ctx));
    }

    /// Ask for the local identity, or reuse the local user from an earlier
    /// network.
    fn request_identity(&mut self) {
        if self.local_user.is_some() {
            self.set_stage(ConnectionStage::LocalUserCreated);
            self.release_requests();
            return;
        }

        // Stage first: the answer may arrive before the call returns.
        self.set_stage(ConnectionStage::LoginRequestIssued);
        if self.policy.handles_sign_in() {
            self.call_policy(|policy, ctx| policy.sign_in(ctx));
        } else if self.identity.is_logged_in() {
            self.identity.request_token();
        } else {
            self.requests.cancel();
            self.set_stage(ConnectionStage::Initialized);
            self.surface(&SessionError::NoUserLoggedIn);
        }
    }

    fn complete_identity(&mut self, result: Result<LocalIdentity, IdentityError>) {
        if self.stage != ConnectionStage::LoginRequestIssued {
            tracing::debug!(stage = ?self.stage, "ignoring stale identity result");
            return;
        }

        match result {
            Ok(identity) => self.create_local_user(identity),
            Err(err) => self.abandon_login(SessionError::Identity { reason: err.reason }),
        }
    }

    fn abandon_login(&mut self, err: SessionError) {
        self.requests.cancel();
        self.set_stage(ConnectionStage::Initialized);
        self.surface(&err);
    }

    fn create_local_user(&mut self, identity: LocalIdentity) {
        let Some(engine) = self.engine_handle else {
            self.abandon_login(SessionError::NoLocalUser);
            return;
        };

        let user = match self.engine.create_local_user(engine, &identity.entity_id, &identity.token)
        {
            Ok(user) => user,
            Err(source) => {
                self.abandon_login(SessionError::Engine { operation: "create_local_user", source });
                return;
            },
        };
        self.local_user = Some(user);
        self.roster.local_mut().set_entity_id(identity.entity_id.clone());

        if self.roster.local().chat_control().is_none() {
            let language = self.config.language.as_deref();
            match self.engine.create_chat_control(engine, user, language) {
                Ok(control) => {
                    self.roster.local_mut().attach_chat_control(control);
                    self.push_local_audio_settings(control);
                },
                Err(source) => {
                    self.abandon_login(SessionError::Engine {
                        operation: "create_chat_control",
                        source,
                    });
                    return;
                },
            }
        }

        let entity_id = identity.entity_id;
        self.call_policy(|policy, ctx| {
            policy.create_or_update_platform_user(ctx, &entity_id, true);
        });

        if self.logs(LogLevel::Minimal) {
            tracing::info!(entity_id = %entity_id, "local user created");
        }
        self.set_stage(ConnectionStage::LocalUserCreated);
        self.release_requests();
    }

    fn push_local_audio_settings(&mut self, control: ChatControlHandle) {
        let muted = self.roster.local().is_muted();
        let level = self.roster.local().voice_level();

        let result = self.engine.set_audio_input_muted(control, muted);
        let _ = self.check("set_audio_input_muted", result);
        let result = self.engine.set_audio_render_volume(control, control, level);
        let _ = self.check("set_audio_render_volume", result);
    }

    fn release_requests(&mut self) {
        let Some(request) = self.requests.release() else {
            return;
        };
        // Failures are surfaced as events; nobody is waiting on the result.
        let _ = match request {
            NetworkRequest::CreateAndJoin(config) => self.create_and_join_now(&config),
            NetworkRequest::Join(network_id) => self.join_now(&network_id),
        };
    }

    /// Run a policy callback and apply what it reported.
    fn call_policy<R>(&mut self, f: impl FnOnce(&mut P, &mut PolicyContext<'_>) -> R) -> R {
        let mut ctx = PolicyContext::new(&mut self.engine, &mut self.roster, self.stage);
        let result = f(&mut self.policy, &mut ctx);
        let outcome = ctx.into_outcome();
        self.apply_policy_outcome(outcome);
        result
    }

    fn apply_policy_outcome(&mut self, outcome: PolicyOutcome) {
        for err in &outcome.errors {
            self.surface(err);
        }
        if let Some(result) = outcome.sign_in {
            self.complete_identity(result);
        }
    }

    fn text_to_speech_enabled(&self) -> bool {
        match self.config.text_to_speech {
            AccessibilityMode::None => false,
            AccessibilityMode::Enabled => true,
            AccessibilityMode::PlatformDefault => self.policy.is_text_to_speech_enabled(),
        }
    }

    fn transcription_options(&self) -> TranscriptionOptions {
        let options = match self.config.speech_to_text {
            AccessibilityMode::None => return TranscriptionOptions::NONE,
            AccessibilityMode::Enabled => TranscriptionOptions::OTHERS_MATCHING_LANGUAGE,
            AccessibilityMode::PlatformDefault => self.policy.transcription_preference(),
        };
        TranscriptionOptions { translate_to_local_language: self.config.translate_chat, ..options }
    }

    fn text_chat_options(&self) -> TextChatOptions {
        TextChatOptions { translate_to_local_language: self.config.translate_chat }
    }

    fn logs(&self, level: LogLevel) -> bool {
        self.config.log_level >= level
    }

    fn set_stage(&mut self, stage: ConnectionStage) {
        if self.stage == stage {
            return;
        }
        if self.logs(LogLevel::Minimal) {
            tracing::info!(from = ?self.stage, to = ?stage, "stage changed");
        }
        self.stage = stage;
    }

    /// Log an error and raise it to the host.
    fn surface(&mut self, err: &SessionError) {
        match err.severity() {
            ErrorType::Error => tracing::error!(code = err.code(), kind = ?err.kind(), "{err}"),
            ErrorType::Warning => tracing::warn!(code = err.code(), kind = ?err.kind(), "{err}"),
        }
        self.events.push(SessionEvent::from(err));
    }

    /// Surface `err` and return it.
    fn reject<T>(&mut self, err: SessionError) -> Result<T, SessionError> {
        self.surface(&err);
        Err(err)
    }

    /// Surface a failed engine call.
    fn check<T>(
        &mut self,
        operation: &'static str,
        result: EngineResult<T>,
    ) -> Result<T, SessionError> {
        result.or_else(|source| self.reject(SessionError::Engine { operation, source }))
    }
}

impl<E, I, P> SessionControl for Session<E, I, P>
where
    E: Engine,
    I: IdentityProvider,
    P: PolicyProvider,
{
    fn stage(&self) -> ConnectionStage {
        self.stage
    }

    // Reset steps report failures as events; the task simply never reaches
    // its target stage.

    fn leave(&mut self) {
        let _ = self.leave_network();
    }

    fn cleanup(&mut self) {
        let _ = Self::cleanup(self);
    }

    fn initialize(&mut self) {
        let _ = Self::initialize(self);
    }

    fn join(&mut self, network_id: &NetworkId) {
        let _ = self.request_join(network_id.clone());
    }
}
