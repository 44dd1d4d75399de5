//! Scripted identity and platform backends.
//!
//! Both answer from a script fixed at construction, optionally after a
//! number of polls, so tests control exactly when sign-in completes.

use partyline_core::{
    EngineError, EntityId, IdentityError, IdentityProvider, LocalIdentity,
    policy::{PermissionUpdate, PlatformBackend, PlatformNotice},
};

/// Identity backend answering every token request the same way.
#[derive(Debug, Clone)]
pub struct ScriptedIdentity {
    logged_in: bool,
    answer: Option<Result<LocalIdentity, IdentityError>>,
    delay: u32,
    outstanding: Option<u32>,
    requests: usize,
}

impl ScriptedIdentity {
    /// Signed-in user `entity_id`; tokens are granted at the first poll.
    pub fn signed_in(entity_id: impl Into<EntityId>) -> Self {
        let entity_id = entity_id.into();
        let token = format!("token-{entity_id}");
        Self::scripted(true, Some(Ok(LocalIdentity::new(entity_id, token))))
    }

    /// Nobody signed in; every create or join is refused.
    pub fn signed_out() -> Self {
        Self::scripted(false, None)
    }

    /// Signed-in user whose token requests fail with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::scripted(true, Some(Err(IdentityError::new(reason))))
    }

    fn scripted(logged_in: bool, answer: Option<Result<LocalIdentity, IdentityError>>) -> Self {
        Self { logged_in, answer, delay: 0, outstanding: None, requests: 0 }
    }

    /// Answer only after `polls` empty polls.
    #[must_use]
    pub fn with_delay(mut self, polls: u32) -> Self {
        self.delay = polls;
        self
    }

    /// Token requests received so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// `true` while a request has not been answered.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }
}

impl IdentityProvider for ScriptedIdentity {
    fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    fn request_token(&mut self) {
        self.requests += 1;
        self.outstanding = Some(self.delay);
    }

    fn poll_token(&mut self) -> Option<Result<LocalIdentity, IdentityError>> {
        let remaining = self.outstanding?;
        if remaining > 0 {
            self.outstanding = Some(remaining - 1);
            return None;
        }
        self.outstanding = None;
        self.answer.clone()
    }
}

/// Platform backend with a scripted sign-in and a notice queue tests can
/// push to.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPlatform {
    identity: Option<LocalIdentity>,
    platform_id: Option<String>,
    notices: Vec<PlatformNotice>,
    registered: Vec<String>,
    sign_ins: usize,
    text_to_speech: bool,
    speech_to_text: bool,
    refuse_clean_up: bool,
    failing_registrations: usize,
}

impl ScriptedPlatform {
    /// Platform user `platform_id` signing in as `entity_id`.
    pub fn new(entity_id: impl Into<EntityId>, platform_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let token = format!("platform-token-{entity_id}");
        Self {
            identity: Some(LocalIdentity::new(entity_id, token)),
            platform_id: Some(platform_id.into()),
            ..Self::default()
        }
    }

    /// Queue a notice for the next poll.
    pub fn push_notice(&mut self, notice: PlatformNotice) {
        self.notices.push(notice);
    }

    /// Queue a required-permissions change between two platform users.
    pub fn change_permissions(&mut self, local: &str, target: &str) {
        self.notices.push(PlatformNotice::RequiredPermissionsChanged(PermissionUpdate {
            local_platform_id: local.to_owned(),
            target_platform_id: target.to_owned(),
        }));
    }

    /// Remote platform users registered so far, in order.
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// Sign-ins started so far.
    pub fn sign_ins(&self) -> usize {
        self.sign_ins
    }

    /// Platform accessibility preferences.
    pub fn set_accessibility(&mut self, text_to_speech: bool, speech_to_text: bool) {
        self.text_to_speech = text_to_speech;
        self.speech_to_text = speech_to_text;
    }

    /// Make the next `count` remote registrations fail.
    pub fn fail_registrations(&mut self, count: usize) {
        self.failing_registrations = count;
    }

    /// Make the next clean up report a refusal.
    pub fn refuse_clean_up(&mut self) {
        self.refuse_clean_up = true;
    }
}

impl PlatformBackend for ScriptedPlatform {
    fn sign_in(&mut self) {
        self.sign_ins += 1;
        let result = self.identity.clone().ok_or_else(|| IdentityError::new("no platform user"));
        self.notices.push(PlatformNotice::SignInCompleted(result));
    }

    fn local_platform_id(&self) -> Option<String> {
        self.platform_id.clone()
    }

    fn register_remote_user(&mut self, platform_id: &str) -> Result<(), EngineError> {
        if self.failing_registrations > 0 {
            self.failing_registrations -= 1;
            return Err(EngineError::new(
                EngineError::RESOURCE_NOT_FOUND,
                "platform user lookup failed",
            ));
        }
        self.registered.push(platform_id.to_owned());
        Ok(())
    }

    fn poll_notices(&mut self) -> Vec<PlatformNotice> {
        std::mem::take(&mut self.notices)
    }

    fn text_to_speech_enabled(&self) -> bool {
        self.text_to_speech
    }

    fn speech_to_text_enabled(&self) -> bool {
        self.speech_to_text
    }

    fn clean_up(&mut self) -> bool {
        self.notices.clear();
        !std::mem::take(&mut self.refuse_clean_up)
    }
}
