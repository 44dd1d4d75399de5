//! Create, join and leave.
//!
//! Each request goes one of three ways depending on the stage:
//!
//! - no local user yet: parameters are staged until one exists,
//! - already connected: parameters are staged, the current network is left
//!   and the request re-enters once the network is destroyed,
//! - otherwise: it runs now.

use uuid::Uuid;

use super::Session;
use crate::{
    config::{LogLevel, NetworkConfiguration},
    engine::{Engine, InvitationConfig, NetworkDescriptor},
    error::SessionError,
    identity::IdentityProvider,
    network_id::NetworkId,
    policy::PolicyProvider,
    state::ConnectionStage,
};

impl<E, I, P> Session<E, I, P>
where
    E: Engine,
    I: IdentityProvider,
    P: PolicyProvider,
{
    /// Create a network with the default configuration and join it.
    pub fn create_and_join_network(&mut self) -> Result<(), SessionError> {
        self.create_and_join_network_with(NetworkConfiguration::default())
    }

    /// Create a network and join it.
    ///
    /// The network identity is raised with
    /// [`crate::SessionEvent::NetworkJoined`] once connected.
    pub fn create_and_join_network_with(
        &mut self,
        config: NetworkConfiguration,
    ) -> Result<(), SessionError> {
        if let Err(err) = config.validate() {
            return self.reject(err);
        }
        self.ensure_identity_available()?;

        if self.stage < ConnectionStage::LocalUserCreated {
            self.requests.stage_create(config);
            return Ok(());
        }
        if self.stage.is_connected() {
            self.after_leave.stage_create(config);
            return self.leave_current();
        }
        self.create_and_join_now(&config)
    }

    /// Join the network identified by `network_id`, as produced by
    /// [`NetworkId`]'s `Display`.
    pub fn join_network(&mut self, network_id: &str) -> Result<(), SessionError> {
        let network_id = match NetworkId::parse(network_id) {
            Ok(network_id) => network_id,
            Err(err) => return self.reject(err),
        };
        self.request_join(network_id)
    }

    /// Leave the current network.
    ///
    /// Cancels any request waiting for the leave. A no-op when not
    /// connected or already leaving.
    pub fn leave_network(&mut self) -> Result<(), SessionError> {
        self.after_leave.cancel();
        self.leave_current()
    }

    pub(super) fn request_join(&mut self, network_id: NetworkId) -> Result<(), SessionError> {
        self.ensure_identity_available()?;

        if self.stage < ConnectionStage::LocalUserCreated {
            self.requests.stage_join(network_id);
            return Ok(());
        }
        if self.stage.is_connected() {
            self.after_leave.stage_join(network_id);
            return self.leave_current();
        }
        self.join_now(&network_id)
    }

    /// Without a policy provider doing sign-in, a signed-in user is needed
    /// to request a token.
    fn ensure_identity_available(&mut self) -> Result<(), SessionError> {
        if self.local_user.is_some()
            || self.policy.handles_sign_in()
            || self.identity.is_logged_in()
        {
            return Ok(());
        }
        self.reject(SessionError::NoUserLoggedIn)
    }

    pub(super) fn create_and_join_now(
        &mut self,
        config: &NetworkConfiguration,
    ) -> Result<(), SessionError> {
        let (Some(engine), Some(user)) = (self.engine_handle, self.local_user) else {
            return self.reject(SessionError::NoLocalUser);
        };

        let invitation = InvitationConfig { identifier: Uuid::new_v4().to_string() };
        let result =
            self.engine.create_network(engine, user, &config.to_engine_config(), &invitation);
        let (descriptor, invitation_id) = self.check("create_network", result)?;

        if self.logs(LogLevel::Verbose) {
            tracing::debug!(
                max_players = config.max_player_count,
                invitation = %invitation_id,
                "network created"
            );
        }
        self.invitation_id = Some(invitation_id);
        self.connect(descriptor)
    }

    pub(super) fn join_now(&mut self, network_id: &NetworkId) -> Result<(), SessionError> {
        let result = self.engine.deserialize_network_descriptor(network_id.descriptor());
        let descriptor = self.check("deserialize_network_descriptor", result)?;

        if self.logs(LogLevel::Verbose) {
            tracing::debug!(invitation = %network_id.invitation_id(), "joining network");
        }
        self.invitation_id = Some(network_id.invitation_id().to_owned());
        self.connect(descriptor)
    }

    fn connect(&mut self, descriptor: NetworkDescriptor) -> Result<(), SessionError> {
        let Some(engine) = self.engine_handle else {
            return self.reject(SessionError::NoLocalUser);
        };

        let result = self.engine.connect_to_network(engine, &descriptor);
        let network = match self.check("connect_to_network", result) {
            Ok(network) => network,
            Err(err) => {
                self.clear_connect_attempt();
                return Err(err);
            },
        };
        self.network = Some(network);
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Leave without touching requests staged for after the leave.
    pub(super) fn leave_current(&mut self) -> Result<(), SessionError> {
        if self.leaving {
            return Ok(());
        }
        let Some(network) = self.network else {
            return Ok(());
        };

        match self.engine.leave_network(network) {
            Ok(()) => {},
            Err(source) if source.is_object_being_destroyed() => {
                tracing::info!("network is already being destroyed");
            },
            Err(source) => {
                return self.reject(SessionError::Engine { operation: "leave_network", source });
            },
        }

        if self.logs(LogLevel::Minimal) {
            tracing::info!(network_id = ?self.network_id, "leaving network");
        }
        self.leaving = true;
        self.network = None;
        self.descriptor = None;
        self.chat_controls.clear();
        self.roster.local_mut().clear_endpoint();
        Ok(())
    }

    /// Forget an in-flight connect after it failed.
    pub(super) fn clear_connect_attempt(&mut self) {
        self.network = None;
        self.descriptor = None;
        self.invitation_id = None;
        self.roster.local_mut().clear_endpoint();
    }

    /// Publish `invitation|descriptor` for the current network.
    ///
    /// Returns `false` if either half is missing or the descriptor cannot be
    /// serialized.
    pub(super) fn publish_network_id(&mut self) -> bool {
        let (Some(descriptor), Some(invitation_id)) = (&self.descriptor, &self.invitation_id)
        else {
            return false;
        };
        let invitation_id = invitation_id.clone();
        let result = self.engine.serialize_network_descriptor(descriptor);

        match self.check("serialize_network_descriptor", result) {
            Ok(serialized) => {
                self.network_id = Some(NetworkId::new(invitation_id, serialized));
                true
            },
            Err(_) => false,
        }
    }
}
