//! Contracts for the external collaborators the core consumes. Concrete
//! transports live outside this crate; tests and the demo wire the in-memory
//! adapters from [`crate::memory`].

use crate::errors::PortError;
use async_trait::async_trait;
use duel_core::{ChannelId, CredentialId, MatchId, MatchState, PlayerId};
use serde_json::Value;
use std::sync::Arc;

/// Where a notification is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Player(PlayerId),
    Channel(ChannelId),
}

/// Handle to a delivered notification, kept for later edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageHandle(pub u64);

/// A renderable event pushed through the notification sink. Rendering is the
/// sink's concern; the core only names the template and its fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    InviteOffer {
        from: PlayerId,
    },
    LobbyExpiryWarning {
        seconds_left: u64,
    },
    LobbyTimedOut,
    MatchExpiryWarning {
        match_id: MatchId,
        seconds_left: u64,
    },
    MatchTimedOut {
        match_id: MatchId,
    },
    MissingCredential {
        match_id: MatchId,
    },
    /// The externally rendered match snapshot; republished only when changed.
    StatusBoard {
        match_id: MatchId,
        state: MatchState,
        roster: Vec<PlayerId>,
        rounds_played: Option<u32>,
    },
}

/// Key/value document store, addressed by collection and numeric ID.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get(&self, collection: &str, id: u64) -> Result<Value, PortError>;
    async fn set(&self, collection: &str, id: u64, doc: Value) -> Result<(), PortError>;
    /// The document with the highest ID in the collection, if any.
    async fn get_last(&self, collection: &str) -> Result<Option<Value>, PortError>;
    async fn delete(&self, collection: &str, id: u64) -> Result<(), PortError>;
}

/// Delivers human-readable events. `Forbidden` is permanent (target blocks
/// delivery); `NotFound` on edit means the handle went stale and the notice
/// should be resent.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: Target, notice: Notice) -> Result<MessageHandle, PortError>;
    async fn edit(&self, handle: MessageHandle, notice: Notice) -> Result<(), PortError>;
}

/// Pool of shared game-session credentials leased to players for the
/// duration of a match.
#[async_trait]
pub trait AccountAllocator: Send + Sync {
    /// Lease a credential for the player, if the pool has one left.
    async fn pick(&self, player: PlayerId) -> Option<CredentialId>;
    async fn release(&self, credential: CredentialId);
}

/// Provisions the text/voice channel pair backing a match. Privileged roles
/// (moderation, administration) are granted by the provisioner itself; the
/// core only manages participant visibility.
#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    /// Returns the (text, voice) handles for a fresh match.
    async fn create_match_channels(
        &self,
        match_id: MatchId,
    ) -> Result<(ChannelId, ChannelId), PortError>;
    async fn set_visibility(
        &self,
        channel: ChannelId,
        player: PlayerId,
        visible: bool,
    ) -> Result<(), PortError>;
    /// Open or close the channel to non-participants.
    async fn set_public(&self, channel: ChannelId, public: bool) -> Result<(), PortError>;
    /// Remove every unprivileged occupant not in `allowed`.
    async fn evict_except(
        &self,
        channel: ChannelId,
        allowed: &[PlayerId],
    ) -> Result<(), PortError>;
    async fn delete(&self, channel: ChannelId) -> Result<(), PortError>;
}

/// Reports whether a player's game character is currently online.
#[async_trait]
pub trait PresenceOracle: Send + Sync {
    async fn is_online(&self, player: PlayerId) -> bool;
}

/// Bundle of external collaborators injected into the server.
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn Persistence>,
    pub notifier: Arc<dyn Notifier>,
    pub accounts: Arc<dyn AccountAllocator>,
    pub channels: Arc<dyn ChannelProvisioner>,
    pub presence: Arc<dyn PresenceOracle>,
}
