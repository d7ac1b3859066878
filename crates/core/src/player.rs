use crate::types::{CredentialId, PlayerId};

/// A player's per-match record, alive only while they sit on a roster.
///
/// The roster owns this wrapper; the underlying player is referenced by ID
/// and never owned. Exactly one exists per (player, match) pair.
#[derive(Clone, Debug)]
pub struct ActivePlayer {
    pub player: PlayerId,
    /// Wall-clock join stamp, unix milliseconds.
    pub joined_at_ms: u64,
    /// Leased game-session credential, if the pool had one to hand out.
    pub credential: Option<CredentialId>,
}

impl ActivePlayer {
    pub fn new(player: PlayerId, joined_at_ms: u64) -> Self {
        Self {
            player,
            joined_at_ms,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Option<CredentialId>) -> Self {
        self.credential = credential;
        self
    }
}
