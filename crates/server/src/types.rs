use duel_core::{ChannelId, MatchId, MatchKind, MatchState, PlayerId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a player currently sits. A player holds at most one slot; lobbied
/// and matched are mutually exclusive by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerSlot {
    Lobby(String),
    Match(MatchId),
}

/// Live summary of an active match.
#[derive(Clone, Debug)]
pub struct MatchInfo {
    pub id: MatchId,
    pub kind: MatchKind,
    pub state: MatchState,
    pub owner: PlayerId,
    pub roster: Vec<PlayerId>,
    pub invited: Vec<PlayerId>,
    pub previous_players: Vec<PlayerId>,
    /// Rounds resolved so far, for ranked matches.
    pub rounds_played: Option<u32>,
    /// Provisioned (text, voice) channel pair, once available.
    pub channels: Option<(ChannelId, ChannelId)>,
    pub voice_public: bool,
}

/// Terminal snapshot of a match, persisted when it ends and retained in the
/// recent-history registry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub kind: MatchKind,
    pub owner: PlayerId,
    pub players: Vec<PlayerId>,
    pub previous_players: Vec<PlayerId>,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub was_timeout: bool,
    pub rounds_played: Option<u32>,
}

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
