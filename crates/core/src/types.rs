use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a community member across the whole system.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a match. Strictly increasing across the process lifetime.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MatchId(pub u64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a shared game-session credential leased from the account pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(pub u64);

/// Handle to an externally provisioned communication channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// What kind of match a roster is playing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    /// Open sparring room, roster bounded but otherwise free-form.
    Casual,
    /// Fixed two-player pairing with per-round scoring.
    Ranked,
}

/// Activity state of a match.
///
/// Every non-terminal state is recomputed from roster and presence facts on
/// each update pass; `Ended` is terminal and only reached by ending the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    /// Fewer than two players on the roster.
    Inviting,
    /// Full enough roster, but fewer than two members are online.
    LoggingIn,
    /// Ranked roster assembled and online, first round not yet resolved.
    GettingReady,
    Playing,
    /// A ranked round is waiting on the second score submission.
    Submitting,
    Ended,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        self == MatchState::Ended
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchState::Inviting => "inviting",
            MatchState::LoggingIn => "logging in",
            MatchState::GettingReady => "getting ready",
            MatchState::Playing => "playing",
            MatchState::Submitting => "submitting",
            MatchState::Ended => "ended",
        };
        write!(f, "{label}")
    }
}
