use duel_core::{MatchId, PlayerId};
use std::fmt;

/// Failure from one of the external ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// The target refuses delivery; permanent, do not retry.
    Forbidden,
    /// The addressed document, handle, or channel does not exist.
    NotFound,
    /// Transient failure; a bounded retry may succeed.
    Unavailable(String),
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Forbidden => write!(f, "target cannot be reached"),
            PortError::NotFound => write!(f, "not found"),
            PortError::Unavailable(reason) => write!(f, "temporarily unavailable: {reason}"),
        }
    }
}

impl std::error::Error for PortError {}

/// A broken programming invariant. Never swallowed, always propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    /// A match-level invite was routed through a player who does not own
    /// that match.
    NotMatchOwner { player: PlayerId, match_id: MatchId },
    /// A ranked round resolved with same-sign scores.
    InconsistentRound { match_id: MatchId },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantError::NotMatchOwner { player, match_id } => {
                write!(
                    f,
                    "invariant broken: player {player} does not own match {match_id}"
                )
            }
            InvariantError::InconsistentRound { match_id } => {
                write!(
                    f,
                    "invariant broken: match {match_id} round resolved with same-sign scores"
                )
            }
        }
    }
}

impl std::error::Error for InvariantError {}

/// Error for lobby membership operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyError {
    /// No lobby registered under that name.
    UnknownLobby,
    /// Player already sits in a lobby roster.
    AlreadyLobbied,
    /// Player is currently on a match roster.
    AlreadyInMatch,
}

impl fmt::Display for LobbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyError::UnknownLobby => write!(f, "no such lobby"),
            LobbyError::AlreadyLobbied => write!(f, "player is already lobbied"),
            LobbyError::AlreadyInMatch => write!(f, "player is already in a match"),
        }
    }
}

impl std::error::Error for LobbyError {}

/// Error when joining a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Match not found.
    NotFound,
    /// Roster is at the per-kind maximum.
    MatchFull,
    /// Player already sits on this roster.
    AlreadyJoined,
    /// Player sits on some other match's roster.
    AlreadyInMatch(MatchId),
    /// Match has already ended.
    Ended,
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NotFound => write!(f, "match not found"),
            JoinError::MatchFull => write!(f, "match is full"),
            JoinError::AlreadyJoined => write!(f, "player is already on the roster"),
            JoinError::AlreadyInMatch(id) => write!(f, "player is already in match {id}"),
            JoinError::Ended => write!(f, "match has ended"),
        }
    }
}

impl std::error::Error for JoinError {}

/// Error for operations on a specific match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// Match not found among active matches.
    NotFound,
    /// Match has already ended.
    Ended,
    /// Player is not on the roster.
    NotOnRoster,
    /// Channel provisioning failed permanently; the match was ended.
    ChannelsUnavailable,
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::NotFound => write!(f, "match not found"),
            MatchError::Ended => write!(f, "match has ended"),
            MatchError::NotOnRoster => write!(f, "player is not on the roster"),
            MatchError::ChannelsUnavailable => {
                write!(f, "match channels could not be provisioned")
            }
        }
    }
}

impl std::error::Error for MatchError {}

/// Error for the invite protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    /// No lobby registered under that name.
    UnknownLobby,
    /// Players cannot invite themselves.
    SelfInvite,
    /// An invite from this owner to this player is already pending.
    AlreadyInvited,
    /// The DM could not be delivered within the retry budget.
    Unreachable,
    /// No pending invite from this owner to this player.
    NoSuchInvite,
    /// The inviter has since become a regular member of someone else's match.
    Stale,
    /// Joining the owner's existing match failed.
    Join(JoinError),
    /// Creating the new match failed.
    Match(MatchError),
    /// A programming invariant was broken while routing the invite.
    Invariant(InvariantError),
}

impl fmt::Display for InviteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InviteError::UnknownLobby => write!(f, "no such lobby"),
            InviteError::SelfInvite => write!(f, "players cannot invite themselves"),
            InviteError::AlreadyInvited => write!(f, "invite already pending"),
            InviteError::Unreachable => write!(f, "invite could not be delivered"),
            InviteError::NoSuchInvite => write!(f, "no pending invite"),
            InviteError::Stale => write!(f, "invite is stale"),
            InviteError::Join(err) => write!(f, "{err}"),
            InviteError::Match(err) => write!(f, "{err}"),
            InviteError::Invariant(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InviteError {}

/// Error when submitting a ranked round score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    /// Match not found among active matches.
    NotFound,
    /// Match has already ended.
    Ended,
    /// Match carries no round protocol.
    NotRanked,
    /// The submitting player holds no round slot.
    UnknownPlayer,
    /// Scores must be exactly `+1` or `-1`.
    InvalidScore,
    /// This player already submitted for the current round.
    AlreadySubmitted,
    /// Both sides reported the same sign.
    Invariant(InvariantError),
}

impl fmt::Display for ScoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreError::NotFound => write!(f, "match not found"),
            ScoreError::Ended => write!(f, "match has ended"),
            ScoreError::NotRanked => write!(f, "match is not ranked"),
            ScoreError::UnknownPlayer => write!(f, "player holds no round slot"),
            ScoreError::InvalidScore => write!(f, "score must be +1 or -1"),
            ScoreError::AlreadySubmitted => {
                write!(f, "score already submitted this round")
            }
            ScoreError::Invariant(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ScoreError {}
