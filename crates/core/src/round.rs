use crate::types::PlayerId;
use std::fmt;

/// Round scoring for a ranked pairing.
///
/// Both players of a round submit a signed score (`+1` or `-1`); once both
/// sides are in, an equal-and-opposite pair resolves the round for the player
/// who reported `+1`. A one-sided submission never resolves anything. Score
/// slots are cleared on every resolution attempt, including an inconsistent
/// one, so the round can be retaken.
#[derive(Clone, Debug)]
pub struct RoundProtocol {
    slots: [PlayerId; 2],
    submitted: [Option<i8>; 2],
    rounds_played: u32,
    rounds_total: u32,
    wins: [u32; 2],
    last_winner: Option<PlayerId>,
}

/// Why a score submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundError {
    /// The submitting player does not hold either round slot.
    UnknownPlayer,
    /// Scores must be exactly `+1` or `-1`.
    InvalidScore,
    /// This player already submitted for the current round.
    AlreadySubmitted,
    /// Both sides reported the same sign; the protocol has no defined winner.
    Inconsistent,
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundError::UnknownPlayer => write!(f, "player holds no round slot"),
            RoundError::InvalidScore => write!(f, "score must be +1 or -1"),
            RoundError::AlreadySubmitted => write!(f, "score already submitted this round"),
            RoundError::Inconsistent => write!(f, "submitted scores are not opposite"),
        }
    }
}

impl std::error::Error for RoundError {}

/// Outcome of a fully submitted round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundResolution {
    /// 1-based number of the round that just resolved.
    pub round: u32,
    pub winner: PlayerId,
    /// True once the configured number of rounds has been played.
    pub finished: bool,
}

impl RoundProtocol {
    pub fn new(first: PlayerId, second: PlayerId, rounds_total: u32) -> Self {
        Self {
            slots: [first, second],
            submitted: [None, None],
            rounds_played: 0,
            rounds_total: rounds_total.max(1),
            wins: [0, 0],
            last_winner: None,
        }
    }

    pub fn players(&self) -> [PlayerId; 2] {
        self.slots
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    pub fn rounds_total(&self) -> u32 {
        self.rounds_total
    }

    pub fn wins_for(&self, player: PlayerId) -> Option<u32> {
        self.index_of(player).map(|i| self.wins[i])
    }

    pub fn last_winner(&self) -> Option<PlayerId> {
        self.last_winner
    }

    /// How many score slots are filled for the round in progress.
    pub fn pending_submissions(&self) -> usize {
        self.submitted.iter().filter(|s| s.is_some()).count()
    }

    fn index_of(&self, player: PlayerId) -> Option<usize> {
        self.slots.iter().position(|p| *p == player)
    }

    /// Record one player's score for the current round.
    ///
    /// Returns `Ok(None)` while the round is still waiting on the other side,
    /// `Ok(Some(..))` when this submission resolved it.
    pub fn submit(
        &mut self,
        player: PlayerId,
        score: i8,
    ) -> Result<Option<RoundResolution>, RoundError> {
        if score != 1 && score != -1 {
            return Err(RoundError::InvalidScore);
        }
        let idx = self.index_of(player).ok_or(RoundError::UnknownPlayer)?;
        if self.submitted[idx].is_some() {
            return Err(RoundError::AlreadySubmitted);
        }
        self.submitted[idx] = Some(score);

        let (first, second) = match (self.submitted[0], self.submitted[1]) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(None),
        };
        self.submitted = [None, None];

        if first + second != 0 {
            return Err(RoundError::Inconsistent);
        }

        let winner_idx = if first > 0 { 0 } else { 1 };
        self.rounds_played += 1;
        self.wins[winner_idx] += 1;
        let winner = self.slots[winner_idx];
        self.last_winner = Some(winner);

        Ok(Some(RoundResolution {
            round: self.rounds_played,
            winner,
            finished: self.rounds_played >= self.rounds_total,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PlayerId = PlayerId(1);
    const B: PlayerId = PlayerId(2);

    #[test]
    fn test_one_sided_submission_does_not_resolve() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        assert_eq!(rounds.submit(A, 1), Ok(None));
        assert_eq!(rounds.rounds_played(), 0);
        assert_eq!(rounds.pending_submissions(), 1);
    }

    #[test]
    fn test_opposite_scores_resolve_round() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        assert_eq!(rounds.submit(A, 1), Ok(None));
        let res = rounds.submit(B, -1).unwrap().unwrap();
        assert_eq!(res.round, 1);
        assert_eq!(res.winner, A);
        assert!(!res.finished);
        assert_eq!(rounds.pending_submissions(), 0);
        assert_eq!(rounds.wins_for(A), Some(1));
        assert_eq!(rounds.wins_for(B), Some(0));
    }

    #[test]
    fn test_negative_first_gives_round_to_other_slot() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        rounds.submit(A, -1).unwrap();
        let res = rounds.submit(B, 1).unwrap().unwrap();
        assert_eq!(res.winner, B);
    }

    #[test]
    fn test_final_round_finishes_protocol() {
        let mut rounds = RoundProtocol::new(A, B, 2);
        rounds.submit(A, 1).unwrap();
        assert!(!rounds.submit(B, -1).unwrap().unwrap().finished);
        rounds.submit(A, 1).unwrap();
        let res = rounds.submit(B, -1).unwrap().unwrap();
        assert_eq!(res.round, 2);
        assert!(res.finished);
    }

    #[test]
    fn test_same_sign_is_inconsistent_and_clears_slots() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        rounds.submit(A, 1).unwrap();
        assert_eq!(rounds.submit(B, 1), Err(RoundError::Inconsistent));
        assert_eq!(rounds.rounds_played(), 0);
        // Slots cleared, round can be retaken.
        assert_eq!(rounds.pending_submissions(), 0);
        rounds.submit(A, -1).unwrap();
        assert_eq!(rounds.submit(B, 1).unwrap().unwrap().winner, B);
    }

    #[test]
    fn test_double_submission_rejected() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        rounds.submit(A, 1).unwrap();
        assert_eq!(rounds.submit(A, -1), Err(RoundError::AlreadySubmitted));
    }

    #[test]
    fn test_outsider_and_bad_score_rejected() {
        let mut rounds = RoundProtocol::new(A, B, 3);
        assert_eq!(rounds.submit(PlayerId(9), 1), Err(RoundError::UnknownPlayer));
        assert_eq!(rounds.submit(A, 0), Err(RoundError::InvalidScore));
        assert_eq!(rounds.submit(A, 2), Err(RoundError::InvalidScore));
    }
}
