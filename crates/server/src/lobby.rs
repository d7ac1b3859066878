use crate::types::now_ms;
use duel_core::{LogBuffer, LogCursor, LogEntry, MatchId, MatchKind, PlayerId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A pending offer from a player with no match yet, waiting to seed one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeInvite {
    pub to: PlayerId,
    pub kind: MatchKind,
}

/// One lobbied player's bookkeeping.
#[derive(Clone, Debug)]
struct Seat {
    player: PlayerId,
    deadline: Instant,
    warned: bool,
}

pub(crate) struct LobbyInner {
    name: String,
    seats: Vec<Seat>,
    /// Pending invites from players who do not own a match yet,
    /// keyed by inviter.
    free_invites: HashMap<PlayerId, Vec<FreeInvite>>,
    log: LogBuffer<String>,
}

impl LobbyInner {
    fn log_note(&mut self, text: String) {
        self.log.push(now_ms(), text);
    }

    fn seat_index(&self, player: PlayerId) -> Option<usize> {
        self.seats.iter().position(|s| s.player == player)
    }
}

/// Shared handle to one lobby. Membership checks happen immediately before
/// mutation under the inner mutex; the sweep snapshots the roster before
/// touching it.
#[derive(Clone)]
pub struct LobbyHandle {
    inner: Arc<Mutex<LobbyInner>>,
}

/// What one sweep pass decided, already applied to the roster.
pub(crate) struct SweepReport {
    pub expired: Vec<PlayerId>,
    pub warned: Vec<(PlayerId, Duration)>,
}

impl LobbyHandle {
    pub(crate) fn new(name: String, log_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LobbyInner {
                name,
                seats: Vec::new(),
                free_invites: HashMap::new(),
                log: LogBuffer::new(log_capacity),
            })),
        }
    }

    pub async fn name(&self) -> String {
        self.inner.lock().await.name.clone()
    }

    pub async fn players(&self) -> Vec<PlayerId> {
        self.inner.lock().await.seats.iter().map(|s| s.player).collect()
    }

    pub async fn read_log(&self, cursor: LogCursor) -> (Vec<LogEntry<String>>, LogCursor) {
        self.inner.lock().await.log.read_from(cursor)
    }

    /// Seat a player with the given idle deadline. False if already seated.
    pub(crate) async fn seat(&self, player: PlayerId, deadline: Instant) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.seat_index(player).is_some() {
            return false;
        }
        inner.seats.push(Seat {
            player,
            deadline,
            warned: false,
        });
        inner.log_note(format!("player {player} joined the lobby"));
        true
    }

    /// Remove a seat. A supplied match ID tags the departure as a move into
    /// that match rather than a plain leave.
    pub(crate) async fn remove_seat(&self, player: PlayerId, to_match: Option<MatchId>) -> bool {
        let mut inner = self.inner.lock().await;
        let idx = match inner.seat_index(player) {
            Some(idx) => idx,
            None => return false,
        };
        inner.seats.remove(idx);
        match to_match {
            Some(id) => inner.log_note(format!("player {player} moved to match {id}")),
            None => inner.log_note(format!("player {player} left the lobby")),
        }
        true
    }

    /// Refresh a player's deadline and clear their warning. False if the
    /// player is not seated.
    pub(crate) async fn reset_deadline(&self, player: PlayerId, deadline: Instant) -> bool {
        let mut inner = self.inner.lock().await;
        let idx = match inner.seat_index(player) {
            Some(idx) => idx,
            None => return false,
        };
        inner.seats[idx].deadline = deadline;
        inner.seats[idx].warned = false;
        true
    }

    /// One sweep pass: expire overdue seats, warn seats inside the warning
    /// margin. Works on a snapshot so mutation never skips entries.
    pub(crate) async fn sweep(&self, now: Instant, warn_margin: Duration) -> SweepReport {
        let mut inner = self.inner.lock().await;
        let snapshot = inner.seats.clone();

        let mut expired = Vec::new();
        let mut warned = Vec::new();
        for seat in snapshot {
            if now >= seat.deadline {
                expired.push(seat.player);
            } else if !seat.warned {
                let left = seat.deadline.saturating_duration_since(now);
                if left <= warn_margin {
                    warned.push((seat.player, left));
                }
            }
        }

        for player in &expired {
            if let Some(idx) = inner.seat_index(*player) {
                inner.seats.remove(idx);
            }
            inner.log_note(format!("player {player} timed out"));
        }
        for (player, _) in &warned {
            if let Some(idx) = inner.seat_index(*player) {
                inner.seats[idx].warned = true;
            }
        }

        SweepReport { expired, warned }
    }

    /// Record a free invite. False if one is already pending for this pair.
    pub(crate) async fn add_free_invite(
        &self,
        owner: PlayerId,
        invited: PlayerId,
        kind: MatchKind,
    ) -> bool {
        let mut inner = self.inner.lock().await;
        let pending = inner.free_invites.entry(owner).or_default();
        if pending.iter().any(|i| i.to == invited) {
            return false;
        }
        pending.push(FreeInvite { to: invited, kind });
        true
    }

    pub(crate) async fn remove_free_invite(&self, owner: PlayerId, invited: PlayerId) -> bool {
        let mut inner = self.inner.lock().await;
        let (removed, now_empty) = {
            let Some(pending) = inner.free_invites.get_mut(&owner) else {
                return false;
            };
            let before = pending.len();
            pending.retain(|i| i.to != invited);
            (pending.len() != before, pending.is_empty())
        };
        if now_empty {
            inner.free_invites.remove(&owner);
        }
        removed
    }

    pub(crate) async fn free_invite_for(
        &self,
        owner: PlayerId,
        invited: PlayerId,
    ) -> Option<MatchKind> {
        let inner = self.inner.lock().await;
        inner
            .free_invites
            .get(&owner)
            .and_then(|pending| pending.iter().find(|i| i.to == invited))
            .map(|i| i.kind)
    }

    /// Drain every pending free invite this owner holds.
    pub(crate) async fn take_free_invites(&self, owner: PlayerId) -> Vec<FreeInvite> {
        let mut inner = self.inner.lock().await;
        inner.free_invites.remove(&owner).unwrap_or_default()
    }

    pub(crate) async fn has_free_invite(&self, owner: PlayerId, invited: PlayerId) -> bool {
        self.free_invite_for(owner, invited).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PlayerId = PlayerId(1);
    const B: PlayerId = PlayerId(2);

    fn lobby() -> LobbyHandle {
        LobbyHandle::new("arena".to_string(), 50)
    }

    #[tokio::test]
    async fn test_seat_rejects_duplicates() {
        let lobby = lobby();
        let deadline = Instant::now() + Duration::from_secs(60);
        assert!(lobby.seat(A, deadline).await);
        assert!(!lobby.seat(A, deadline).await);
        assert_eq!(lobby.players().await, vec![A]);
    }

    #[tokio::test]
    async fn test_remove_seat_tags_match_moves() {
        let lobby = lobby();
        let deadline = Instant::now() + Duration::from_secs(60);
        lobby.seat(A, deadline).await;
        lobby.seat(B, deadline).await;

        assert!(lobby.remove_seat(A, Some(MatchId(7))).await);
        assert!(lobby.remove_seat(B, None).await);
        assert!(!lobby.remove_seat(B, None).await);

        let (entries, _) = lobby.read_log(LogCursor(0)).await;
        let notes: Vec<&str> = entries.iter().map(|e| e.note.as_str()).collect();
        assert!(notes.contains(&"player 1 moved to match 7"));
        assert!(notes.contains(&"player 2 left the lobby"));
    }

    #[tokio::test]
    async fn test_sweep_expires_and_warns_once() {
        let lobby = lobby();
        let now = Instant::now();
        lobby.seat(A, now + Duration::from_secs(10)).await;
        lobby.seat(B, now + Duration::from_secs(300)).await;

        let report = lobby.sweep(now + Duration::from_secs(11), Duration::from_secs(60)).await;
        assert_eq!(report.expired, vec![A]);
        assert!(report.warned.is_empty());
        assert_eq!(lobby.players().await, vec![B]);

        // B enters the warning margin, exactly one warning.
        let report = lobby.sweep(now + Duration::from_secs(250), Duration::from_secs(60)).await;
        assert_eq!(report.warned.len(), 1);
        assert_eq!(report.warned[0].0, B);
        let report = lobby.sweep(now + Duration::from_secs(260), Duration::from_secs(60)).await;
        assert!(report.warned.is_empty());
    }

    #[tokio::test]
    async fn test_reset_deadline_clears_warning() {
        let lobby = lobby();
        let now = Instant::now();
        lobby.seat(A, now + Duration::from_secs(30)).await;
        lobby.sweep(now, Duration::from_secs(60)).await;

        assert!(lobby.reset_deadline(A, now + Duration::from_secs(600)).await);
        let report = lobby.sweep(now + Duration::from_secs(1), Duration::from_secs(60)).await;
        assert!(report.warned.is_empty());
        assert!(report.expired.is_empty());

        assert!(!lobby.reset_deadline(B, now).await);
    }

    #[tokio::test]
    async fn test_free_invite_bookkeeping() {
        let lobby = lobby();
        assert!(lobby.add_free_invite(A, B, MatchKind::Casual).await);
        assert!(!lobby.add_free_invite(A, B, MatchKind::Ranked).await);
        assert!(lobby.has_free_invite(A, B).await);
        assert!(!lobby.has_free_invite(B, A).await);

        assert!(lobby.remove_free_invite(A, B).await);
        assert!(!lobby.remove_free_invite(A, B).await);
        assert!(!lobby.has_free_invite(A, B).await);

        lobby.add_free_invite(A, B, MatchKind::Casual).await;
        lobby.add_free_invite(A, PlayerId(3), MatchKind::Casual).await;
        let drained = lobby.take_free_invites(A).await;
        assert_eq!(drained.len(), 2);
        assert!(lobby.take_free_invites(A).await.is_empty());
    }
}
