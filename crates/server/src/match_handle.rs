use crate::config::ServerConfig;
use crate::errors::{InvariantError, JoinError, MatchError, PortError, ScoreError};
use crate::ports::{MessageHandle, Notice, Ports, Target};
use crate::timer::OneShot;
use crate::types::{now_ms, MatchInfo, MatchRecord};
use duel_core::{
    ActivePlayer, ChannelId, LogBuffer, LogCursor, LogEntry, MatchId, MatchKind, MatchState,
    PlayerId, RoundError, RoundProtocol, RoundResolution,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// One entry in a match's activity log.
#[derive(Clone, Debug)]
pub struct MatchNote {
    pub text: String,
    /// Whether the entry may be shown outside the roster.
    pub public: bool,
}

/// What the caller should do after an update pass.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UpdateOutcome {
    /// Normal pass; schedule the next tick.
    Reschedule,
    /// The idle timeout expired; end the match and do not reschedule.
    EndMatch,
    /// Match is already ended; the tick chain stops here.
    Stop,
}

/// What a departure did to the match.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LeaveOutcome {
    /// Player removed, match continues.
    Removed,
    /// Player removed and the roster is now empty; end the match.
    RemovedAndEnd,
    /// The owner left a roster too small to hand off; end the match with the
    /// owner still seated so teardown sweeps everyone together.
    OwnerEnds,
}

/// What the timeout sub-protocol decided this pass.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TimeoutStep {
    Quiet,
    Warned { seconds_left: u64 },
    Expired,
}

/// Everything produced by the in-lock half of ending a match.
pub(crate) struct MatchFinish {
    pub record: MatchRecord,
    pub removed: Vec<PlayerId>,
    pub channels: Option<(ChannelId, ChannelId)>,
}

pub(crate) struct MatchInner {
    pub(crate) id: MatchId,
    pub(crate) kind: MatchKind,
    pub(crate) owner: PlayerId,
    pub(crate) players: Vec<ActivePlayer>,
    pub(crate) previous_players: Vec<PlayerId>,
    pub(crate) invited: Vec<PlayerId>,
    pub(crate) state: MatchState,
    pub(crate) started_at_ms: u64,
    pub(crate) ended_at_ms: Option<u64>,
    /// Set when the roster stopped being full-and-online; cleared when it
    /// recovers. The timeout clock measures from here.
    pub(crate) idle_since: Option<Instant>,
    pub(crate) was_timeout: bool,
    pub(crate) timeout_warned: bool,
    pub(crate) voice_public: bool,
    pub(crate) channels: Option<(ChannelId, ChannelId)>,
    pub(crate) log: LogBuffer<MatchNote>,
    pub(crate) rounds: Option<RoundProtocol>,
    pub(crate) tick: OneShot,
    /// Last published status board, for changed-detection.
    pub(crate) board: Option<(MessageHandle, Notice)>,
}

impl MatchInner {
    pub(crate) fn new(
        id: MatchId,
        kind: MatchKind,
        owner: PlayerId,
        started_at_ms: u64,
        config: &ServerConfig,
    ) -> Self {
        Self {
            id,
            kind,
            owner,
            players: Vec::new(),
            previous_players: Vec::new(),
            invited: Vec::new(),
            state: MatchState::Inviting,
            started_at_ms,
            ended_at_ms: None,
            idle_since: None,
            was_timeout: false,
            timeout_warned: false,
            voice_public: true,
            channels: None,
            log: LogBuffer::new(config.log_capacity),
            rounds: None,
            tick: OneShot::new(),
            board: None,
        }
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.state.is_terminal()
    }

    pub(crate) fn roster_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|a| a.player).collect()
    }

    pub(crate) fn roster_contains(&self, player: PlayerId) -> bool {
        self.players.iter().any(|a| a.player == player)
    }

    pub(crate) fn log_note(&mut self, text: String, public: bool) {
        self.log.push(now_ms(), MatchNote { text, public });
    }

    /// Non-terminal state, derived from roster and presence facts.
    pub(crate) fn computed_state(&self, online: usize) -> MatchState {
        if self.players.len() < 2 {
            return MatchState::Inviting;
        }
        if online < 2 {
            return MatchState::LoggingIn;
        }
        match &self.rounds {
            Some(rounds) if rounds.pending_submissions() == 1 => MatchState::Submitting,
            Some(rounds) if rounds.rounds_played() == 0 => MatchState::GettingReady,
            _ => MatchState::Playing,
        }
    }

    /// One pass of the idle-timeout clock.
    pub(crate) fn step_timeout(
        &mut self,
        now: Instant,
        online: usize,
        config: &ServerConfig,
    ) -> TimeoutStep {
        if self.players.len() >= 2 && online >= 2 {
            self.idle_since = None;
            self.timeout_warned = false;
            return TimeoutStep::Quiet;
        }
        let since = match self.idle_since {
            Some(since) => since,
            None => {
                self.idle_since = Some(now);
                self.timeout_warned = false;
                return TimeoutStep::Quiet;
            }
        };
        let idle = now.saturating_duration_since(since);
        if idle >= config.match_timeout_after && !self.was_timeout {
            self.was_timeout = true;
            return TimeoutStep::Expired;
        }
        if idle >= config.match_warn_after && !self.timeout_warned {
            self.timeout_warned = true;
            let left = config.match_timeout_after.saturating_sub(idle);
            return TimeoutStep::Warned {
                seconds_left: left.as_secs(),
            };
        }
        TimeoutStep::Quiet
    }

    fn board_notice(&self) -> Notice {
        Notice::StatusBoard {
            match_id: self.id,
            state: self.state,
            roster: self.roster_ids(),
            rounds_played: self.rounds.as_ref().map(|r| r.rounds_played()),
        }
    }

    pub(crate) fn record(&self) -> MatchRecord {
        MatchRecord {
            id: self.id,
            kind: self.kind,
            owner: self.owner,
            players: self.roster_ids(),
            previous_players: self.previous_players.clone(),
            started_at_ms: self.started_at_ms,
            ended_at_ms: self.ended_at_ms,
            was_timeout: self.was_timeout,
            rounds_played: self.rounds.as_ref().map(|r| r.rounds_played()),
        }
    }

    pub(crate) fn info(&self) -> MatchInfo {
        MatchInfo {
            id: self.id,
            kind: self.kind,
            state: self.state,
            owner: self.owner,
            roster: self.roster_ids(),
            invited: self.invited.clone(),
            previous_players: self.previous_players.clone(),
            rounds_played: self.rounds.as_ref().map(|r| r.rounds_played()),
            channels: self.channels,
            voice_public: self.voice_public,
        }
    }
}

/// Remove one seat: revoke channel visibility, return the leased credential,
/// move the player to the previous-players list.
async fn remove_member(inner: &mut MatchInner, player: PlayerId, ports: &Ports) {
    let idx = match inner.players.iter().position(|a| a.player == player) {
        Some(idx) => idx,
        None => return,
    };
    let seat = inner.players.remove(idx);
    if let Some((text, voice)) = inner.channels {
        for channel in [text, voice] {
            if let Err(err) = ports.channels.set_visibility(channel, player, false).await {
                tracing::warn!(match_id = inner.id.0, player = player.0, %err,
                    "failed to revoke channel visibility");
            }
        }
    }
    if let Some(credential) = seat.credential {
        ports.accounts.release(credential).await;
    }
    inner.previous_players.push(player);
    inner.log_note(format!("player {player} left the match"), true);
}

/// Publish the status board if it changed since the last publication.
/// A stale handle (`NotFound` on edit) falls back to a fresh send.
async fn publish_board(inner: &mut MatchInner, ports: &Ports) {
    let (text, _) = match inner.channels {
        Some(pair) => pair,
        None => return,
    };
    let notice = inner.board_notice();
    let published = match &inner.board {
        Some((_, last)) if *last == notice => return,
        Some((handle, _)) => Some(*handle),
        None => None,
    };
    if let Some(handle) = published {
        match ports.notifier.edit(handle, notice.clone()).await {
            Ok(()) => {
                inner.board = Some((handle, notice));
                return;
            }
            Err(PortError::NotFound) => {}
            Err(err) => {
                tracing::warn!(match_id = inner.id.0, %err, "status board edit failed");
                return;
            }
        }
    }
    match ports.notifier.notify(Target::Channel(text), notice.clone()).await {
        Ok(handle) => inner.board = Some((handle, notice)),
        Err(err) => {
            tracing::warn!(match_id = inner.id.0, %err, "status board publish failed");
        }
    }
}

/// Shared handle to one match. Every mutating sequence that spans a
/// suspension point runs under the inner mutex, so user actions, the update
/// tick, and termination serialize against each other.
#[derive(Clone)]
pub struct MatchHandle {
    pub(crate) inner: Arc<Mutex<MatchInner>>,
}

impl MatchHandle {
    pub(crate) fn new(inner: MatchInner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn id(&self) -> MatchId {
        self.inner.lock().await.id
    }

    pub async fn owner(&self) -> PlayerId {
        self.inner.lock().await.owner
    }

    pub async fn info(&self) -> MatchInfo {
        self.inner.lock().await.info()
    }

    pub async fn read_log(&self, cursor: LogCursor) -> (Vec<LogEntry<MatchNote>>, LogCursor) {
        self.inner.lock().await.log.read_from(cursor)
    }

    pub async fn invited_contains(&self, player: PlayerId) -> bool {
        self.inner.lock().await.invited.contains(&player)
    }

    /// Add a player to the match's own invited list. No-op if already there.
    pub async fn invite(&self, player: PlayerId) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.invited.contains(&player) {
            return false;
        }
        inner.invited.push(player);
        inner.log_note(format!("player {player} invited"), true);
        true
    }

    /// Drop a player from the invited list. No-op if absent.
    pub async fn decline_invite(&self, player: PlayerId) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.invited.len();
        inner.invited.retain(|p| *p != player);
        inner.invited.len() != before
    }

    pub(crate) async fn attach_channels(&self, text: ChannelId, voice: ChannelId, ports: &Ports) {
        let mut inner = self.inner.lock().await;
        inner.channels = Some((text, voice));
        let roster = inner.roster_ids();
        for player in roster {
            for channel in [text, voice] {
                if let Err(err) = ports.channels.set_visibility(channel, player, true).await {
                    tracing::warn!(match_id = inner.id.0, player = player.0, %err,
                        "failed to grant channel visibility");
                }
            }
        }
    }

    pub(crate) async fn join(
        &self,
        player: PlayerId,
        ports: &Ports,
        config: &ServerConfig,
    ) -> Result<(), JoinError> {
        let mut inner = self.inner.lock().await;
        if inner.is_ended() {
            return Err(JoinError::Ended);
        }
        if inner.roster_contains(player) {
            return Err(JoinError::AlreadyJoined);
        }
        if inner.players.len() >= config.max_players(inner.kind) {
            return Err(JoinError::MatchFull);
        }
        inner.invited.retain(|p| *p != player);
        let credential = ports.accounts.pick(player).await;
        inner
            .players
            .push(ActivePlayer::new(player, now_ms()).with_credential(credential));
        if let Some((text, voice)) = inner.channels {
            for channel in [text, voice] {
                if let Err(err) = ports.channels.set_visibility(channel, player, true).await {
                    tracing::warn!(match_id = inner.id.0, player = player.0, %err,
                        "failed to grant channel visibility");
                }
            }
        }
        inner.log_note(format!("player {player} joined the match"), true);
        Ok(())
    }

    pub(crate) async fn leave(
        &self,
        player: PlayerId,
        ports: &Ports,
    ) -> Result<LeaveOutcome, MatchError> {
        let mut inner = self.inner.lock().await;
        if !inner.roster_contains(player) {
            return Err(MatchError::NotOnRoster);
        }
        if player == inner.owner && !inner.is_ended() {
            if inner.players.len() >= 3 {
                let next = inner
                    .players
                    .iter()
                    .map(|a| a.player)
                    .find(|p| *p != player);
                if let Some(next) = next {
                    inner.owner = next;
                    inner.log_note(format!("ownership handed to player {next}"), true);
                }
            } else {
                return Ok(LeaveOutcome::OwnerEnds);
            }
        }
        remove_member(&mut inner, player, ports).await;
        if inner.players.is_empty() && !inner.is_ended() {
            return Ok(LeaveOutcome::RemovedAndEnd);
        }
        Ok(LeaveOutcome::Removed)
    }

    /// Reassign ownership; with no explicit target, the first roster member
    /// who is not the current owner. Returns false if nobody qualifies.
    pub(crate) async fn change_owner(&self, player: Option<PlayerId>) -> bool {
        let mut inner = self.inner.lock().await;
        let next = match player {
            Some(p) if p != inner.owner && inner.roster_contains(p) => Some(p),
            Some(_) => None,
            None => {
                let owner = inner.owner;
                inner.players.iter().map(|a| a.player).find(|p| *p != owner)
            }
        };
        match next {
            Some(next) => {
                inner.owner = next;
                inner.log_note(format!("ownership handed to player {next}"), true);
                true
            }
            None => false,
        }
    }

    /// In-lock half of termination. Returns `None` when the match already
    /// ended, which is what makes ending idempotent.
    pub(crate) async fn finish(&self, ports: &Ports) -> Option<MatchFinish> {
        let mut inner = self.inner.lock().await;
        if inner.is_ended() {
            return None;
        }
        inner.state = MatchState::Ended;
        inner.ended_at_ms = Some(now_ms());
        inner.tick.cancel();
        inner.log_note("match ended".to_string(), true);

        // Sweep the remaining roster; the terminal state above keeps each
        // departure from re-entering termination.
        let roster = inner.roster_ids();
        for player in roster.iter().copied() {
            remove_member(&mut inner, player, ports).await;
        }

        let record = inner.record();
        match serde_json::to_value(&record) {
            Ok(doc) => {
                if let Err(err) = ports.store.set("matches", inner.id.0, doc).await {
                    tracing::warn!(match_id = inner.id.0, %err, "terminal snapshot write failed");
                }
            }
            Err(err) => {
                tracing::warn!(match_id = inner.id.0, %err, "terminal snapshot encode failed");
            }
        }
        publish_board(&mut inner, ports).await;

        Some(MatchFinish {
            record,
            removed: roster,
            channels: inner.channels,
        })
    }

    /// One update pass: timeout clock, state recomputation, status board.
    pub(crate) async fn update(&self, ports: &Ports, config: &ServerConfig) -> UpdateOutcome {
        let mut inner = self.inner.lock().await;
        if inner.is_ended() {
            return UpdateOutcome::Stop;
        }

        let roster = inner.roster_ids();
        let mut online = 0usize;
        for player in roster {
            if ports.presence.is_online(player).await {
                online += 1;
            }
        }

        match inner.step_timeout(Instant::now(), online, config) {
            TimeoutStep::Expired => {
                inner.log_note("match timed out".to_string(), true);
                tracing::info!(match_id = inner.id.0, "match timed out");
                if let Some((text, _)) = inner.channels {
                    let notice = Notice::MatchTimedOut { match_id: inner.id };
                    if let Err(err) = ports.notifier.notify(Target::Channel(text), notice).await {
                        tracing::warn!(match_id = inner.id.0, %err, "timeout notice failed");
                    }
                }
                return UpdateOutcome::EndMatch;
            }
            TimeoutStep::Warned { seconds_left } => {
                inner.log_note(
                    format!("match will time out in {seconds_left}s"),
                    true,
                );
                if let Some((text, _)) = inner.channels {
                    let notice = Notice::MatchExpiryWarning {
                        match_id: inner.id,
                        seconds_left,
                    };
                    if let Err(err) = ports.notifier.notify(Target::Channel(text), notice).await {
                        tracing::warn!(match_id = inner.id.0, %err, "timeout warning failed");
                    }
                }
            }
            TimeoutStep::Quiet => {}
        }

        inner.state = inner.computed_state(online);
        publish_board(&mut inner, ports).await;
        UpdateOutcome::Reschedule
    }

    /// One-shot check that every seat got a credential from the pool.
    pub(crate) async fn credential_check(&self, ports: &Ports) {
        let mut inner = self.inner.lock().await;
        if inner.is_ended() {
            return;
        }
        let missing: Vec<PlayerId> = inner
            .players
            .iter()
            .filter(|a| a.credential.is_none())
            .map(|a| a.player)
            .collect();
        for player in missing {
            inner.log_note(format!("player {player} has no game account assigned"), false);
            let notice = Notice::MissingCredential { match_id: inner.id };
            if let Err(err) = ports.notifier.notify(Target::Player(player), notice).await {
                tracing::warn!(match_id = inner.id.0, player = player.0, %err,
                    "credential notice failed");
            }
        }
    }

    pub(crate) async fn submit_score(
        &self,
        player: PlayerId,
        score: i8,
    ) -> Result<Option<RoundResolution>, ScoreError> {
        let mut inner = self.inner.lock().await;
        if inner.is_ended() {
            return Err(ScoreError::Ended);
        }
        let result = match inner.rounds.as_mut() {
            Some(rounds) => rounds.submit(player, score),
            None => return Err(ScoreError::NotRanked),
        };
        match result {
            Ok(Some(resolution)) => {
                inner.log_note(
                    format!(
                        "round {} goes to player {}",
                        resolution.round, resolution.winner
                    ),
                    true,
                );
                Ok(Some(resolution))
            }
            Ok(None) => {
                inner.log_note(format!("player {player} submitted a score"), false);
                Ok(None)
            }
            Err(RoundError::Inconsistent) => {
                let id = inner.id;
                inner.log_note("round scores disagree".to_string(), false);
                Err(ScoreError::Invariant(InvariantError::InconsistentRound {
                    match_id: id,
                }))
            }
            Err(RoundError::UnknownPlayer) => Err(ScoreError::UnknownPlayer),
            Err(RoundError::InvalidScore) => Err(ScoreError::InvalidScore),
            Err(RoundError::AlreadySubmitted) => Err(ScoreError::AlreadySubmitted),
        }
    }

    pub async fn voice_is_public(&self) -> bool {
        self.inner.lock().await.voice_public
    }

    pub(crate) async fn set_voice(&self, public: bool, ports: &Ports) {
        let mut inner = self.inner.lock().await;
        if inner.voice_public == public {
            return;
        }
        inner.voice_public = public;
        let voice = match inner.channels {
            Some((_, voice)) => voice,
            None => return,
        };
        if let Err(err) = ports.channels.set_public(voice, public).await {
            tracing::warn!(match_id = inner.id.0, %err, "voice permission change failed");
        }
        if !public {
            let allowed = inner.roster_ids();
            if let Err(err) = ports.channels.evict_except(voice, &allowed).await {
                tracing::warn!(match_id = inner.id.0, %err, "voice eviction failed");
            }
        }
        inner.log_note(
            format!(
                "voice channel is now {}",
                if public { "public" } else { "private" }
            ),
            true,
        );
    }

    /// Flip voice visibility; returns the new setting.
    pub(crate) async fn toggle_voice(&self, ports: &Ports) -> bool {
        let target = !self.voice_is_public().await;
        self.set_voice(target, ports).await;
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> ServerConfig {
        ServerConfig {
            match_warn_after: Duration::from_secs(60),
            match_timeout_after: Duration::from_secs(120),
            ..ServerConfig::default()
        }
    }

    fn inner_with_players(n: u64) -> MatchInner {
        let config = test_config();
        let mut inner = MatchInner::new(
            MatchId(1),
            MatchKind::Casual,
            PlayerId(1),
            0,
            &config,
        );
        for i in 1..=n {
            inner.players.push(ActivePlayer::new(PlayerId(i), 0));
        }
        inner
    }

    #[test]
    fn test_state_inviting_below_two_players() {
        let inner = inner_with_players(1);
        assert_eq!(inner.computed_state(1), MatchState::Inviting);
    }

    #[test]
    fn test_state_logging_in_until_two_online() {
        let inner = inner_with_players(2);
        assert_eq!(inner.computed_state(0), MatchState::LoggingIn);
        assert_eq!(inner.computed_state(1), MatchState::LoggingIn);
        assert_eq!(inner.computed_state(2), MatchState::Playing);
    }

    #[test]
    fn test_ranked_states_follow_round_protocol() {
        let mut inner = inner_with_players(2);
        inner.rounds = Some(RoundProtocol::new(PlayerId(1), PlayerId(2), 3));
        assert_eq!(inner.computed_state(2), MatchState::GettingReady);

        if let Some(rounds) = inner.rounds.as_mut() {
            rounds.submit(PlayerId(1), 1).unwrap();
        }
        assert_eq!(inner.computed_state(2), MatchState::Submitting);

        if let Some(rounds) = inner.rounds.as_mut() {
            rounds.submit(PlayerId(2), -1).unwrap();
        }
        assert_eq!(inner.computed_state(2), MatchState::Playing);
    }

    #[test]
    fn test_timeout_arms_when_roster_goes_idle() {
        let config = test_config();
        let mut inner = inner_with_players(2);
        let t0 = Instant::now();

        assert_eq!(inner.step_timeout(t0, 2, &config), TimeoutStep::Quiet);
        assert!(inner.idle_since.is_none());

        assert_eq!(inner.step_timeout(t0, 1, &config), TimeoutStep::Quiet);
        assert_eq!(inner.idle_since, Some(t0));
    }

    #[test]
    fn test_timeout_warns_then_expires() {
        let config = test_config();
        let mut inner = inner_with_players(2);
        let t0 = Instant::now();

        inner.step_timeout(t0, 0, &config);
        assert!(matches!(
            inner.step_timeout(t0 + Duration::from_secs(61), 0, &config),
            TimeoutStep::Warned { .. }
        ));
        // Warned only once.
        assert_eq!(
            inner.step_timeout(t0 + Duration::from_secs(62), 0, &config),
            TimeoutStep::Quiet
        );
        assert_eq!(
            inner.step_timeout(t0 + Duration::from_secs(121), 0, &config),
            TimeoutStep::Expired
        );
        assert!(inner.was_timeout);
    }

    #[test]
    fn test_timeout_clock_clears_on_recovery() {
        let config = test_config();
        let mut inner = inner_with_players(2);
        let t0 = Instant::now();

        inner.step_timeout(t0, 0, &config);
        inner.step_timeout(t0 + Duration::from_secs(61), 0, &config);
        assert!(inner.timeout_warned);

        assert_eq!(
            inner.step_timeout(t0 + Duration::from_secs(70), 2, &config),
            TimeoutStep::Quiet
        );
        assert!(inner.idle_since.is_none());
        assert!(!inner.timeout_warned);
    }
}
