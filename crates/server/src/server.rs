use crate::config::ServerConfig;
use crate::errors::{
    InvariantError, InviteError, JoinError, LobbyError, MatchError, PortError, ScoreError,
};
use crate::lobby::LobbyHandle;
use crate::match_handle::{LeaveOutcome, MatchHandle, MatchInner, MatchNote, UpdateOutcome};
use crate::ports::{Notice, Ports, Target};
use crate::types::{now_ms, MatchInfo, MatchRecord, PlayerSlot};
use duel_core::{
    ActivePlayer, ChannelId, LogCursor, LogEntry, MatchId, MatchKind, PlayerId, RoundProtocol,
    RoundResolution,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

struct LobbyEntry {
    handle: LobbyHandle,
    sweep: JoinHandle<()>,
}

/// The coordination server: registry of lobbies, active matches, and recent
/// match history, plus the match-ID counter.
///
/// All cross-component state is resolved through this registry by ID; lobbies
/// and matches never hold pointers to each other.
pub struct DuelServer {
    config: ServerConfig,
    ports: Ports,
    self_weak: Weak<DuelServer>,
    lobbies: RwLock<HashMap<String, LobbyEntry>>,
    active: RwLock<HashMap<MatchId, MatchHandle>>,
    history: Mutex<VecDeque<MatchRecord>>,
    /// Where each player currently sits; lobbied and matched are mutually
    /// exclusive because a player holds at most one slot.
    slots: Mutex<HashMap<PlayerId, PlayerSlot>>,
    next_match_id: AtomicU64,
}

impl DuelServer {
    /// Build a server, recovering the match-ID counter from the last
    /// persisted match so IDs stay strictly increasing across restarts.
    pub async fn new(config: ServerConfig, ports: Ports) -> Arc<Self> {
        let next_id = match ports.store.get_last("matches").await {
            Ok(Some(doc)) => doc
                .get("id")
                .and_then(|v| v.as_u64())
                .map(|id| id + 1)
                .unwrap_or(1),
            Ok(None) => 1,
            Err(err) => {
                tracing::warn!(%err, "match counter recovery failed, starting at 1");
                1
            }
        };
        Arc::new_cyclic(|weak| Self {
            config,
            ports,
            self_weak: weak.clone(),
            lobbies: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            slots: Mutex::new(HashMap::new()),
            next_match_id: AtomicU64::new(next_id),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn match_handle(&self, id: MatchId) -> Option<MatchHandle> {
        self.active.read().await.get(&id).cloned()
    }

    async fn lobby_entry(&self, name: &str) -> Option<LobbyHandle> {
        self.lobbies.read().await.get(name).map(|e| e.handle.clone())
    }

    async fn player_slot(&self, player: PlayerId) -> Option<PlayerSlot> {
        self.slots.lock().await.get(&player).cloned()
    }

    // ----- lobbies ---------------------------------------------------------

    /// Register a lobby and start its sweep loop. Returns the existing
    /// handle when the name is already taken.
    pub async fn create_lobby(&self, name: &str) -> LobbyHandle {
        let mut lobbies = self.lobbies.write().await;
        if let Some(entry) = lobbies.get(name) {
            return entry.handle.clone();
        }
        let handle = LobbyHandle::new(name.to_string(), self.config.log_capacity);
        let sweep = spawn_sweep(
            self.self_weak.clone(),
            name.to_string(),
            self.config.sweep_interval,
        );
        lobbies.insert(
            name.to_string(),
            LobbyEntry {
                handle: handle.clone(),
                sweep,
            },
        );
        tracing::info!(lobby = name, "lobby created");
        handle
    }

    pub async fn lobby(&self, name: &str) -> Option<LobbyHandle> {
        self.lobby_entry(name).await
    }

    /// Seat a player in a lobby. Rejected if they are lobbied or matched
    /// anywhere in the system.
    pub async fn lobby_join(&self, name: &str, player: PlayerId) -> Result<(), LobbyError> {
        match self.player_slot(player).await {
            Some(PlayerSlot::Lobby(_)) => return Err(LobbyError::AlreadyLobbied),
            Some(PlayerSlot::Match(_)) => return Err(LobbyError::AlreadyInMatch),
            None => {}
        }
        let lobby = self.lobby_entry(name).await.ok_or(LobbyError::UnknownLobby)?;
        let deadline = Instant::now() + self.config.lobby_window;
        if !lobby.seat(player, deadline).await {
            return Err(LobbyError::AlreadyLobbied);
        }
        self.slots
            .lock()
            .await
            .insert(player, PlayerSlot::Lobby(name.to_string()));
        tracing::info!(lobby = name, player = player.0, "player lobbied");
        Ok(())
    }

    /// Remove a player from a lobby. False if they were not seated.
    pub async fn lobby_leave(&self, name: &str, player: PlayerId) -> bool {
        let Some(lobby) = self.lobby_entry(name).await else {
            return false;
        };
        if !lobby.remove_seat(player, None).await {
            return false;
        }
        self.slots.lock().await.remove(&player);
        true
    }

    /// Refresh a lobbied player's idle deadline and clear any pending
    /// warning. False if they are not seated.
    pub async fn reset_timeout(&self, name: &str, player: PlayerId) -> bool {
        let Some(lobby) = self.lobby_entry(name).await else {
            return false;
        };
        lobby
            .reset_deadline(player, Instant::now() + self.config.lobby_window)
            .await
    }

    /// One sweep pass over a lobby: drop overdue players, warn the ones
    /// close to their deadline.
    pub(crate) async fn sweep_lobby(&self, name: &str) {
        let Some(lobby) = self.lobby_entry(name).await else {
            return;
        };
        let report = lobby
            .sweep(Instant::now(), self.config.lobby_warn_margin)
            .await;

        for player in report.expired {
            self.slots.lock().await.remove(&player);
            tracing::info!(lobby = name, player = player.0, "lobbied player timed out");
            if let Err(err) = self
                .ports
                .notifier
                .notify(Target::Player(player), Notice::LobbyTimedOut)
                .await
            {
                tracing::warn!(player = player.0, %err, "lobby timeout notice failed");
            }
        }
        for (player, left) in report.warned {
            let notice = Notice::LobbyExpiryWarning {
                seconds_left: left.as_secs(),
            };
            if let Err(err) = self
                .ports
                .notifier
                .notify(Target::Player(player), notice)
                .await
            {
                tracing::warn!(player = player.0, %err, "lobby warning notice failed");
            }
        }
    }

    // ----- invites ---------------------------------------------------------

    /// Deliver an invite DM with a bounded retry budget, then register the
    /// invite. Permanent delivery failure registers nothing.
    pub async fn send_invite(
        &self,
        name: &str,
        owner: PlayerId,
        invited: PlayerId,
        kind: MatchKind,
    ) -> Result<(), InviteError> {
        if owner == invited {
            return Err(InviteError::SelfInvite);
        }
        let pending = self.already_invited(name, owner, &[invited]).await?;
        if !pending.is_empty() {
            return Err(InviteError::AlreadyInvited);
        }

        let mut attempt = 0;
        loop {
            match self
                .ports
                .notifier
                .notify(Target::Player(invited), Notice::InviteOffer { from: owner })
                .await
            {
                Ok(_) => break,
                Err(PortError::Forbidden) => return Err(InviteError::Unreachable),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.delivery_attempts {
                        tracing::warn!(player = invited.0, %err, "invite delivery gave up");
                        return Err(InviteError::Unreachable);
                    }
                }
            }
        }
        self.invite(name, owner, invited, kind).await
    }

    /// Register an invite without delivering anything. Owners with an active
    /// match delegate to that match's invited list; everyone else gets a
    /// free invite recorded in the lobby.
    pub async fn invite(
        &self,
        name: &str,
        owner: PlayerId,
        invited: PlayerId,
        kind: MatchKind,
    ) -> Result<(), InviteError> {
        if owner == invited {
            return Err(InviteError::SelfInvite);
        }
        if let Some(PlayerSlot::Match(match_id)) = self.player_slot(owner).await {
            if let Some(handle) = self.match_handle(match_id).await {
                if handle.owner().await != owner {
                    return Err(InviteError::Invariant(InvariantError::NotMatchOwner {
                        player: owner,
                        match_id,
                    }));
                }
                if !handle.invite(invited).await {
                    return Err(InviteError::AlreadyInvited);
                }
                return Ok(());
            }
        }
        let lobby = self.lobby_entry(name).await.ok_or(InviteError::UnknownLobby)?;
        if !lobby.add_free_invite(owner, invited, kind).await {
            return Err(InviteError::AlreadyInvited);
        }
        Ok(())
    }

    /// Resolve an accepted invite: join the owner's existing match, reject a
    /// stale offer, or seed a fresh match and migrate the owner's remaining
    /// free invites onto it.
    pub async fn accept_invite(
        &self,
        name: &str,
        owner: PlayerId,
        invited: PlayerId,
    ) -> Result<MatchId, InviteError> {
        if let Some(PlayerSlot::Match(match_id)) = self.player_slot(owner).await {
            if let Some(handle) = self.match_handle(match_id).await {
                if handle.owner().await == owner {
                    self.join_match(match_id, invited)
                        .await
                        .map_err(InviteError::Join)?;
                    return Ok(match_id);
                }
            }
            // The inviter moved on into someone else's match.
            return Err(InviteError::Stale);
        }

        let lobby = self.lobby_entry(name).await.ok_or(InviteError::UnknownLobby)?;
        let kind = lobby
            .free_invite_for(owner, invited)
            .await
            .ok_or(InviteError::NoSuchInvite)?;
        if let Some(PlayerSlot::Match(other)) = self.player_slot(invited).await {
            return Err(InviteError::Join(JoinError::AlreadyInMatch(other)));
        }

        // Remember which lobbies to pull the participants out of.
        let owner_lobby = match self.player_slot(owner).await {
            Some(PlayerSlot::Lobby(n)) => Some(n),
            _ => None,
        };
        let invited_lobby = match self.player_slot(invited).await {
            Some(PlayerSlot::Lobby(n)) => Some(n),
            _ => None,
        };

        lobby.remove_free_invite(owner, invited).await;
        let match_id = self
            .create_match(owner, invited, kind)
            .await
            .map_err(InviteError::Match)?;

        let remaining = lobby.take_free_invites(owner).await;
        if let Some(handle) = self.match_handle(match_id).await {
            for invite in remaining {
                handle.invite(invite.to).await;
            }
        }

        for (player, lobby_name) in [(owner, owner_lobby), (invited, invited_lobby)] {
            if let Some(lobby_name) = lobby_name {
                if let Some(lobby) = self.lobby_entry(&lobby_name).await {
                    lobby.remove_seat(player, Some(match_id)).await;
                }
            }
        }

        Ok(match_id)
    }

    /// Withdraw an invite from wherever it lives. False if none is pending.
    pub async fn decline_invite(&self, name: &str, owner: PlayerId, player: PlayerId) -> bool {
        if let Some(PlayerSlot::Match(match_id)) = self.player_slot(owner).await {
            if let Some(handle) = self.match_handle(match_id).await {
                if handle.owner().await == owner && handle.decline_invite(player).await {
                    return true;
                }
            }
        }
        match self.lobby_entry(name).await {
            Some(lobby) => lobby.remove_free_invite(owner, player).await,
            None => false,
        }
    }

    /// The subset of `candidates` that already hold a pending invite from
    /// `owner`, checked against both storage locations.
    pub async fn already_invited(
        &self,
        name: &str,
        owner: PlayerId,
        candidates: &[PlayerId],
    ) -> Result<Vec<PlayerId>, InviteError> {
        let lobby = self.lobby_entry(name).await.ok_or(InviteError::UnknownLobby)?;
        let mut match_invited = Vec::new();
        if let Some(PlayerSlot::Match(match_id)) = self.player_slot(owner).await {
            if let Some(handle) = self.match_handle(match_id).await {
                if handle.owner().await == owner {
                    match_invited = handle.info().await.invited;
                }
            }
        }

        let mut pending = Vec::new();
        for candidate in candidates {
            if match_invited.contains(candidate)
                || lobby.has_free_invite(owner, *candidate).await
            {
                pending.push(*candidate);
            }
        }
        Ok(pending)
    }

    // ----- matches ---------------------------------------------------------

    /// Open a match for the two seed players: allocate the next ID, lease
    /// credentials, provision channels, arm the credential audit and the
    /// update tick chain.
    pub async fn create_match(
        &self,
        owner: PlayerId,
        invited: PlayerId,
        kind: MatchKind,
    ) -> Result<MatchId, MatchError> {
        let id = MatchId(self.next_match_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = MatchInner::new(id, kind, owner, now_ms(), &self.config);
        for player in [owner, invited] {
            let credential = self.ports.accounts.pick(player).await;
            inner
                .players
                .push(ActivePlayer::new(player, now_ms()).with_credential(credential));
        }
        if kind == MatchKind::Ranked {
            inner.rounds = Some(RoundProtocol::new(owner, invited, self.config.ranked_rounds));
        }
        inner.log_note(format!("match opened by player {owner}"), true);
        let handle = MatchHandle::new(inner);

        self.active.write().await.insert(id, handle.clone());
        {
            let mut slots = self.slots.lock().await;
            slots.insert(owner, PlayerSlot::Match(id));
            slots.insert(invited, PlayerSlot::Match(id));
        }
        tracing::info!(match_id = id.0, owner = owner.0, invited = invited.0, "match created");

        match self.provision_channels(id).await {
            Ok((text, voice)) => handle.attach_channels(text, voice, &self.ports).await,
            Err(err) => {
                // Never leave the match in limbo: tear it down through the
                // normal path and report the failure.
                tracing::warn!(match_id = id.0, %err, "channel provisioning failed");
                self.end_match(id).await;
                return Err(MatchError::ChannelsUnavailable);
            }
        }

        let weak = self.self_weak.clone();
        let delay = self.config.credential_check_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(server) = weak.upgrade() {
                if let Some(handle) = server.match_handle(id).await {
                    handle.credential_check(&server.ports).await;
                }
            }
        });

        self.drive_match(id).await;
        Ok(id)
    }

    async fn provision_channels(&self, id: MatchId) -> Result<(ChannelId, ChannelId), PortError> {
        let mut attempt = 0;
        loop {
            match self.ports.channels.create_match_channels(id).await {
                Ok(pair) => return Ok(pair),
                Err(PortError::Forbidden) => return Err(PortError::Forbidden),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.delivery_attempts {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Join a player into an active match. A lobbied player is pulled out of
    /// their lobby, tagged as moved rather than left.
    pub async fn join_match(&self, id: MatchId, player: PlayerId) -> Result<(), JoinError> {
        let from_lobby = match self.player_slot(player).await {
            Some(PlayerSlot::Match(current)) if current == id => {
                return Err(JoinError::AlreadyJoined)
            }
            Some(PlayerSlot::Match(current)) => return Err(JoinError::AlreadyInMatch(current)),
            Some(PlayerSlot::Lobby(name)) => Some(name),
            None => None,
        };

        let handle = self.match_handle(id).await.ok_or(JoinError::NotFound)?;
        handle.join(player, &self.ports, &self.config).await?;

        if let Some(name) = from_lobby {
            if let Some(lobby) = self.lobby_entry(&name).await {
                lobby.remove_seat(player, Some(id)).await;
            }
        }
        self.slots
            .lock()
            .await
            .insert(player, PlayerSlot::Match(id));
        self.drive_match(id).await;
        Ok(())
    }

    /// Remove a player from a match. A departing owner hands the match off
    /// when at least three are seated, otherwise the match ends; an emptied
    /// roster also ends it.
    pub async fn leave_match(&self, id: MatchId, player: PlayerId) -> Result<(), MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        match handle.leave(player, &self.ports).await? {
            LeaveOutcome::Removed => {
                self.slots.lock().await.remove(&player);
                self.drive_match(id).await;
            }
            LeaveOutcome::RemovedAndEnd => {
                self.slots.lock().await.remove(&player);
                self.end_match(id).await;
            }
            LeaveOutcome::OwnerEnds => {
                self.end_match(id).await;
            }
        }
        Ok(())
    }

    /// Reassign match ownership. With `None`, the first non-owner roster
    /// member is picked. Returns false if nobody qualifies.
    pub async fn change_owner(
        &self,
        id: MatchId,
        player: Option<PlayerId>,
    ) -> Result<bool, MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        let changed = handle.change_owner(player).await;
        if changed {
            self.drive_match(id).await;
        }
        Ok(changed)
    }

    /// End a match. Idempotent: only the call that actually performs the
    /// termination returns true; every other call is a no-op.
    pub async fn end_match(&self, id: MatchId) -> bool {
        let Some(handle) = self.match_handle(id).await else {
            return false;
        };
        let Some(finish) = handle.finish(&self.ports).await else {
            return false;
        };
        {
            let mut slots = self.slots.lock().await;
            for player in &finish.removed {
                slots.remove(player);
            }
        }
        tracing::info!(match_id = id.0, "match ended");

        tokio::time::sleep(self.config.end_grace).await;

        self.active.write().await.remove(&id);
        {
            let mut history = self.history.lock().await;
            history.push_back(finish.record);
            if history.len() > self.config.history_cap {
                let drop_n = ((self.config.history_cap * 2) / 5).max(1);
                for _ in 0..drop_n {
                    history.pop_front();
                }
            }
        }

        if let Some((text, voice)) = finish.channels {
            for channel in [text, voice] {
                if let Err(err) = self.ports.channels.delete(channel).await {
                    tracing::warn!(match_id = id.0, %err, "channel teardown failed");
                }
            }
        }
        true
    }

    /// Submit a ranked round score. Resolving the final round ends the match.
    pub async fn submit_score(
        &self,
        id: MatchId,
        player: PlayerId,
        score: i8,
    ) -> Result<Option<RoundResolution>, ScoreError> {
        let handle = self.match_handle(id).await.ok_or(ScoreError::NotFound)?;
        let resolution = handle.submit_score(player, score).await?;
        match &resolution {
            Some(res) if res.finished => {
                self.end_match(id).await;
            }
            _ => {
                self.drive_match(id).await;
            }
        }
        Ok(resolution)
    }

    pub async fn match_invite(&self, id: MatchId, player: PlayerId) -> Result<bool, MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        Ok(handle.invite(player).await)
    }

    pub async fn match_decline(&self, id: MatchId, player: PlayerId) -> Result<bool, MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        Ok(handle.decline_invite(player).await)
    }

    pub async fn set_voice_public(&self, id: MatchId) -> Result<(), MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        handle.set_voice(true, &self.ports).await;
        Ok(())
    }

    pub async fn set_voice_private(&self, id: MatchId) -> Result<(), MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        handle.set_voice(false, &self.ports).await;
        Ok(())
    }

    /// Flip voice visibility; returns the new setting.
    pub async fn toggle_voice_lock(&self, id: MatchId) -> Result<bool, MatchError> {
        let handle = self.match_handle(id).await.ok_or(MatchError::NotFound)?;
        Ok(handle.toggle_voice(&self.ports).await)
    }

    pub async fn match_info(&self, id: MatchId) -> Option<MatchInfo> {
        let handle = self.match_handle(id).await?;
        Some(handle.info().await)
    }

    pub async fn list_matches(&self) -> Vec<MatchInfo> {
        let handles: Vec<MatchHandle> = self.active.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.info().await);
        }
        infos
    }

    pub async fn match_log(
        &self,
        id: MatchId,
        cursor: LogCursor,
    ) -> Option<(Vec<LogEntry<MatchNote>>, LogCursor)> {
        let handle = self.match_handle(id).await?;
        Some(handle.read_log(cursor).await)
    }

    /// Terminal snapshots of recently ended matches, oldest first.
    pub async fn history(&self) -> Vec<MatchRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// End every active match and stop every lobby sweep.
    pub async fn shutdown(&self) {
        let ids: Vec<MatchId> = self.active.read().await.keys().copied().collect();
        for id in ids {
            self.end_match(id).await;
        }
        let mut lobbies = self.lobbies.write().await;
        for (_, entry) in lobbies.drain() {
            entry.sweep.abort();
        }
        tracing::info!("server shut down");
    }

    /// One update pass for a match, then reschedule, end, or stop according
    /// to the outcome. The tick chain keeps at most one pending pass per
    /// match because arming the timer always cancels the previous one.
    pub(crate) fn drive_match(&self, id: MatchId) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let weak = self.self_weak.clone();
        Box::pin(async move {
            let Some(server) = weak.upgrade() else { return };
            let Some(handle) = server.match_handle(id).await else { return };
            match handle.update(&server.ports, &server.config).await {
                UpdateOutcome::Reschedule => {
                    let weak = server.self_weak.clone();
                    let delay = server.config.update_interval;
                    let mut inner = handle.inner.lock().await;
                    if !inner.is_ended() {
                        inner.tick.arm(
                            delay,
                            Box::pin(async move {
                                if let Some(server) = weak.upgrade() {
                                    server.drive_match(id).await;
                                }
                            }),
                        );
                    }
                }
                UpdateOutcome::EndMatch => {
                    // Detach the termination so this cycle finishes without
                    // waiting on the full teardown.
                    let weak = server.self_weak.clone();
                    tokio::spawn(async move {
                        if let Some(server) = weak.upgrade() {
                            server.end_match(id).await;
                        }
                    });
                }
                UpdateOutcome::Stop => {}
            }
        })
    }
}

fn spawn_sweep(weak: Weak<DuelServer>, name: String, period: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; a fresh lobby should not be
        // swept at creation time.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(server) = weak.upgrade() else { break };
            server.sweep_lobby(&name).await;
        }
    })
}
