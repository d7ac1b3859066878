use duel_core::MatchKind;
use std::time::Duration;

/// Configuration for the coordination server.
///
/// Durations are plain fields so tests can run the whole lifecycle on
/// millisecond windows.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// How long a player may idle in a lobby before the sweep removes them.
    pub lobby_window: Duration,
    /// A lobbied player is warned once this close to the window's end.
    pub lobby_warn_margin: Duration,
    /// Interval between lobby sweep passes.
    pub sweep_interval: Duration,
    /// Interval between match update passes.
    pub update_interval: Duration,
    /// Idle span after which a match gets a timeout warning.
    pub match_warn_after: Duration,
    /// Idle span after which a match is ended. Must exceed `match_warn_after`.
    pub match_timeout_after: Duration,
    /// Delay before the one-shot credential check after match creation.
    pub credential_check_delay: Duration,
    /// Pause between roster teardown and the handoff to match history.
    pub end_grace: Duration,
    /// Roster cap for casual matches.
    pub max_players_casual: usize,
    /// Roster cap for ranked matches.
    pub max_players_ranked: usize,
    /// Rounds a ranked match runs before it ends.
    pub ranked_rounds: u32,
    /// Ended matches retained before the oldest are evicted.
    pub history_cap: usize,
    /// Attempts for external deliveries (invite DMs, channel provisioning).
    pub delivery_attempts: u32,
    /// Entries retained per activity log.
    pub log_capacity: usize,
}

impl ServerConfig {
    pub fn max_players(&self, kind: MatchKind) -> usize {
        match kind {
            MatchKind::Casual => self.max_players_casual,
            MatchKind::Ranked => self.max_players_ranked,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lobby_window: Duration::from_secs(30 * 60),
            lobby_warn_margin: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(10),
            update_interval: Duration::from_secs(30),
            match_warn_after: Duration::from_secs(12 * 60),
            match_timeout_after: Duration::from_secs(15 * 60),
            credential_check_delay: Duration::from_secs(5 * 60),
            end_grace: Duration::from_secs(10),
            max_players_casual: 4,
            max_players_ranked: 2,
            ranked_rounds: 5,
            history_cap: 100,
            delivery_attempts: 3,
            log_capacity: 200,
        }
    }
}
