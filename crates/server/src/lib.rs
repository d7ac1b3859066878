pub mod config;
pub mod errors;
pub mod lobby;
pub mod match_handle;
pub mod memory;
pub mod ports;
pub mod server;
pub mod timer;
pub mod types;

pub use config::ServerConfig;
pub use errors::{
    InvariantError, InviteError, JoinError, LobbyError, MatchError, PortError, ScoreError,
};
pub use lobby::{FreeInvite, LobbyHandle};
pub use match_handle::{MatchHandle, MatchNote};
pub use ports::{
    AccountAllocator, ChannelProvisioner, MessageHandle, Notice, Notifier, Persistence, Ports,
    PresenceOracle, Target,
};
pub use server::DuelServer;
pub use timer::OneShot;
pub use types::{MatchInfo, MatchRecord, PlayerSlot};
