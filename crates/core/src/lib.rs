pub mod log;
pub mod player;
pub mod round;
pub mod types;

pub use log::{LogBuffer, LogCursor, LogEntry};
pub use player::ActivePlayer;
pub use round::{RoundError, RoundProtocol, RoundResolution};
pub use types::{ChannelId, CredentialId, MatchId, MatchKind, MatchState, PlayerId};
