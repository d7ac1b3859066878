//! Scripted in-process walkthrough of the duel coordination server: two
//! players queue in a lobby, trade an invite, and play a ranked match to
//! completion against the in-memory port adapters.

use clap::Parser;
use duel_core::{LogCursor, MatchKind, PlayerId};
use duel_server::memory::{
    MemoryAllocator, MemoryChannels, MemoryPresence, MemoryStore, RecordingNotifier,
};
use duel_server::{DuelServer, Ports, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "duel-demo")]
#[command(about = "Scripted lobby -> invite -> ranked match walkthrough")]
struct Args {
    /// Rounds the ranked match runs.
    #[arg(long, default_value = "3")]
    rounds: u32,

    /// Update tick interval in milliseconds.
    #[arg(long, default_value = "100")]
    tick_ms: u64,
}

const ALICE: PlayerId = PlayerId(1);
const BOB: PlayerId = PlayerId(2);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    println!("=== Duel Coordination Demo ===\n");

    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let accounts = Arc::new(MemoryAllocator::new(8));
    let channels = Arc::new(MemoryChannels::new());
    let presence = Arc::new(MemoryPresence::new());

    let config = ServerConfig {
        update_interval: Duration::from_millis(args.tick_ms),
        sweep_interval: Duration::from_millis(args.tick_ms),
        end_grace: Duration::from_millis(50),
        ranked_rounds: args.rounds,
        ..ServerConfig::default()
    };

    let server = DuelServer::new(
        config,
        Ports {
            store: store.clone(),
            notifier: notifier.clone(),
            accounts: accounts.clone(),
            channels: channels.clone(),
            presence: presence.clone(),
        },
    )
    .await;

    server.create_lobby("arena").await;
    server.lobby_join("arena", ALICE).await.expect("alice joins lobby");
    server.lobby_join("arena", BOB).await.expect("bob joins lobby");
    println!("Alice and Bob are waiting in the arena lobby.");

    server
        .send_invite("arena", ALICE, BOB, MatchKind::Ranked)
        .await
        .expect("invite delivered");
    let match_id = server
        .accept_invite("arena", ALICE, BOB)
        .await
        .expect("invite accepted");
    println!("Bob accepted; match {match_id} created.\n");

    // Both characters come online; the next ticks move the match along.
    presence.set_online(ALICE, true);
    presence.set_online(BOB, true);
    sleep(Duration::from_millis(args.tick_ms * 3)).await;

    if let Some(info) = server.match_info(match_id).await {
        println!("Match {} is {} with roster {:?}.", info.id, info.state, info.roster);
    }

    // Alice takes the odd rounds, Bob the even ones.
    for round in 1..=args.rounds {
        let (alice_score, bob_score) = if round % 2 == 1 { (1, -1) } else { (-1, 1) };
        server
            .submit_score(match_id, ALICE, alice_score)
            .await
            .expect("alice submits");
        let resolution = server
            .submit_score(match_id, BOB, bob_score)
            .await
            .expect("bob submits")
            .expect("round resolves");
        println!(
            "Round {} goes to player {}{}",
            resolution.round,
            resolution.winner,
            if resolution.finished { " - match over" } else { "" },
        );
    }

    sleep(Duration::from_millis(200)).await;

    println!("\n=== Final State ===");
    println!("Active matches: {}", server.list_matches().await.len());
    for record in server.history().await {
        println!(
            "Match {} ({:?}) ended; rounds played: {:?}, previous players: {:?}",
            record.id, record.kind, record.rounds_played, record.previous_players,
        );
    }
    println!("Stored snapshots: {}", store.len("matches"));
    println!("Notices delivered: {}", notifier.sent().len());

    if let Some(lobby) = server.lobby("arena").await {
        println!("\nLobby log:");
        let (entries, _) = lobby.read_log(LogCursor::default()).await;
        for entry in entries {
            println!("  [{}] {}", entry.at_ms, entry.note);
        }
    }

    server.shutdown().await;
    println!("\nServer shutdown complete.");
}
