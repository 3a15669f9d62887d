//! Multi-room TCP chat server
//!
//! Clients connect with any line-oriented client (netcat works), pick a
//! display name and a room, and chat. Lines in the open room are persisted to
//! SQLite and replayed to new arrivals.
//!
//! Usage:
//!   cargo run -- serve                  # listen on 0.0.0.0:2000
//!   cargo run -- serve --port 2100      # listen on a specific port

use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use parlor::history::SqliteHistory;
use parlor::server::{ChatServer, RoomRegistry};
use parlor::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => run_server(&args).await?,
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Parlor - Multi-Room TCP Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- serve [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    serve               Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 2000)");
    println!("    --db <PATH>         History database path (default: ./chat.db)");
    println!("    --password <PASS>   Password for the locked room (default: 1234)");
    println!();
    println!("ROOMS:");
    println!("    [1] Common-open room    Open to everyone; recent messages replayed");
    println!("    [2] Common-lock room    Requires the shared password");
    println!("    [3] Private room        Open to everyone, nothing persisted");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- serve");
    println!("    cargo run -- serve --port 2100 --password hunter2");
    println!("    RUST_LOG=debug cargo run -- serve");
}

fn parse_flag<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    for i in 0..args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(&args[i + 1]);
        }
    }
    None
}

fn parse_port(args: &[String]) -> u16 {
    parse_flag(args, "--port")
        .and_then(|value| value.parse().ok())
        .unwrap_or(2000)
}

async fn run_server(args: &[String]) -> Result<()> {
    let defaults = ServerConfig::default();
    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", parse_port(args)).parse()?,
        room_password: parse_flag(args, "--password")
            .map(str::to_string)
            .unwrap_or(defaults.room_password),
        history_db: parse_flag(args, "--db")
            .map(str::to_string)
            .unwrap_or(defaults.history_db),
        ..ServerConfig::default()
    };

    info!("Configuration:");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - History database: {}", config.history_db);

    let history = Arc::new(SqliteHistory::open(&config.history_db)?);
    let registry = Arc::new(RoomRegistry::builtin());

    info!("Chat server with SQLite persistence starting");

    let server = ChatServer::new(config, registry, history);
    server.run().await?;
    Ok(())
}
