//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p shooter_server -- [--addr 127.0.0.1:41000] [--tick-hz 64] [--replicate-ragdoll]
//!
//! The server listens for client connections, runs a fixed timestep
//! simulation, validates action requests and broadcasts the responses,
//! and replicates equip/health/aim state.
//!
//! Console commands:
//!   status                  - Show server status
//!   give <client> [mag]     - Equip a rifle
//!   strip <client>          - Clear the equip slot
//!   hurt <client> <amount>  - Apply damage
//!   ragdoll <client>        - Force ragdoll
//!   getup <client>          - Force standing up
//!   quit                    - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use shooter_server::GameServer;
use shooter_shared::config::GameConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> GameConfig {
    let mut cfg = GameConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(64);
                i += 2;
            }
            "--replicate-ragdoll" => {
                cfg.replicate_ragdoll = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        replicate_ragdoll = cfg.replicate_ragdoll,
        "Starting server"
    );

    let mut server = GameServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(Duration::from_millis(1)).await {
            info!(client_id = ?cid, "New client accepted");
        }

        server.step(tick_interval).await?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
