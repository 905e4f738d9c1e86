//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p shooter_client -- [--addr 127.0.0.1:41000] [--name Player]
//!
//! The client connects to the server, sends aim commands, relays action
//! requests, and applies broadcast responses to its local replicas.
//!
//! Console commands:
//!   trigger     - Pull the trigger (relayed through the server)
//!   ragdoll     - Toggle ragdoll (relayed through the server)
//!   reload      - Reload (relayed through the server)
//!   status      - Show client status
//!   disconnect  - Leave the server
//!   quit        - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use shooter_client::input::InputState;
use shooter_client::GameClient;
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
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    client.send_ready().await?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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
            if !line.is_empty() {
                if console_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        }
    });

    println!("Client connected. Type 'trigger', 'ragdoll', 'reload', 'status'; 'quit' to exit.");
    println!();

    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match client.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        // Check for reliable messages (relayed actions, replication).
        client.poll_reliable().await?;

        // If disconnected, exit.
        if !client.is_connected() {
            println!("Disconnected from server.");
            break;
        }

        // Keyboard sampling would fill this in a real client; the console
        // commands above cover the action edges here.
        client.tick(InputState::default(), tick_interval).await?;

        // Receive aim snapshots.
        if let Err(e) = client.recv_aim_snapshot().await {
            println!("Snapshot error: {}", e);
        }

        // Print snapshot info occasionally.
        if let Some(snap) = client.aim.last_snapshot() {
            if snap.tick % 256 == 0 {
                info!(tick = snap.tick, actors = snap.entries.len(), "Aim snapshot");
            }
        }

        tokio::time::sleep(tick_interval).await;
    }

    Ok(())
}
