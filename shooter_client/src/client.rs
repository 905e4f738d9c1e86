//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake, action relay, field replication)
//! - An unreliable datagram socket (aim commands/snapshots)
//! - One character replica per known actor, its session state materialized
//!   from replicated health updates (the late target of the deferred bind)
//! - Aim snapshot history for interpolation
//! - Console for user commands
//!
//! Relayed responses are applied to the local replicas exactly as the
//! server applies them to the authoritative characters, so every node
//! renders the same consequence.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shooter_shared::{
    character::{Character, CharacterHandle, NullRig},
    config::GameConfig,
    console::{Console, CvarFlags, CvarValue},
    net::{ClientId, NetMsg, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
    relay::{self, RelayMsg},
    session::PlayerState,
    timer::TimerQueue,
    weapon,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    input::{build_aim_command, integrate_pitch, InputState},
    interp::AimBuffer,
};

/// High-level game client.
pub struct GameClient {
    pub client_id: ClientId,
    pub console: Console,

    reliable: ReliableConn,
    pub unreliable: UnreliableConn,
    pub aim: AimBuffer,
    tick: u32,
    /// Locally commanded view pitch, integrated from input.
    pitch: f32,
    connected: bool,

    bind_interval: Duration,
    timers: TimerQueue,

    /// One replica per known actor (the local player included).
    replicas: HashMap<ClientId, CharacterHandle>,
    /// Replicated session state per actor.
    sessions: HashMap<ClientId, Arc<PlayerState>>,

    /// Responses applied on this node, oldest first.
    pub observed: Vec<(ClientId, RelayMsg)>,
    /// Server messages to display.
    pub server_messages: Vec<String>,
}

impl GameClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &GameConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send snapshots.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;

        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let client_id = match welcome {
            NetMsg::Welcome { client_id } => client_id,
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(client_id = ?client_id, "Connected to server");

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg.player_name);

        let mut client = Self {
            client_id,
            console,
            reliable,
            unreliable,
            aim: AimBuffer::new(32),
            tick: 0,
            pitch: 0.0,
            connected: true,
            bind_interval: Duration::from_millis(cfg.bind_retry_ms),
            timers: TimerQueue::new(),
            replicas: HashMap::new(),
            sessions: HashMap::new(),
            observed: Vec::new(),
            server_messages: Vec::new(),
        };

        // Drain the world replay the server sends right after Welcome.
        client.poll_reliable().await?;

        Ok(client)
    }

    fn register_cvars(console: &mut Console, player_name: &str) {
        console.register_cvar(
            "cl_interp",
            CvarValue::Float(0.1),
            "Interpolation delay",
            CvarFlags::NONE,
        );
        console.register_cvar(
            "name",
            CvarValue::String(player_name.to_string()),
            "Player name",
            CvarFlags::ARCHIVE,
        );
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The local player's replica, once the server announced it.
    pub fn local_character(&self) -> Option<&CharacterHandle> {
        self.replicas.get(&self.client_id)
    }

    /// Replica of any known actor.
    pub fn replica(&self, actor: ClientId) -> Option<&CharacterHandle> {
        self.replicas.get(&actor)
    }

    pub fn known_actors(&self) -> Vec<ClientId> {
        self.replicas.keys().copied().collect()
    }

    /// Polls the reliable connection for messages.
    pub async fn poll_reliable(&mut self) -> anyhow::Result<()> {
        // Use a short timeout to avoid blocking.
        loop {
            match self
                .reliable
                .recv_timeout(Duration::from_millis(10))
                .await
            {
                Ok(Some(msg)) => self.handle_reliable_message(msg),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Reliable connection error");
                    self.connected = false;
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::PlayerJoin { client_id } => self.on_player_join(client_id),
            NetMsg::PlayerLeave { client_id } => {
                self.replicas.remove(&client_id);
                self.sessions.remove(&client_id);
                info!(actor = ?client_id, "Player left");
            }
            NetMsg::Action { actor, msg } => self.on_action(actor, msg),
            NetMsg::EquipUpdate { actor, weapon: spec } => {
                let Some(replica) = self.replicas.get(&actor) else {
                    warn!(?actor, "EquipUpdate for unknown actor");
                    return;
                };
                debug!(?actor, ?spec, "Equip slot replicated");
                replica.lock().set_equipped(spec.map(weapon::spawn));
            }
            NetMsg::HealthUpdate { actor, hp, max_hp } => {
                self.on_health_update(actor, hp, max_hp);
            }
            NetMsg::RagdollUpdate { actor, ragdoll } => {
                let Some(replica) = self.replicas.get(&actor) else {
                    return;
                };
                let mut chr = replica.lock();
                if ragdoll != chr.is_ragdoll() {
                    if ragdoll {
                        chr.do_ragdoll();
                    } else {
                        chr.do_getup();
                    }
                }
            }
            NetMsg::ServerPrint { message } => {
                info!(message = %message, "Server message");
                self.server_messages.push(message);
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.connected = false;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
    }

    fn on_player_join(&mut self, actor: ClientId) {
        if self.replicas.contains_key(&actor) {
            return;
        }
        let replica = CharacterHandle::new(Character::new(actor, Box::new(NullRig)));
        if actor == self.client_id {
            // The locally controlled character has a controller; remote
            // replicas never do.
            replica.lock().controller().set(actor);
        }
        // The session arrives later via HealthUpdate; bind when it does.
        replica.begin_play(&mut self.timers, self.bind_interval);
        self.replicas.insert(actor, replica);
        info!(?actor, "Player joined");
    }

    /// The participant half of the relay: execute the broadcast side effect
    /// on the local replica.
    fn on_action(&mut self, actor: ClientId, msg: RelayMsg) {
        let Some(replica) = self.replicas.get(&actor) else {
            warn!(?actor, ?msg, "Action for unknown actor");
            return;
        };
        {
            let mut chr = replica.lock();
            relay::apply_response(&mut chr, msg);
        }
        self.observed.push((actor, msg));
    }

    fn on_health_update(&mut self, actor: ClientId, hp: f32, max_hp: f32) {
        match self.sessions.get(&actor) {
            Some(state) => state.set_stats(hp, max_hp),
            None => {
                // First health replication materializes the session; the
                // replica's pending bind picks it up on a later tick.
                let state = Arc::new(PlayerState::new(max_hp));
                state.set_stats(hp, max_hp);
                if let Some(replica) = self.replicas.get(&actor) {
                    replica.lock().session().set(state.clone());
                }
                self.sessions.insert(actor, state);
            }
        }
    }

    /// Signals the server that setup finished; the server possesses the
    /// character in response.
    pub async fn send_ready(&mut self) -> anyhow::Result<()> {
        self.reliable
            .send(&NetMsg::ClientReady {
                client_id: self.client_id,
            })
            .await?;
        info!("Sent ready signal to server");
        Ok(())
    }

    async fn send_request(&mut self, msg: RelayMsg) -> anyhow::Result<()> {
        debug!(?msg, "Sending action request");
        self.reliable
            .send(&NetMsg::Action {
                actor: self.client_id,
                msg,
            })
            .await
    }

    pub async fn press_trigger(&mut self) -> anyhow::Result<()> {
        self.send_request(RelayMsg::RequestTrigger).await
    }

    pub async fn press_toggle_ragdoll(&mut self) -> anyhow::Result<()> {
        self.send_request(RelayMsg::RequestToggleRagdoll).await
    }

    pub async fn press_reload(&mut self) -> anyhow::Result<()> {
        self.send_request(RelayMsg::RequestReload).await
    }

    /// Advances one client tick: integrate input, emit action requests for
    /// pressed edges, send the aim command, run due timers.
    pub async fn tick(&mut self, input: InputState, dt: Duration) -> anyhow::Result<()> {
        if input.trigger_pressed {
            self.press_trigger().await?;
        }
        if input.ragdoll_pressed {
            self.press_toggle_ragdoll().await?;
        }
        if input.reload_pressed {
            self.press_reload().await?;
        }

        self.pitch = integrate_pitch(self.pitch, input, dt.as_secs_f32());
        let cmd = build_aim_command(self.client_id, self.tick, self.pitch);
        self.unreliable.send(&NetMsg::AimCommand(cmd)).await?;

        self.timers.advance(dt);
        self.tick += 1;
        Ok(())
    }

    /// Receives messages over the unreliable channel.
    pub async fn recv_aim_snapshot(&mut self) -> anyhow::Result<()> {
        if let Some(msg) = self
            .unreliable
            .recv_timeout(Duration::from_millis(20))
            .await?
        {
            match msg {
                NetMsg::AimSnapshot(snap) => {
                    // Copy the authoritative pitch onto the replicas before
                    // buffering for interpolation.
                    for entry in &snap.entries {
                        if let Some(replica) = self.replicas.get(&entry.actor) {
                            replica.lock().set_control_pitch(entry.pitch);
                        }
                    }
                    self.aim.push(snap);
                }
                other => {
                    debug!(?other, "Unexpected UDP message");
                }
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "trigger" => {
                self.press_trigger().await?;
                Ok(vec![])
            }
            "ragdoll" => {
                self.press_toggle_ragdoll().await?;
                Ok(vec![])
            }
            "reload" => {
                self.press_reload().await?;
                Ok(vec![])
            }
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Client ID: {:?}", self.client_id));
                out.push(format!("Connected: {}", self.connected));
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Pitch: {:.1}", self.pitch));
                out.push(format!("Snapshots buffered: {}", self.aim.len()));
                for (id, replica) in &self.replicas {
                    let chr = replica.lock();
                    out.push(format!(
                        "  {:?}: pitch={:.1} ragdoll={} weapon={:?}",
                        id,
                        chr.control_pitch(),
                        chr.is_ragdoll(),
                        chr.equipped().map(|w| w.spec()),
                    ));
                }
                Ok(out)
            }
            "disconnect" => {
                self.reliable
                    .send(&NetMsg::Disconnect {
                        reason: "user quit".to_string(),
                    })
                    .await?;
                self.connected = false;
                Ok(vec!["Disconnected".to_string()])
            }
            "quit" | "exit" => {
                std::process::exit(0);
            }
            _ => {
                // Delegate to console system.
                self.console.exec(line)
            }
        }
    }

    /// Returns the underlying reliable connection peer.
    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}
