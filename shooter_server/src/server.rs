//! Server implementation.
//!
//! An authoritative tick-based loop. Per connected client it owns the
//! character, the player session, and both network channels, and it is the
//! single writer of every replicated field:
//! - Action requests are validated here and the responses broadcast to all
//!   participants. This node applies them too: the authority is a
//!   participant.
//! - Control pitch is written by the tick from the latest aim command and
//!   broadcast as unreliable snapshots.
//! - Health, equip state and (when configured) the ragdoll flag are diffed
//!   after each step and broadcast on the reliable stream.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Timer callbacks run from the step, never from wall-clock tasks.

use anyhow::Context;
use shooter_shared::{
    character::{Character, CharacterHandle, NullRig},
    config::GameConfig,
    console::{Console, CvarFlags, CvarValue},
    net::{
        AimCommand, AimSnapshot, AimState, ClientId, NetMsg, ReliableConn, ReliableListener,
        PROTOCOL_VERSION,
    },
    relay::{self, RelayMsg},
    session::PlayerState,
    timer::TimerQueue,
    weapon::{self, Rifle, Weapon, WeaponSpec},
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

const DEFAULT_MAX_HP: f32 = 100.0;

/// How long each client's reliable stream is polled per step.
const RELIABLE_POLL: Duration = Duration::from_millis(1);

/// Connected client state.
struct ClientSlot {
    _id: ClientId,
    reliable: ReliableConn,
    udp_peer: SocketAddr,
    /// Whether the client finished setup and was possessed.
    ready: bool,
    character: CharacterHandle,
    session: Arc<PlayerState>,
    last_cmd_tick: u32,
    /// Latest commanded view pitch from the aim plane.
    commanded_pitch: f32,
    /// Replication caches for diff-based broadcasts.
    sent_hp: f32,
    sent_ragdoll: bool,
}

/// Game server.
pub struct GameServer {
    pub cfg: GameConfig,
    pub console: Console,
    clients: HashMap<ClientId, ClientSlot>,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u32,
    timers: TimerQueue,

    /// Reliable broadcasts queued by console commands and handshakes,
    /// flushed at the end of the step.
    pending: Vec<NetMsg>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
}

impl GameServer {
    /// Creates a new server with the given config.
    pub async fn new(cfg: GameConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;

        let mut console = Console::new();
        Self::register_cvars(&mut console);

        Ok(Self {
            cfg,
            console,
            clients: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            timers: TimerQueue::new(),
            pending: Vec::new(),
            console_rx: None,
        })
    }

    fn register_cvars(console: &mut Console) {
        console.register_cvar(
            "sv_tickrate",
            CvarValue::Int(64),
            "Server tick rate",
            CvarFlags::NONE,
        );
        console.register_cvar(
            "sv_maxclients",
            CvarValue::Int(16),
            "Max connected clients",
            CvarFlags::NONE,
        );
        console.register_cvar(
            "sv_max_hp",
            CvarValue::Float(DEFAULT_MAX_HP as f64),
            "Spawn health of a character",
            CvarFlags::SERVER_ONLY,
        );
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Handle to a connected client's authoritative character.
    pub fn character(&self, id: ClientId) -> Option<CharacterHandle> {
        self.clients.get(&id).map(|slot| slot.character.clone())
    }

    fn bind_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.bind_retry_ms)
    }

    /// Accepts exactly one client (handshake + world replay).
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let msg = conn.recv().await?;
        let protocol = match msg {
            NetMsg::Hello { protocol } => protocol,
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        };
        if protocol != PROTOCOL_VERSION {
            anyhow::bail!("protocol mismatch: client {protocol}, server {PROTOCOL_VERSION}");
        }

        let udp_hello = conn.recv().await?;
        let client_udp_port = match udp_hello {
            NetMsg::UdpHello { client_udp_port } => client_udp_port,
            other => anyhow::bail!("expected UdpHello, got {other:?}"),
        };

        let id = ClientId::new_unique();
        conn.send(&NetMsg::Welcome { client_id: id }).await?;

        // Replay the existing world to the newcomer.
        for (other_id, slot) in &self.clients {
            conn.send(&NetMsg::PlayerJoin {
                client_id: *other_id,
            })
            .await?;
            let equipped = slot.character.lock().equipped().map(|w| w.spec());
            conn.send(&NetMsg::EquipUpdate {
                actor: *other_id,
                weapon: equipped,
            })
            .await?;
            conn.send(&NetMsg::HealthUpdate {
                actor: *other_id,
                hp: slot.session.hp(),
                max_hp: slot.session.max_hp(),
            })
            .await?;
            if self.cfg.replicate_ragdoll {
                let ragdoll = slot.character.lock().is_ragdoll();
                conn.send(&NetMsg::RagdollUpdate {
                    actor: *other_id,
                    ragdoll,
                })
                .await?;
            }
        }
        conn.send(&NetMsg::PlayerJoin { client_id: id }).await?;

        // Spawn the authoritative character and its session.
        let max_hp = self
            .console
            .get_cvar("sv_max_hp")
            .and_then(|v| v.as_float())
            .unwrap_or(DEFAULT_MAX_HP as f64) as f32;
        let session = Arc::new(PlayerState::new(max_hp));
        let character = CharacterHandle::new(Character::new(id, Box::new(NullRig)));
        character.lock().session().set(session.clone());
        let bind_interval = self.bind_interval();
        character.begin_play(&mut self.timers, bind_interval);

        let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
        self.clients.insert(
            id,
            ClientSlot {
                _id: id,
                reliable: conn,
                udp_peer,
                ready: false,
                character,
                session,
                last_cmd_tick: 0,
                commanded_pitch: 0.0,
                sent_hp: max_hp,
                sent_ragdoll: false,
            },
        );

        // Announce the newcomer to everyone (itself included) and hand out
        // the default rifle. The owner bind completes at possession.
        self.pending.push(NetMsg::PlayerJoin { client_id: id });
        self.pending.push(NetMsg::HealthUpdate {
            actor: id,
            hp: max_hp,
            max_hp,
        });
        self.pending.push(NetMsg::ServerPrint {
            message: format!("player {} joined", id.0),
        });
        self.give_weapon(
            id,
            Some(Arc::new(Rifle::new(self.cfg.rifle_magazine))),
        );

        info!(client_id = ?id, %udp_peer, "Client connected");
        Ok(id)
    }

    /// Equip setter: assigns the slot on the authoritative character,
    /// schedules the owner bind and replicates the new slot to everyone.
    pub fn give_weapon(&mut self, id: ClientId, weapon: Option<Arc<dyn Weapon>>) {
        let interval = self.bind_interval();
        let Some(slot) = self.clients.get_mut(&id) else {
            warn!(client_id = ?id, "give_weapon: no such client");
            return;
        };

        let equipped = slot.character.lock().set_equipped(weapon);
        let spec = equipped.map(|w| w.spec());
        if spec.is_some() {
            slot.character.bind_weapon_owner(&mut self.timers, interval);
        }
        self.pending.push(NetMsg::EquipUpdate {
            actor: id,
            weapon: spec,
        });
    }

    /// Damage entry point (admin/gameplay). Health replication picks up the
    /// change on the next step.
    pub fn hurt(&mut self, id: ClientId, amount: f32) {
        if let Some(slot) = self.clients.get(&id) {
            slot.character.apply_damage(amount, None);
        } else {
            warn!(client_id = ?id, "hurt: no such client");
        }
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt: Duration) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.poll_reliable().await;
        self.recv_aim_commands();
        self.tick_characters();
        self.timers.advance(dt);
        self.replicate().await?;
        self.tick += 1;
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        // Collect lines first to avoid borrow conflict
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            match self.exec_console(&line) {
                Ok(output) => {
                    for out in output {
                        println!("{}", out);
                    }
                }
                Err(e) => println!("Error: {}", e),
            }
        }
        Ok(())
    }

    /// Polls each client's reliable stream and dispatches what arrived.
    async fn poll_reliable(&mut self) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        let mut inbox = Vec::new();
        let mut dropped = Vec::new();

        for id in ids {
            let Some(slot) = self.clients.get_mut(&id) else {
                continue;
            };
            match slot.reliable.recv_timeout(RELIABLE_POLL).await {
                Ok(Some(msg)) => inbox.push((id, msg)),
                Ok(None) => {}
                Err(e) => {
                    debug!(client_id = ?id, error = %e, "Reliable stream closed");
                    dropped.push(id);
                }
            }
        }

        for (sender, msg) in inbox {
            self.handle_reliable_message(sender, msg).await;
        }
        for id in dropped {
            self.remove_client(id, "connection lost").await;
        }
    }

    async fn handle_reliable_message(&mut self, sender: ClientId, msg: NetMsg) {
        match msg {
            NetMsg::ClientReady { client_id } => {
                if client_id != sender {
                    warn!(?sender, ?client_id, "ClientReady for foreign actor, dropping");
                    return;
                }
                if let Some(slot) = self.clients.get_mut(&sender) {
                    slot.ready = true;
                    // Possession: the controller exists from here on, which
                    // lets the pending weapon owner bind complete.
                    slot.character.lock().controller().set(sender);
                    info!(client_id = ?sender, "Client ready, possessed");
                }
            }
            NetMsg::Action { actor, msg } => {
                self.handle_action(sender, actor, msg).await;
            }
            NetMsg::Disconnect { reason } => {
                self.remove_client(sender, &reason).await;
            }
            other => {
                debug!(?sender, ?other, "Unexpected reliable message");
            }
        }
    }

    /// The authority half of the relay: validate, execute locally,
    /// broadcast the response to every participant.
    async fn handle_action(&mut self, sender: ClientId, actor: ClientId, msg: RelayMsg) {
        if !msg.is_request() {
            warn!(?sender, ?msg, "non-request on the request path, dropping");
            return;
        }
        if actor != sender {
            warn!(?sender, ?actor, "request for foreign actor, dropping");
            return;
        }
        let Some(slot) = self.clients.get(&actor) else {
            return;
        };

        let response = {
            let character = slot.character.lock();
            relay::handle_request(&character, msg)
        };
        let Some(response) = response else {
            // Denied: the flow stops here, the originator hears nothing.
            debug!(?actor, ?msg, "request denied");
            return;
        };

        {
            let mut character = slot.character.lock();
            relay::apply_response(&mut character, response);
        }
        debug!(?actor, ?response, "action relayed");
        self.broadcast(&NetMsg::Action {
            actor,
            msg: response,
        })
        .await;
    }

    fn recv_aim_commands(&mut self) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Ok(NetMsg::AimCommand(cmd)) =
                        serde_json::from_slice::<NetMsg>(&buf[..n])
                    {
                        self.on_aim_command(from, cmd);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "udp recv");
                    break;
                }
            }
        }
    }

    fn on_aim_command(&mut self, from: SocketAddr, cmd: AimCommand) {
        if let Some(slot) = self.clients.get_mut(&cmd.client_id) {
            slot.udp_peer = from;
            // Stale packets lose to newer ones.
            if cmd.tick >= slot.last_cmd_tick {
                slot.last_cmd_tick = cmd.tick;
                slot.commanded_pitch = cmd.pitch;
            }
        }
    }

    /// Authoritative per-tick state: the server tick is the only writer of
    /// control pitch.
    fn tick_characters(&mut self) {
        for slot in self.clients.values() {
            slot.character
                .lock()
                .set_control_pitch(slot.commanded_pitch);
        }
    }

    async fn replicate(&mut self) -> anyhow::Result<()> {
        // Aim plane: unreliable snapshot of every actor's control pitch.
        let entries: Vec<AimState> = self
            .clients
            .values()
            .map(|slot| {
                let chr = slot.character.lock();
                AimState {
                    actor: chr.id(),
                    pitch: chr.control_pitch(),
                }
            })
            .collect();
        let snap = NetMsg::AimSnapshot(AimSnapshot {
            tick: self.tick,
            entries,
        });
        let payload = serde_json::to_vec(&snap).context("serialize aim snapshot")?;
        for slot in self.clients.values() {
            if slot.ready {
                let _ = self.udp.send_to(&payload, slot.udp_peer).await;
            }
        }

        // Reliable plane: diff the replicated fields.
        let mut updates = std::mem::take(&mut self.pending);
        for (id, slot) in &mut self.clients {
            let hp = slot.session.hp();
            if hp != slot.sent_hp {
                slot.sent_hp = hp;
                updates.push(NetMsg::HealthUpdate {
                    actor: *id,
                    hp,
                    max_hp: slot.session.max_hp(),
                });
            }
            if self.cfg.replicate_ragdoll {
                let ragdoll = slot.character.lock().is_ragdoll();
                if ragdoll != slot.sent_ragdoll {
                    slot.sent_ragdoll = ragdoll;
                    updates.push(NetMsg::RagdollUpdate {
                        actor: *id,
                        ragdoll,
                    });
                }
            }
        }
        for msg in updates {
            self.broadcast(&msg).await;
        }
        Ok(())
    }

    /// Sends a reliable message to every connected client.
    async fn broadcast(&mut self, msg: &NetMsg) {
        for (id, slot) in &mut self.clients {
            if let Err(e) = slot.reliable.send(msg).await {
                debug!(client_id = ?id, error = %e, "broadcast failed");
            }
        }
    }

    async fn remove_client(&mut self, id: ClientId, reason: &str) {
        if self.clients.remove(&id).is_some() {
            info!(client_id = ?id, reason, "Client removed");
            self.broadcast(&NetMsg::PlayerLeave { client_id: id }).await;
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();

        // Handle built-in server commands first.
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Clients: {}", self.clients.len()));
                for (id, slot) in &self.clients {
                    let chr = slot.character.lock();
                    out.push(format!(
                        "  {:?}: udp={} ready={} hp={} ragdoll={} weapon={:?}",
                        id,
                        slot.udp_peer,
                        slot.ready,
                        slot.session.hp(),
                        chr.is_ragdoll(),
                        chr.equipped().map(|w| w.spec()),
                    ));
                }
                Ok(out)
            }
            "give" => {
                let id = parse_client_arg(&tokens, 1)?;
                let magazine = match tokens.get(2) {
                    Some(m) => m.parse().context("parse magazine")?,
                    None => self.cfg.rifle_magazine,
                };
                self.give_weapon(id, Some(Arc::new(Rifle::new(magazine))));
                Ok(vec![format!(
                    "gave {:?} to {:?}",
                    WeaponSpec {
                        kind: weapon::WeaponKind::Rifle,
                        magazine
                    },
                    id
                )])
            }
            "strip" => {
                let id = parse_client_arg(&tokens, 1)?;
                self.give_weapon(id, None);
                Ok(vec![format!("unequipped {:?}", id)])
            }
            "hurt" => {
                let id = parse_client_arg(&tokens, 1)?;
                let amount: f32 = tokens
                    .get(2)
                    .context("usage: hurt <client> <amount>")?
                    .parse()
                    .context("parse amount")?;
                self.hurt(id, amount);
                Ok(vec![format!("hurt {:?} by {}", id, amount)])
            }
            "ragdoll" => {
                let id = parse_client_arg(&tokens, 1)?;
                let slot = self.clients.get(&id).context("no such client")?;
                slot.character.lock().do_ragdoll();
                Ok(vec![format!("{:?} ragdolled", id)])
            }
            "getup" => {
                let id = parse_client_arg(&tokens, 1)?;
                let slot = self.clients.get(&id).context("no such client")?;
                slot.character.lock().do_getup();
                Ok(vec![format!("{:?} stood up", id)])
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                std::process::exit(0);
            }
            _ => {
                // Delegate to console system.
                self.console.exec(line)
            }
        }
    }
}

fn parse_client_arg(tokens: &[&str], index: usize) -> anyhow::Result<ClientId> {
    let raw = tokens
        .get(index)
        .context("missing <client> argument")?;
    Ok(ClientId(raw.parse().context("parse client id")?))
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(cfg: GameConfig) -> anyhow::Result<(GameServer, GameConfig)> {
    let mut cfg = GameConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };

    // Bind TCP first to get an ephemeral port, then bind UDP to that same port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    let mut console = Console::new();
    GameServer::register_cvars(&mut console);

    Ok((
        GameServer {
            cfg: cfg.clone(),
            console,
            clients: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            timers: TimerQueue::new(),
            pending: Vec::new(),
            console_rx: None,
        },
        cfg,
    ))
}
