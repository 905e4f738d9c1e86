//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) control plane and an unreliable (UDP) aim plane.
//! - Provide the request/response and replication message types used by
//!   client/server.
//! - Keep serialization explicit and versionable.
//!
//! Channel contract: action requests and responses, field replication and
//! actor lifecycle ride the reliable stream, so per-originator issue order
//! and per-recipient broadcast order come from TCP. Aim traffic is per-tick,
//! loss-tolerant state and rides UDP.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    time,
};

use crate::{relay::RelayMsg, weapon::WeaponSpec};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client and its character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    Welcome {
        client_id: ClientId,
    },
    /// Client confirms it is set up; the server possesses the character.
    ClientReady {
        client_id: ClientId,
    },

    // ─── Actor lifecycle replication ───
    /// Server announces a character to a client.
    PlayerJoin {
        client_id: ClientId,
    },
    /// Server removes a character from a client.
    PlayerLeave {
        client_id: ClientId,
    },

    // ─── Action relay ───
    /// Client -> server: a request for `actor`'s character.
    /// Server -> everyone: the validated response to execute.
    Action {
        actor: ClientId,
        msg: RelayMsg,
    },

    // ─── Field replication ───
    /// Server -> everyone: the actor's equip slot changed.
    EquipUpdate {
        actor: ClientId,
        weapon: Option<WeaponSpec>,
    },
    /// Server -> everyone: the actor's session health changed.
    HealthUpdate {
        actor: ClientId,
        hp: f32,
        max_hp: f32,
    },
    /// Server -> everyone: the actor's ragdoll flag changed.
    /// Only sent when ragdoll replication is enabled in config.
    RagdollUpdate {
        actor: ClientId,
        ragdoll: bool,
    },

    // ─── Aim plane (unreliable) ───
    /// Client -> server: commanded view pitch for a tick.
    AimCommand(AimCommand),
    /// Server -> everyone: authoritative control pitch of every actor.
    AimSnapshot(AimSnapshot),

    // ─── Console/notices ───
    /// Server -> client: print message to console.
    ServerPrint {
        message: String,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Client view input for one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AimCommand {
    pub client_id: ClientId,
    pub tick: u32,
    /// Commanded view pitch in degrees.
    pub pitch: f32,
}

/// Authoritative control pitch of one actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AimState {
    pub actor: ClientId,
    pub pitch: f32,
}

/// Per-tick broadcast of every actor's control pitch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AimSnapshot {
    pub tick: u32,
    pub entries: Vec<AimState>,
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize msg")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
        Ok(msg)
    }

    /// Receives a frame within the given timeout.
    pub async fn recv_timeout(&mut self, timeout: std::time::Duration) -> anyhow::Result<Option<NetMsg>> {
        match time::timeout(timeout, self.recv()).await {
            Ok(Ok(msg)) => Ok(Some(msg)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}
