//! UDP transport to the control surface.
//!
//! The peer listens on one port and answers on another, so a channel owns
//! two sockets: an ephemeral one for sending and one bound to the receive
//! port. A spawned task drains the receive socket, decodes each datagram and
//! forwards the messages; decode failures are logged and dropped there so
//! nothing upstream ever sees garbage.

use std::net::SocketAddr;

use async_trait::async_trait;
use liveconf::PeerConfig;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, Message};
use crate::error::ChannelError;

/// Largest datagram we accept. AbletonOSC replies for big clips can run to
/// tens of kilobytes.
const MAX_DATAGRAM: usize = 65_536;

/// Inbound messages buffered between the receive task and its consumer.
const INBOUND_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Local port the peer replies to; 0 picks a free port
    pub receive_port: u16,
    pub remote_host: String,
    /// Port the peer listens on
    pub send_port: u16,
}

impl From<&PeerConfig> for ChannelConfig {
    fn from(peer: &PeerConfig) -> Self {
        Self {
            receive_port: peer.receive_port,
            remote_host: peer.host.clone(),
            send_port: peer.send_port,
        }
    }
}

/// Where messages go and where replies come from.
///
/// [`Channel`] is the UDP implementation; the correlator only needs this
/// much, which keeps it testable without sockets.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Push one message. Best effort, never retried here.
    async fn send(&self, msg: &Message) -> Result<(), ChannelError>;

    /// The decoded inbound stream. Returns `Some` once.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Message>>;

    /// Stop receiving and release sockets. Safe to call more than once.
    async fn close(&mut self);
}

pub struct Channel {
    send_socket: UdpSocket,
    remote: SocketAddr,
    local_addr: SocketAddr,
    inbound: Option<mpsc::Receiver<Message>>,
    cancel: CancellationToken,
    receive_task: Option<JoinHandle<()>>,
}

impl Channel {
    /// Bind the receive port, resolve the peer once, and start receiving.
    pub async fn open(config: ChannelConfig) -> Result<Self, ChannelError> {
        let remote_str = format!("{}:{}", config.remote_host, config.send_port);
        let remote = tokio::net::lookup_host(&remote_str)
            .await
            .map_err(|e| ChannelError::Resolve {
                addr: remote_str.clone(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| ChannelError::Resolve {
                addr: remote_str.clone(),
                reason: "no addresses".to_string(),
            })?;

        let receive_bind = format!("0.0.0.0:{}", config.receive_port);
        let receive_socket = UdpSocket::bind(&receive_bind)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: receive_bind.clone(),
                source,
            })?;
        let local_addr = receive_socket.local_addr().map_err(|source| ChannelError::Bind {
            addr: receive_bind,
            source,
        })?;

        let send_bind = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let send_socket = UdpSocket::bind(send_bind)
            .await
            .map_err(|source| ChannelError::Bind {
                addr: send_bind.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let cancel = CancellationToken::new();
        let receive_task = tokio::spawn(receive_loop(receive_socket, tx, cancel.clone()));

        info!("channel open: sending to {}, receiving on {}", remote, local_addr);

        Ok(Self {
            send_socket,
            remote,
            local_addr,
            inbound: Some(rx),
            cancel,
            receive_task: Some(receive_task),
        })
    }

    pub async fn from_peer(peer: &PeerConfig) -> Result<Self, ChannelError> {
        Self::open(ChannelConfig::from(peer)).await
    }

    /// The bound receive address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl Transport for Channel {
    async fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        if self.cancel.is_cancelled() {
            return Err(ChannelError::Closed);
        }
        let bytes = codec::encode(msg)?;
        trace!("send {} ({} bytes)", msg, bytes.len());
        self.send_socket
            .send_to(&bytes, self.remote)
            .await
            .map_err(|source| ChannelError::Send {
                addr: self.remote.to_string(),
                source,
            })?;
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.inbound.take()
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.receive_task.take() {
            if let Err(e) = task.await {
                warn!("receive task ended abnormally: {}", e);
            }
            debug!("channel closed ({})", self.local_addr);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(socket: UdpSocket, tx: mpsc::Sender<Message>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("receive loop cancelled");
                break;
            }

            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP unreachable from an earlier send shows up here on some platforms
                        warn!("receive error: {}", e);
                        continue;
                    }
                };

                match codec::decode_datagram(&buf[..len]) {
                    Ok(messages) => {
                        for msg in messages {
                            trace!("recv {} from {}", msg, from);
                            // A full buffer must not hold off cancellation
                            tokio::select! {
                                sent = tx.send(msg) => {
                                    if sent.is_err() {
                                        debug!("inbound consumer gone, receive loop exiting");
                                        return;
                                    }
                                }
                                _ = cancel.cancelled() => {
                                    debug!("receive loop cancelled with inbound buffer full");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("discarding {} byte datagram from {}: {}", len, from, e);
                    }
                }
            }
        }
    }
}
