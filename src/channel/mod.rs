//! UDP channels and their I/O threads.
//!
//! Each channel owns one socket and two threads: an outbound loop draining a
//! crossbeam queue and an inbound loop decoding datagrams. Both loops run a
//! `mio::Poll` on their own clone of the socket.
//!
//! ```text
//!   send(body) ──► crossbeam queue ──► outbound thread ──► socket
//!                      (Waker)
//!   socket ──► inbound thread ──► Body::decode ──► ChannelSink
//! ```

mod inbound;
mod outbound;

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::error::{KnxError, Result};
use crate::protocol::constants::KNXNETIP_MULTICAST_ADDR;
use crate::protocol::Body;

use inbound::Inbound;
use outbound::Outbound;

/// Token for the channel socket
const SOCKET_TOKEN: mio::Token = mio::Token(0);

/// Token for the waker (outbound queue)
const WAKER_TOKEN: mio::Token = mio::Token(1);

/// Poll timeout; bounds how long a stop request goes unnoticed
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Which of the client's sockets a datagram travelled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Search, description, connect, heartbeat and disconnect
    Control,
    /// Tunneling requests and acknowledgements
    Data,
    /// KNXnet/IP multicast group (search responses, routing indications)
    Multicast,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Control => "control",
            Self::Data => "data",
            Self::Multicast => "multicast",
        })
    }
}

/// Receiver of everything the I/O threads observe
///
/// Called from the channel threads; implementations must not block for long.
pub(crate) trait ChannelSink: Send + Sync + 'static {
    /// A datagram decoded into `body`
    fn on_received(&self, channel: ChannelKind, source: SocketAddr, body: Body);

    /// `body` left the socket
    fn on_sent(&self, channel: ChannelKind, body: &Body);

    /// Recoverable problem (malformed datagram, failed send); the loop goes on
    fn on_error(&self, channel: ChannelKind, error: KnxError);

    /// The socket is unusable and the loop has exited
    fn on_failed(&self, channel: ChannelKind, error: KnxError);
}

/// One bound UDP socket with its inbound and outbound threads
#[derive(Debug)]
pub(crate) struct Channel {
    kind: ChannelKind,
    local_addr: SocketAddrV4,
    outbound: Outbound,
    inbound: Inbound,
}

impl Channel {
    /// Bind the socket for `kind` and start both threads
    pub(crate) fn open(kind: ChannelKind, config: &Config, sink: Arc<dyn ChannelSink>) -> Result<Self> {
        let ports = config.local_ports();
        let socket = match kind {
            ChannelKind::Control => bind_unicast(config.local_ip(), ports.control)?,
            ChannelKind::Data => bind_unicast(config.local_ip(), ports.data)?,
            ChannelKind::Multicast => bind_multicast(config.local_ip(), ports.multicast)?,
        };
        socket.set_nonblocking(true)?;

        let SocketAddr::V4(local_addr) = socket.local_addr()? else {
            return Err(KnxError::io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "channel socket is not IPv4",
            )));
        };

        let outbound = Outbound::spawn(kind, socket.try_clone()?, Arc::clone(&sink))?;
        let inbound = Inbound::spawn(kind, socket, sink)?;

        log::debug!("{kind} channel bound to {local_addr}");
        Ok(Self {
            kind,
            local_addr,
            outbound,
            inbound,
        })
    }

    /// Bound local address (`0.0.0.0` unless a local IP was configured)
    pub(crate) fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    /// Queue `body` for `target`
    pub(crate) fn send(&self, body: Body, target: SocketAddr) -> Result<()> {
        self.outbound.send(body, target)
    }

    /// Stop both threads; queued datagrams are flushed first
    pub(crate) fn shutdown(&mut self) {
        self.outbound.shutdown();
        self.inbound.shutdown();
        log::debug!("{} channel closed", self.kind);
    }
}

fn bind_unicast(local_ip: Option<Ipv4Addr>, port: u16) -> io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddrV4::new(local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), port))
}

fn bind_multicast(local_ip: Option<Ipv4Addr>, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

    let interface = local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
    socket.join_multicast_v4(&KNXNETIP_MULTICAST_ADDR, &interface)?;
    if !interface.is_unspecified() {
        socket.set_multicast_if_v4(&interface)?;
    }
    Ok(socket.into())
}

/// Join a worker thread unless called from that very thread
///
/// A loop may trigger the client shutdown that stops it; it then exits on
/// its own once it sees the stop flag.
pub(crate) fn join_unless_current(handle: JoinHandle<()>) {
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::error!("worker thread panicked");
    }
}
