//! Inbound loop: one datagram read per iteration, decoded and handed to the
//! sink.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Events, Interest, Poll};

use super::{join_unless_current, ChannelKind, ChannelSink, POLL_TIMEOUT, SOCKET_TOKEN};
use crate::error::{KnxError, Result};
use crate::protocol::constants::MAX_FRAME_SIZE;
use crate::protocol::Body;

/// Handle to the inbound thread of one channel
#[derive(Debug)]
pub(super) struct Inbound {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Inbound {
    pub(super) fn spawn(kind: ChannelKind, socket: UdpSocket, sink: Arc<dyn ChannelSink>) -> Result<Self> {
        let poll = Poll::new()?;
        let mut socket = mio::net::UdpSocket::from_std(socket);
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        let running = Arc::new(AtomicBool::new(true));
        let mut worker = Worker {
            kind,
            poll,
            socket,
            sink,
            running: Arc::clone(&running),
        };
        let handle = thread::Builder::new()
            .name(format!("knx-{kind}-in"))
            .spawn(move || worker.run())?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the loop; it notices within one poll timeout
    pub(super) fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    kind: ChannelKind,
    poll: Poll,
    socket: mio::net::UdpSocket,
    sink: Arc<dyn ChannelSink>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(&mut self) {
        let mut events = Events::with_capacity(8);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        // Edge-triggered: drain until WouldBlock
        let mut readable = true;

        while self.running.load(Ordering::Acquire) {
            let timeout = if readable { Duration::ZERO } else { POLL_TIMEOUT };
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.sink.on_failed(self.kind, KnxError::io(e));
                return;
            }
            if events
                .iter()
                .any(|event| event.token() == SOCKET_TOKEN && event.is_readable())
            {
                readable = true;
            }
            if !readable {
                continue;
            }

            match self.socket.recv_from(&mut buf) {
                Ok((len, source)) => {
                    let datagram = &buf[..len];
                    match Body::decode(datagram) {
                        Ok(body) => {
                            log::debug!("{} <- {source} {:?}", self.kind, body.service_type());
                            self.sink.on_received(self.kind, source, body);
                        }
                        Err(e) => {
                            log::warn!("{} dropping malformed datagram from {source}: {e}", self.kind);
                            self.sink.on_error(self.kind, e);
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => readable = false,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                // ICMP errors from earlier sends surface here on some platforms
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    log::warn!("{} receive: {e}", self.kind);
                    self.sink.on_error(self.kind, KnxError::io(e));
                }
                Err(e) => {
                    log::error!("{} socket unusable: {e}", self.kind);
                    self.sink.on_failed(self.kind, KnxError::io(e));
                    return;
                }
            }
        }
    }
}
