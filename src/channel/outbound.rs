//! Outbound queue: FIFO of bodies encoded and sent by a dedicated thread.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::{Events, Interest, Poll, Waker};

use super::{join_unless_current, ChannelKind, ChannelSink, POLL_TIMEOUT, SOCKET_TOKEN, WAKER_TOKEN};
use crate::error::{KnxError, Result};
use crate::protocol::Body;

#[derive(Debug)]
struct Item {
    body: Body,
    target: SocketAddr,
}

/// Item popped from the queue and encoded, waiting for the socket
struct Pending {
    item: Item,
    bytes: Vec<u8>,
}

/// Handle to the outbound thread of one channel
#[derive(Debug)]
pub(super) struct Outbound {
    tx: Sender<Item>,
    waker: Arc<Waker>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Outbound {
    pub(super) fn spawn(kind: ChannelKind, socket: UdpSocket, sink: Arc<dyn ChannelSink>) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let mut socket = mio::net::UdpSocket::from_std(socket);
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::WRITABLE)?;

        let (tx, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));

        let mut worker = Worker {
            kind,
            poll,
            socket,
            rx,
            sink,
            running: Arc::clone(&running),
        };
        let handle = thread::Builder::new()
            .name(format!("knx-{kind}-out"))
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            waker,
            running,
            handle: Some(handle),
        })
    }

    /// Queue `body` for `target` and wake the loop
    pub(super) fn send(&self, body: Body, target: SocketAddr) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(KnxError::channel_closed());
        }
        self.tx
            .send(Item { body, target })
            .map_err(|_| KnxError::channel_closed())?;
        self.waker.wake()?;
        Ok(())
    }

    pub(super) fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            log::debug!("outbound waker: {e}");
        }
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}

impl Drop for Outbound {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    kind: ChannelKind,
    poll: Poll,
    socket: mio::net::UdpSocket,
    rx: Receiver<Item>,
    sink: Arc<dyn ChannelSink>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(&mut self) {
        let mut events = Events::with_capacity(8);
        let mut pending: Option<Pending> = None;
        // Edge-triggered: writable until a send reports WouldBlock
        let mut writable = true;

        while self.running.load(Ordering::Acquire) {
            let busy = writable && (pending.is_some() || !self.rx.is_empty());
            let timeout = if busy { Duration::ZERO } else { POLL_TIMEOUT };

            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.sink.on_failed(self.kind, KnxError::io(e));
                return;
            }
            if events
                .iter()
                .any(|event| event.token() == SOCKET_TOKEN && event.is_writable())
            {
                writable = true;
            }
            if !writable {
                continue;
            }

            if pending.is_none() {
                pending = match self.rx.try_recv() {
                    Ok(item) => self.encode(item),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                };
            }

            // one send per wakeup
            if let Some(current) = pending.take() {
                match self.socket.send_to(&current.bytes, current.item.target) {
                    Ok(_) => self.sent(&current),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        writable = false;
                        pending = Some(current);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => pending = Some(current),
                    Err(e) => {
                        log::warn!("{} send to {} failed: {e}", self.kind, current.item.target);
                        self.sink.on_error(self.kind, KnxError::io(e));
                    }
                }
            }
        }

        self.flush(pending);
    }

    fn encode(&self, item: Item) -> Option<Pending> {
        match item.body.encode() {
            Ok(bytes) => Some(Pending { item, bytes }),
            Err(e) => {
                log::warn!("{} dropping unencodable {:?}: {e}", self.kind, item.body.service_type());
                self.sink.on_error(self.kind, e);
                None
            }
        }
    }

    fn sent(&self, pending: &Pending) {
        log::debug!(
            "{} -> {} {:?} ({} bytes)",
            self.kind,
            pending.item.target,
            pending.item.body.service_type(),
            pending.bytes.len()
        );
        self.sink.on_sent(self.kind, &pending.item.body);
    }

    /// Best-effort send of what is still queued at shutdown
    fn flush(&self, pending: Option<Pending>) {
        let queued = self.rx.try_iter().filter_map(|item| self.encode(item));
        for current in pending.into_iter().chain(queued) {
            match self.socket.send_to(&current.bytes, current.item.target) {
                Ok(_) => self.sent(&current),
                Err(e) => {
                    log::debug!("{} dropped {:?} at shutdown: {e}", self.kind, current.item.body.service_type());
                }
            }
        }
    }
}
