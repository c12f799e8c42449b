//! Tunneling client.
//!
//! [`KnxClient`] drives one session with a KNXnet/IP gateway: discovery,
//! description, connect, heartbeat, the acknowledged data path and
//! disconnect. It owns three UDP channels (control, data, optional
//! multicast), the event pool correlating requests with responses, the status
//! pool fed by incoming group telegrams, and the plugin executor.
//!
//! # Example
//!
//! ```no_run
//! use knx_link::{ga, Config, KnxClient};
//! use knx_link::plugin::PluginRegistry;
//!
//! let config = Config::builder()
//!     .gateway("192.168.1.10:3671".parse().unwrap())
//!     .build()?;
//! let client = KnxClient::new(config, PluginRegistry::default())?;
//! client.connect()?;
//!
//! client.write_request(ga!(1/2/3), &[0x01])?;
//! client.read_request(ga!(1/2/4))?;
//!
//! if let Some(status) = client.status(ga!(1/2/4)) {
//!     println!("1/2/4 = {:02X?}", status.value);
//! }
//! client.close();
//! # Ok::<(), knx_link::KnxError>(())
//! ```

mod dispatch;
mod heartbeat;
mod lifecycle;
mod state;
mod tunneling;

use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU8};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::channel::{Channel, ChannelKind};
use crate::config::Config;
use crate::error::{KnxError, Result};
use crate::event_pool::EventPool;
use crate::plugin::{Notifier, PluginRegistry};
use crate::protocol::cemi::CemiFrame;
use crate::protocol::frame::Hpai;
use crate::protocol::services::DescriptionResponse;
use crate::protocol::Body;
use crate::status::{StatusData, StatusPool};

pub use state::ClientState;

use heartbeat::Heartbeat;
use lifecycle::CloseReason;
use tunneling::ReceiveSequence;

/// Parameters of an established tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Session {
    channel_id: u8,
    /// Gateway control endpoint
    control_endpoint: SocketAddrV4,
    /// Gateway data endpoint
    data_endpoint: SocketAddrV4,
    /// Our control HPAI as advertised at connect time
    control_hpai: Hpai,
    individual_address: Option<IndividualAddress>,
}

/// Gateway found by discovery or configuration, with its description
#[derive(Debug, Clone)]
struct Gateway {
    endpoint: SocketAddrV4,
    description: DescriptionResponse,
}

#[derive(Debug, Default)]
struct Channels {
    control: Option<Channel>,
    data: Option<Channel>,
    multicast: Option<Channel>,
}

impl Channels {
    fn get(&self, kind: ChannelKind) -> Option<&Channel> {
        match kind {
            ChannelKind::Control => self.control.as_ref(),
            ChannelKind::Data => self.data.as_ref(),
            ChannelKind::Multicast => self.multicast.as_ref(),
        }
    }

    fn shutdown(self) {
        for mut channel in [self.multicast, self.data, self.control].into_iter().flatten() {
            channel.shutdown();
        }
    }
}

/// Shared client core; I/O threads and the heartbeat hold it weakly
#[derive(Debug)]
struct Inner {
    this: Weak<Inner>,
    config: Config,
    notifier: Notifier,
    events: EventPool,
    status: StatusPool,
    state: Mutex<ClientState>,
    state_changed: Condvar,
    channels: Mutex<Channels>,
    gateway: Mutex<Option<Gateway>>,
    session: Mutex<Option<Session>>,
    send_sequence: AtomicU8,
    receive_sequence: Mutex<ReceiveSequence>,
    last_alive: Mutex<Instant>,
    heartbeat: Mutex<Option<Heartbeat>>,
    /// Set by the first shutdown; later ones return immediately
    closing: AtomicBool,
    /// Set once the start notification went out
    started: AtomicBool,
    failure: Mutex<Option<Arc<KnxError>>>,
}

impl Inner {
    fn state(&self) -> ClientState {
        *self.state.lock()
    }

    /// Move to `next` if the lifecycle allows it
    fn transition(&self, next: ClientState) -> Result<()> {
        let mut state = self.state.lock();
        if !state.can_become(next) {
            log::debug!("refusing transition {} -> {next}", *state);
            return Err(KnxError::not_connected());
        }
        log::info!("{} -> {next}", *state);
        *state = next;
        self.state_changed.notify_all();
        Ok(())
    }

    /// Session of a connected client
    fn connected_session(&self) -> Result<Session> {
        if !self.state().is_connected() {
            return Err(KnxError::not_connected());
        }
        (*self.session.lock()).ok_or_else(KnxError::not_connected)
    }

    /// Queue `body` on the channel of `kind`
    fn send(&self, kind: ChannelKind, body: Body, target: SocketAddr) -> Result<()> {
        let channels = self.channels.lock();
        let channel = channels.get(kind).ok_or_else(KnxError::not_connected)?;
        channel.send(body, target)
    }

    /// Local endpoint of the channel of `kind`
    fn local_addr(&self, kind: ChannelKind) -> Result<SocketAddrV4> {
        self.channels
            .lock()
            .get(kind)
            .map(Channel::local_addr)
            .ok_or_else(KnxError::not_connected)
    }

    fn touch_alive(&self) {
        *self.last_alive.lock() = Instant::now();
    }

    fn silent_for(&self) -> Duration {
        self.last_alive.lock().elapsed()
    }
}

/// KNXnet/IP tunneling client
///
/// Dropping the client closes it.
#[derive(Debug)]
pub struct KnxClient {
    inner: Arc<Inner>,
}

impl KnxClient {
    /// Create an idle client; nothing is sent before [`KnxClient::connect`]
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the plugin executor threads cannot be spawned.
    pub fn new(config: Config, plugins: PluginRegistry) -> Result<Self> {
        let notifier = Notifier::new(plugins, config.pool_size(), config.plugin_queue_capacity())?;
        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            events: EventPool::new(config.check_interval()),
            config,
            notifier,
            status: StatusPool::new(),
            state: Mutex::new(ClientState::Idle),
            state_changed: Condvar::new(),
            channels: Mutex::new(Channels::default()),
            gateway: Mutex::new(None),
            session: Mutex::new(None),
            send_sequence: AtomicU8::new(0),
            receive_sequence: Mutex::new(ReceiveSequence::default()),
            last_alive: Mutex::new(Instant::now()),
            heartbeat: Mutex::new(None),
            closing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            failure: Mutex::new(None),
        });
        Ok(Self { inner })
    }

    /// Discover (unless a gateway is configured), describe and connect
    ///
    /// Blocks until the tunnel is up or the attempt failed. On failure every
    /// resource is released and the client is closed.
    ///
    /// # Errors
    ///
    /// - `Connection` timeout after `attempts` unanswered requests
    /// - `Connection` refused if the gateway rejects the tunnel
    /// - `Protocol` error if the gateway does not support tunneling
    /// - `Connection` already-started or not-connected if called twice
    pub fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Send `GroupValueWrite(data)` to `address` and wait for the gateway ack
    ///
    /// # Errors
    ///
    /// Fails if not connected, if `data` is too long, or if no positive
    /// acknowledgement arrives after `attempts` sends.
    pub fn write_request(&self, address: GroupAddress, data: &[u8]) -> Result<()> {
        self.inner.tunnel(CemiFrame::group_write(address, data)?)
    }

    /// Send `GroupValueRead` to `address` and wait for the gateway ack
    ///
    /// The answer arrives later as a `GroupValueResponse` and lands in the
    /// status pool.
    pub fn read_request(&self, address: GroupAddress) -> Result<()> {
        self.inner.tunnel(CemiFrame::group_read(address))
    }

    /// Last value seen for `address`, clearing its dirty flag
    pub fn status(&self, address: GroupAddress) -> Option<StatusData> {
        self.inner.status.read(address)
    }

    /// Last value seen for `address`, leaving the dirty flag alone
    pub fn peek_status(&self, address: GroupAddress) -> Option<StatusData> {
        self.inner.status.peek(address)
    }

    /// Every known value ordered by group address
    pub fn status_snapshot(&self) -> BTreeMap<GroupAddress, StatusData> {
        self.inner.status.snapshot()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        self.inner.state()
    }

    /// Channel id assigned by the gateway while connected
    pub fn channel_id(&self) -> Option<u8> {
        (*self.inner.session.lock()).map(|session| session.channel_id)
    }

    /// Individual address the gateway assigned to the tunnel
    pub fn individual_address(&self) -> Option<IndividualAddress> {
        (*self.inner.session.lock()).and_then(|session| session.individual_address)
    }

    /// Control endpoint of the gateway in use
    pub fn gateway(&self) -> Option<SocketAddrV4> {
        self.inner.gateway.lock().as_ref().map(|gateway| gateway.endpoint)
    }

    /// Description returned by the gateway during connect
    pub fn gateway_description(&self) -> Option<DescriptionResponse> {
        self.inner
            .gateway
            .lock()
            .as_ref()
            .map(|gateway| gateway.description.clone())
    }

    /// Error that closed the client, if it did not close on request
    pub fn failure(&self) -> Option<Arc<KnxError>> {
        self.inner.failure.lock().clone()
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Block until the client is closed or `timeout` elapses
    ///
    /// Returns `true` if the client is closed.
    pub fn wait_closed(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.inner.state.lock();
        while !state.is_closed() {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .state_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return state.is_closed();
                    }
                }
                None => self.inner.state_changed.wait(&mut state),
            }
        }
        true
    }

    /// Disconnect gracefully and release every resource
    ///
    /// Idempotent. Waits for the gateway's `DISCONNECT_RESPONSE` (bounded
    /// by the disconnect timeout); sockets are released regardless.
    pub fn close(&self) {
        self.inner.shutdown(CloseReason::Requested);
    }
}

impl Drop for KnxClient {
    fn drop(&mut self) {
        self.inner.shutdown(CloseReason::Requested);
    }
}
