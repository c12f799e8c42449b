//! Heartbeat monitor.
//!
//! Every interval the thread sends a `CONNECTIONSTATE_REQUEST`. Any valid
//! inbound frame also counts as a sign of life. Once nothing has been heard
//! for longer than the alive timeout the client is closed with a liveness
//! failure.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::lifecycle::CloseReason;
use super::Inner;
use crate::channel::{join_unless_current, ChannelKind};
use crate::error::Result;
use crate::event_pool::RequestCategory;
use crate::protocol::constants::E_CONNECTION_ID;
use crate::protocol::services::ConnectionStateRequest;
use crate::protocol::Body;

/// Handle to the heartbeat thread
#[derive(Debug)]
pub(super) struct Heartbeat {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub(super) fn spawn(client: Weak<Inner>, interval: Duration, alive_timeout: Duration) -> Result<Self> {
        let (stop, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("knx-heartbeat".into())
            .spawn(move || run(&client, &stop_rx, interval, alive_timeout))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread; returns at once when called from the thread itself
    pub(super) fn stop(mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}

fn run(client: &Weak<Inner>, stop: &Receiver<()>, interval: Duration, alive_timeout: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(client) = client.upgrade() else {
            break;
        };
        if !client.beat(alive_timeout) {
            break;
        }
    }
    log::debug!("heartbeat stopped");
}

impl Inner {
    /// One heartbeat; returns `false` once the monitor should stop
    fn beat(&self, alive_timeout: Duration) -> bool {
        let Ok(session) = self.connected_session() else {
            return false;
        };

        let request = Body::ConnectionStateRequest(ConnectionStateRequest::new(
            session.channel_id,
            session.control_hpai,
        ));
        match self.request(
            RequestCategory::ConnectionState,
            request,
            ChannelKind::Control,
            session.control_endpoint.into(),
        ) {
            Ok(Body::ConnectionStateResponse(response)) if response.is_ok() => {
                log::trace!("heartbeat ok");
                self.touch_alive();
            }
            Ok(Body::ConnectionStateResponse(response)) if response.status == E_CONNECTION_ID => {
                log::error!("gateway no longer knows channel {}, closing", session.channel_id);
                self.shutdown(CloseReason::TunnelDropped);
                return false;
            }
            Ok(Body::ConnectionStateResponse(response)) => {
                // counts as a missed beat; the alive timeout decides
                log::warn!("gateway reports connection state {:#04x}", response.status);
            }
            Ok(other) => log::warn!("unexpected heartbeat answer {:?}", other.service_type()),
            Err(_) if self.events.is_cancelled() => return false,
            Err(e) => log::warn!("heartbeat failed: {e}"),
        }

        let silent = self.silent_for();
        if silent > alive_timeout {
            log::error!("gateway silent for {silent:?}, closing");
            self.shutdown(CloseReason::LivenessFailure);
            return false;
        }
        true
    }
}
