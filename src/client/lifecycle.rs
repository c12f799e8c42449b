//! Discovery, description, connect and shutdown.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use super::dispatch::Dispatcher;
use super::heartbeat::Heartbeat;
use super::tunneling::ReceiveSequence;
use super::{Channels, ClientState, Gateway, Inner, Session};
use crate::channel::{Channel, ChannelKind, ChannelSink};
use crate::error::{KnxError, Result};
use crate::event_pool::RequestCategory;
use crate::protocol::constants::{KNXNETIP_DEFAULT_PORT, KNXNETIP_MULTICAST_ADDR};
use crate::protocol::frame::Hpai;
use crate::protocol::services::{
    ConnectRequest, DescriptionRequest, DescriptionResponse, DeviceDescription, DisconnectRequest,
    SearchRequest,
};
use crate::protocol::{Body, ServiceFamily};

/// Why the client is shutting down
#[derive(Debug)]
pub(super) enum CloseReason {
    /// `close()` or drop
    Requested,
    /// `connect()` failed; the caller already has the error
    Aborted,
    /// The gateway sent a `DISCONNECT_REQUEST`
    GatewayDisconnect,
    /// The gateway answered a heartbeat with `E_CONNECTION_ID`
    TunnelDropped,
    /// Nothing heard from the gateway within the alive timeout
    LivenessFailure,
    /// A channel socket became unusable
    ChannelFailed(KnxError),
}

impl CloseReason {
    /// Error reported to observers and kept as the client's failure
    fn into_failure(self) -> Option<KnxError> {
        match self {
            Self::Requested | Self::Aborted => None,
            Self::GatewayDisconnect | Self::TunnelDropped => Some(KnxError::connection_lost()),
            Self::LivenessFailure => Some(KnxError::liveness_failure()),
            Self::ChannelFailed(error) => Some(error),
        }
    }
}

impl Inner {
    pub(super) fn connect(&self) -> Result<()> {
        let first = if self.config.gateway().is_some() {
            ClientState::Describing
        } else {
            ClientState::Discovering
        };
        {
            let state = self.state.lock();
            match *state {
                ClientState::Idle => {}
                ClientState::Closed => return Err(KnxError::not_connected()),
                _ => return Err(KnxError::already_started()),
            }
        }
        self.transition(first)?;

        match self.establish() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("connect failed: {e}");
                self.shutdown(CloseReason::Aborted);
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<()> {
        self.open_channels()?;

        let endpoint = match self.config.gateway() {
            Some(endpoint) => endpoint,
            None => {
                let endpoint = self.discover()?;
                self.transition(ClientState::Describing)?;
                endpoint
            }
        };

        let description = self.describe(endpoint)?;
        if let Some(info) = description.device_info() {
            log::info!("gateway '{}' ({}) at {endpoint}", info.name(), info.individual_address);
        }
        if !description.supports(ServiceFamily::Tunneling) {
            return Err(KnxError::no_tunneling_support());
        }
        *self.gateway.lock() = Some(Gateway {
            endpoint,
            description,
        });

        self.transition(ClientState::Connecting)?;
        let session = self.open_tunnel(endpoint)?;

        *self.session.lock() = Some(session);
        *self.receive_sequence.lock() = ReceiveSequence::default();
        self.send_sequence.store(0, Ordering::Release);
        self.touch_alive();
        self.transition(ClientState::Connected)?;

        let heartbeat = Heartbeat::spawn(
            self.this.clone(),
            self.config.heartbeat_interval(),
            self.config.alive_timeout(),
        )?;
        *self.heartbeat.lock() = Some(heartbeat);

        self.started.store(true, Ordering::Release);
        self.notifier.start();
        log::info!(
            "tunnel open on channel {} (individual address {})",
            session.channel_id,
            session
                .individual_address
                .map_or_else(|| "unassigned".to_string(), |address| address.to_string())
        );
        Ok(())
    }

    fn open_channels(&self) -> Result<()> {
        let sink: Arc<dyn ChannelSink> = Arc::new(Dispatcher::new(self.this.clone()));

        let control = Channel::open(ChannelKind::Control, &self.config, Arc::clone(&sink))?;
        let data = Channel::open(ChannelKind::Data, &self.config, Arc::clone(&sink))?;

        let multicast = if self.config.gateway().is_none() {
            Some(Channel::open(ChannelKind::Multicast, &self.config, sink)?)
        } else if self.config.routing() {
            match Channel::open(ChannelKind::Multicast, &self.config, sink) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    log::warn!("routing indications unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        *self.channels.lock() = Channels {
            control: Some(control),
            data: Some(data),
            multicast,
        };
        Ok(())
    }

    /// Send `body` up to `attempts` times and wait for the matching response
    pub(super) fn request(
        &self,
        category: RequestCategory,
        body: Body,
        kind: ChannelKind,
        target: SocketAddr,
    ) -> Result<Body> {
        let guard = self.events.register(category, body.clone())?;
        let attempts = self.config.attempts();
        let timeout = self.config.timeout(category);

        for attempt in 1..=attempts {
            self.send(kind, body.clone(), target)?;
            guard.mark_sent();

            if let Some(response) = guard.await_response(timeout) {
                return Ok(response);
            }
            if self.events.is_cancelled() {
                return Err(KnxError::not_connected());
            }
            log::warn!("no {category:?} response from {target} (attempt {attempt}/{attempts})");
        }

        Err(KnxError::connection_timeout(category))
    }

    fn discover(&self) -> Result<SocketAddrV4> {
        let target = SocketAddrV4::new(KNXNETIP_MULTICAST_ADDR, KNXNETIP_DEFAULT_PORT);
        let request = Body::SearchRequest(SearchRequest {
            discovery_endpoint: self.local_hpai(ChannelKind::Multicast, target)?,
        });

        let response = self
            .request(RequestCategory::Discovery, request, ChannelKind::Multicast, target.into())
            .map_err(|e| if e.is_timeout() { KnxError::no_gateway_found() } else { e })?;

        let Body::SearchResponse(response) = response else {
            return Err(KnxError::unexpected_body());
        };
        let endpoint = response.control_endpoint.endpoint;
        if endpoint.ip().is_unspecified() || endpoint.port() == 0 {
            return Err(KnxError::no_gateway_found());
        }
        log::info!("discovered gateway at {endpoint}");
        Ok(endpoint)
    }

    fn describe(&self, gateway: SocketAddrV4) -> Result<DescriptionResponse> {
        let request = Body::DescriptionRequest(DescriptionRequest {
            control_endpoint: self.local_hpai(ChannelKind::Control, gateway)?,
        });
        match self.request(RequestCategory::Description, request, ChannelKind::Control, gateway.into())? {
            Body::DescriptionResponse(description) => Ok(description),
            _ => Err(KnxError::unexpected_body()),
        }
    }

    fn open_tunnel(&self, gateway: SocketAddrV4) -> Result<Session> {
        let control_hpai = self.local_hpai(ChannelKind::Control, gateway)?;
        let data_hpai = self.local_hpai(ChannelKind::Data, gateway)?;
        let request = Body::ConnectRequest(ConnectRequest::new(control_hpai, data_hpai));

        let Body::ConnectResponse(response) =
            self.request(RequestCategory::Connect, request, ChannelKind::Control, gateway.into())?
        else {
            return Err(KnxError::unexpected_body());
        };
        if !response.is_ok() {
            return Err(KnxError::connection_refused(response.status));
        }

        // A NAT-style data endpoint means "same host as the control endpoint"
        let data_endpoint = match response.data_endpoint.map(|hpai| hpai.endpoint) {
            Some(endpoint) if endpoint.port() == 0 => gateway,
            Some(endpoint) if endpoint.ip().is_unspecified() => {
                SocketAddrV4::new(*gateway.ip(), endpoint.port())
            }
            Some(endpoint) => endpoint,
            None => gateway,
        };

        Ok(Session {
            channel_id: response.channel_id,
            control_endpoint: gateway,
            data_endpoint,
            control_hpai,
            individual_address: response.crd.and_then(|crd| crd.individual_address),
        })
    }

    /// HPAI advertising the channel of `kind` to a peer at `peer`
    fn local_hpai(&self, kind: ChannelKind, peer: SocketAddrV4) -> Result<Hpai> {
        if self.config.nat() {
            return Ok(Hpai::nat());
        }
        let local = self.local_addr(kind)?;
        if !local.ip().is_unspecified() {
            return Ok(Hpai::new(local));
        }

        let ip = match self.config.local_ip() {
            Some(ip) => ip,
            None => match detect_local_ip(peer) {
                Ok(ip) => ip,
                Err(e) => {
                    log::warn!("cannot determine local address toward {peer} ({e}), using NAT HPAI");
                    return Ok(Hpai::nat());
                }
            },
        };
        Ok(Hpai::new(SocketAddrV4::new(ip, local.port())))
    }

    /// Tear everything down exactly once
    pub(super) fn shutdown(&self, reason: CloseReason) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        let was_connected = self.state().is_connected();
        if was_connected {
            let _ = self.transition(ClientState::Disconnecting);
            match reason {
                CloseReason::Requested => self.disconnect(),
                CloseReason::LivenessFailure => self.disconnect_without_waiting(),
                _ => {}
            }
        }

        self.events.cancel();
        let heartbeat = self.heartbeat.lock().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop();
        }
        let channels = std::mem::take(&mut *self.channels.lock());
        channels.shutdown();
        *self.session.lock() = None;

        let _ = self.transition(ClientState::Closed);

        if let Some(failure) = reason.into_failure() {
            log::error!("client closed: {failure}");
            let failure = Arc::new(failure);
            *self.failure.lock() = Some(Arc::clone(&failure));
            self.notifier.error(failure);
        }
        if self.started.load(Ordering::Acquire) {
            self.notifier.shutdown();
        }
        self.notifier.stop();
    }

    fn disconnect_request(&self) -> Option<(Body, SocketAddr)> {
        let session = (*self.session.lock())?;
        let request = Body::DisconnectRequest(DisconnectRequest::new(
            session.channel_id,
            session.control_hpai,
        ));
        Some((request, session.control_endpoint.into()))
    }

    fn disconnect(&self) {
        let Some((request, target)) = self.disconnect_request() else {
            return;
        };
        let started = Instant::now();
        match self.request(RequestCategory::Disconnect, request, ChannelKind::Control, target) {
            Ok(Body::DisconnectResponse(response)) if response.is_ok() => {
                log::debug!("disconnect confirmed after {:?}", started.elapsed());
            }
            Ok(Body::DisconnectResponse(response)) => {
                log::warn!("gateway answered disconnect with status {:#04x}", response.status);
            }
            Ok(_) => log::warn!("unexpected answer to disconnect"),
            Err(e) => log::warn!("disconnect not confirmed: {e}"),
        }
    }

    fn disconnect_without_waiting(&self) {
        if let Some((request, target)) = self.disconnect_request() {
            if let Err(e) = self.send(ChannelKind::Control, request, target) {
                log::debug!("disconnect request not sent: {e}");
            }
        }
    }
}

/// Address of the interface that routes toward `peer`
fn detect_local_ip(peer: SocketAddrV4) -> io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(peer)?;
    match probe.local_addr()? {
        SocketAddr::V4(local) if !local.ip().is_unspecified() => Ok(*local.ip()),
        other => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no IPv4 route ({other})"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_per_reason() {
        assert!(CloseReason::Requested.into_failure().is_none());
        assert!(CloseReason::Aborted.into_failure().is_none());
        assert!(matches!(
            CloseReason::LivenessFailure.into_failure(),
            Some(KnxError::Connection(_))
        ));
        assert!(matches!(
            CloseReason::TunnelDropped.into_failure(),
            Some(KnxError::Connection(ref e)) if e.is_lost()
        ));
        assert!(CloseReason::ChannelFailed(KnxError::channel_closed())
            .into_failure()
            .is_some());
    }

    #[test]
    fn test_detect_local_ip_on_loopback() {
        let ip = detect_local_ip("127.0.0.1:3671".parse().unwrap()).unwrap();
        assert!(ip.is_loopback());
    }
}
