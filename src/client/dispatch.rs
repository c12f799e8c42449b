//! Routing of inbound bodies.
//!
//! [`Inner::dispatch`] decides what a received body means and returns the
//! decision as a [`Dispatch`] value; [`Inner::conclude`] then logs it and
//! notifies plugins. Protocol violations are values, not errors.

use std::net::SocketAddr;
use std::sync::Weak;

use super::lifecycle::CloseReason;
use super::tunneling::SequenceDecision;
use super::{Inner, Session};
use crate::addressing::GroupAddress;
use crate::channel::{ChannelKind, ChannelSink};
use crate::error::KnxError;
use crate::event_pool::RequestCategory;
use crate::protocol::constants::E_NO_ERROR;
use crate::protocol::services::{DisconnectRequest, DisconnectResponse};
use crate::protocol::tunneling::{TunnelingAck, TunnelingRequest};
use crate::protocol::Body;

/// Outcome of routing one inbound body
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Response handed to the waiting request
    Completed(RequestCategory),
    /// Response nobody was waiting for (late, or a repeat)
    Unmatched,
    /// Tunneling request accepted and acknowledged
    Indication {
        sequence: u8,
        /// Group address whose status changed
        updated: Option<GroupAddress>,
    },
    /// Repeat of the last accepted tunneling request; acknowledged only
    Duplicate { sequence: u8 },
    /// Tunneling request older than the last accepted one; acknowledged only
    Stale { sequence: u8 },
    /// Routing indication from the multicast group
    Routing { updated: Option<GroupAddress> },
    /// The gateway closed the tunnel and was answered
    GatewayDisconnect,
    /// Dropped for a protocol violation
    Rejected(KnxError),
    /// Nothing to do with this body
    Ignored,
}

impl Inner {
    /// Decide what `body` means; acknowledgements and replies are sent here
    pub(super) fn dispatch(&self, channel: ChannelKind, body: &Body) -> Dispatch {
        let session = *self.session.lock();

        if let Some(channel_id) = body.channel_id() {
            let Some(session) = session else {
                return Dispatch::Ignored;
            };
            if channel_id != session.channel_id {
                return Dispatch::Rejected(KnxError::wrong_channel_id(session.channel_id, channel_id));
            }
        }
        // an error answer to a heartbeat is no sign of life
        let refused_heartbeat =
            matches!(body, Body::ConnectionStateResponse(response) if !response.is_ok());
        if channel != ChannelKind::Multicast && !refused_heartbeat {
            self.touch_alive();
        }

        match (body, session) {
            (Body::TunnelingRequest(request), Some(session)) => self.on_tunneling_request(&session, request),
            (Body::DisconnectRequest(request), Some(session)) => self.on_gateway_disconnect(&session, request),
            (Body::RoutingIndication(indication), _) => Dispatch::Routing {
                updated: self.status.update(&indication.cemi),
            },
            (response, _) => match RequestCategory::of_response(response) {
                Some((category, _)) if self.events.complete(response) => Dispatch::Completed(category),
                Some(_) => Dispatch::Unmatched,
                None => Dispatch::Ignored,
            },
        }
    }

    fn on_tunneling_request(&self, session: &Session, request: &TunnelingRequest) -> Dispatch {
        let sequence = request.header.sequence;

        // every request is acknowledged, whatever happens to it next
        let ack = Body::TunnelingAck(TunnelingAck::new(session.channel_id, sequence, E_NO_ERROR));
        if let Err(e) = self.send(ChannelKind::Data, ack, session.data_endpoint.into()) {
            log::warn!("cannot acknowledge sequence {sequence}: {e}");
        }

        match self.receive_sequence.lock().classify(sequence) {
            SequenceDecision::Accept => Dispatch::Indication {
                sequence,
                updated: self.status.update(&request.cemi),
            },
            SequenceDecision::Duplicate => Dispatch::Duplicate { sequence },
            SequenceDecision::Stale => Dispatch::Stale { sequence },
        }
    }

    fn on_gateway_disconnect(&self, session: &Session, request: &DisconnectRequest) -> Dispatch {
        let target = if request.control_endpoint.is_nat() {
            session.control_endpoint
        } else {
            request.control_endpoint.endpoint
        };
        let response = Body::DisconnectResponse(DisconnectResponse {
            channel_id: session.channel_id,
            status: E_NO_ERROR,
        });
        if let Err(e) = self.send(ChannelKind::Control, response, target.into()) {
            log::warn!("cannot answer gateway disconnect: {e}");
        }
        Dispatch::GatewayDisconnect
    }

    /// Log the decision, notify plugins and act on terminal outcomes
    pub(super) fn conclude(&self, channel: ChannelKind, body: &Body, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Completed(category) => {
                log::trace!("{channel}: {category:?} response delivered");
                self.notifier.incoming(body);
            }
            Dispatch::Indication { sequence, updated } => {
                if let Some(address) = updated {
                    log::debug!("{channel}: sequence {sequence} updated {address}");
                }
                self.notifier.incoming(body);
            }
            Dispatch::Routing { updated } => {
                if let Some(address) = updated {
                    log::debug!("{channel}: routing indication updated {address}");
                }
                self.notifier.incoming(body);
            }
            Dispatch::Duplicate { sequence } => {
                log::debug!("{channel}: repeated sequence {sequence} acknowledged, not applied");
            }
            Dispatch::Stale { sequence } => {
                log::warn!("{channel}: stale sequence {sequence} acknowledged and dropped");
            }
            Dispatch::Unmatched => {
                log::debug!("{channel}: unmatched {:?}", body.service_type());
            }
            Dispatch::GatewayDisconnect => {
                log::warn!("{channel}: gateway closed the tunnel");
                self.notifier.incoming(body);
                self.shutdown(CloseReason::GatewayDisconnect);
            }
            Dispatch::Rejected(error) => {
                log::warn!("{channel}: dropping {:?}: {error}", body.service_type());
                self.notifier.error(error);
            }
            Dispatch::Ignored => {
                log::trace!("{channel}: ignoring {:?}", body.service_type());
            }
        }
    }
}

/// Channel sink feeding the client; holds the client weakly
#[derive(Debug)]
pub(super) struct Dispatcher {
    client: Weak<Inner>,
}

impl Dispatcher {
    pub(super) fn new(client: Weak<Inner>) -> Self {
        Self { client }
    }
}

impl ChannelSink for Dispatcher {
    fn on_received(&self, channel: ChannelKind, source: SocketAddr, body: Body) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        log::trace!("{channel}: {:?} from {source}", body.service_type());
        let dispatch = client.dispatch(channel, &body);
        client.conclude(channel, &body, dispatch);
    }

    fn on_sent(&self, _channel: ChannelKind, body: &Body) {
        if let Some(client) = self.client.upgrade() {
            client.notifier.outgoing(body);
        }
    }

    fn on_error(&self, _channel: ChannelKind, error: KnxError) {
        if let Some(client) = self.client.upgrade() {
            client.notifier.error(error);
        }
    }

    fn on_failed(&self, channel: ChannelKind, error: KnxError) {
        if let Some(client) = self.client.upgrade() {
            log::error!("{channel} channel failed: {error}");
            client.shutdown(CloseReason::ChannelFailed(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::IndividualAddress;
    use crate::client::KnxClient;
    use crate::config::Config;
    use crate::plugin::PluginRegistry;
    use crate::protocol::cemi::CemiFrame;
    use crate::protocol::constants::CEMIMessageCode;
    use crate::protocol::frame::Hpai;
    use crate::protocol::constants::E_CONNECTION_ID;
    use crate::protocol::services::ConnectionStateResponse;
    use std::time::{Duration, Instant};

    fn connected(channel_id: u8) -> KnxClient {
        let config = Config::builder().pool_size(1).build().unwrap();
        let client = KnxClient::new(config, PluginRegistry::default()).unwrap();
        let gateway = "127.0.0.1:3671".parse().unwrap();
        *client.inner.session.lock() = Some(Session {
            channel_id,
            control_endpoint: gateway,
            data_endpoint: gateway,
            control_hpai: Hpai::nat(),
            individual_address: None,
        });
        client
    }

    fn indication(channel_id: u8, sequence: u8, value: u8) -> Body {
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        let cemi = CemiFrame {
            message_code: CEMIMessageCode::LDataInd,
            source: IndividualAddress::new(1, 1, 5).unwrap(),
            ..CemiFrame::group_write(ga, &[value]).unwrap()
        };
        Body::TunnelingRequest(TunnelingRequest::new(channel_id, sequence, cemi))
    }

    #[test]
    fn test_wrong_channel_never_reaches_status() {
        let client = connected(7);
        let dispatch = client.inner.dispatch(ChannelKind::Data, &indication(9, 0, 1));

        let Dispatch::Rejected(KnxError::Protocol(error)) = dispatch else {
            panic!("expected a rejection, got {dispatch:?}");
        };
        assert!(error.is_wrong_channel_id());
        assert!(client.status_snapshot().is_empty());
    }

    #[test]
    fn test_duplicate_sequence_applied_once() {
        let client = connected(7);
        let ga = GroupAddress::new(1, 2, 3).unwrap();

        let first = client.inner.dispatch(ChannelKind::Data, &indication(7, 5, 0));
        assert!(matches!(first, Dispatch::Indication { sequence: 5, updated: Some(a) } if a == ga));
        assert!(client.status(ga).unwrap().is_dirty());

        let second = client.inner.dispatch(ChannelKind::Data, &indication(7, 5, 1));
        assert!(matches!(second, Dispatch::Duplicate { sequence: 5 }));
        let status = client.peek_status(ga).unwrap();
        assert_eq!(status.value, vec![0x00]);
        assert!(!status.is_dirty());
    }

    #[test]
    fn test_lower_sequence_is_stale() {
        let client = connected(7);
        assert!(matches!(
            client.inner.dispatch(ChannelKind::Data, &indication(7, 10, 1)),
            Dispatch::Indication { sequence: 10, .. }
        ));
        assert!(matches!(
            client.inner.dispatch(ChannelKind::Data, &indication(7, 8, 2)),
            Dispatch::Stale { sequence: 8 }
        ));
        assert!(matches!(
            client.inner.dispatch(ChannelKind::Data, &indication(7, 11, 3)),
            Dispatch::Indication { sequence: 11, .. }
        ));
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        assert_eq!(client.peek_status(ga).unwrap().value, vec![0x03]);
    }

    #[test]
    fn test_response_without_waiter_is_unmatched() {
        let client = connected(7);
        let response = Body::ConnectionStateResponse(ConnectionStateResponse {
            channel_id: 7,
            status: 0,
        });
        assert!(matches!(
            client.inner.dispatch(ChannelKind::Control, &response),
            Dispatch::Unmatched
        ));
    }

    #[test]
    fn test_only_ok_heartbeat_answers_count_as_alive() {
        let client = connected(7);
        let long_ago = Instant::now() - Duration::from_secs(5);
        *client.inner.last_alive.lock() = long_ago;

        let refused = Body::ConnectionStateResponse(ConnectionStateResponse {
            channel_id: 7,
            status: E_CONNECTION_ID,
        });
        client.inner.dispatch(ChannelKind::Control, &refused);
        assert!(client.inner.silent_for() >= Duration::from_secs(5));

        let ok = Body::ConnectionStateResponse(ConnectionStateResponse {
            channel_id: 7,
            status: 0,
        });
        client.inner.dispatch(ChannelKind::Control, &ok);
        assert!(client.inner.silent_for() < Duration::from_secs(1));
    }

    #[test]
    fn test_channel_frames_ignored_without_session() {
        let config = Config::builder().pool_size(1).build().unwrap();
        let client = KnxClient::new(config, PluginRegistry::default()).unwrap();
        assert!(matches!(
            client.inner.dispatch(ChannelKind::Data, &indication(7, 0, 1)),
            Dispatch::Ignored
        ));
    }
}
