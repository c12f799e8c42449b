//! Tagged union over every KNXnet/IP body the engine exchanges.

use crate::error::Result;
use crate::protocol::constants::ServiceType;
use crate::protocol::frame::{FrameBuilder, KnxnetIpFrame};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionStateRequest, ConnectionStateResponse,
    DescriptionRequest, DescriptionResponse, DisconnectRequest, DisconnectResponse, SearchRequest,
    SearchResponse,
};
use crate::protocol::tunneling::{RoutingIndication, TunnelingAck, TunnelingRequest};

/// Decoded KNXnet/IP body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `SEARCH_REQUEST`
    SearchRequest(SearchRequest),
    /// `SEARCH_RESPONSE`
    SearchResponse(SearchResponse),
    /// `DESCRIPTION_REQUEST`
    DescriptionRequest(DescriptionRequest),
    /// `DESCRIPTION_RESPONSE`
    DescriptionResponse(DescriptionResponse),
    /// `CONNECT_REQUEST`
    ConnectRequest(ConnectRequest),
    /// `CONNECT_RESPONSE`
    ConnectResponse(ConnectResponse),
    /// `CONNECTIONSTATE_REQUEST`
    ConnectionStateRequest(ConnectionStateRequest),
    /// `CONNECTIONSTATE_RESPONSE`
    ConnectionStateResponse(ConnectionStateResponse),
    /// `DISCONNECT_REQUEST`
    DisconnectRequest(DisconnectRequest),
    /// `DISCONNECT_RESPONSE`
    DisconnectResponse(DisconnectResponse),
    /// `TUNNELING_REQUEST`
    TunnelingRequest(TunnelingRequest),
    /// `TUNNELING_ACK`
    TunnelingAck(TunnelingAck),
    /// `ROUTING_INDICATION`
    RoutingIndication(RoutingIndication),
}

impl Body {
    /// Decode a complete datagram (header and body)
    ///
    /// # Errors
    ///
    /// Returns a frame or protocol error describing the first violation.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        let frame = KnxnetIpFrame::parse(datagram)?;
        Self::decode_body(frame.service_type(), frame.body())
    }

    /// Decode the bytes following a header announcing `service_type`
    pub fn decode_body(service_type: ServiceType, data: &[u8]) -> Result<Self> {
        Ok(match service_type {
            ServiceType::SearchRequest => Self::SearchRequest(SearchRequest::decode(data)?),
            ServiceType::SearchResponse => Self::SearchResponse(SearchResponse::decode(data)?),
            ServiceType::DescriptionRequest => {
                Self::DescriptionRequest(DescriptionRequest::decode(data)?)
            }
            ServiceType::DescriptionResponse => {
                Self::DescriptionResponse(DescriptionResponse::decode(data)?)
            }
            ServiceType::ConnectRequest => Self::ConnectRequest(ConnectRequest::decode(data)?),
            ServiceType::ConnectResponse => Self::ConnectResponse(ConnectResponse::decode(data)?),
            ServiceType::ConnectionStateRequest => {
                Self::ConnectionStateRequest(ConnectionStateRequest::decode(data)?)
            }
            ServiceType::ConnectionStateResponse => {
                Self::ConnectionStateResponse(ConnectionStateResponse::decode(data)?)
            }
            ServiceType::DisconnectRequest => {
                Self::DisconnectRequest(DisconnectRequest::decode(data)?)
            }
            ServiceType::DisconnectResponse => {
                Self::DisconnectResponse(DisconnectResponse::decode(data)?)
            }
            ServiceType::TunnelingRequest => {
                Self::TunnelingRequest(TunnelingRequest::decode(data)?)
            }
            ServiceType::TunnelingAck => Self::TunnelingAck(TunnelingAck::decode(data)?),
            ServiceType::RoutingIndication => {
                Self::RoutingIndication(RoutingIndication::decode(data)?)
            }
        })
    }

    /// Encode to a complete datagram whose length field matches its size
    ///
    /// # Errors
    ///
    /// Returns a frame error if an embedded cEMI frame or the datagram
    /// itself exceeds its length limits.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match self {
            Self::SearchRequest(b) => b.encode_into(&mut body),
            Self::SearchResponse(b) => b.encode_into(&mut body),
            Self::DescriptionRequest(b) => b.encode_into(&mut body),
            Self::DescriptionResponse(b) => b.encode_into(&mut body),
            Self::ConnectRequest(b) => b.encode_into(&mut body),
            Self::ConnectResponse(b) => b.encode_into(&mut body),
            Self::ConnectionStateRequest(b) => b.encode_into(&mut body),
            Self::ConnectionStateResponse(b) => b.encode_into(&mut body),
            Self::DisconnectRequest(b) => b.encode_into(&mut body),
            Self::DisconnectResponse(b) => b.encode_into(&mut body),
            Self::TunnelingRequest(b) => b.encode_into(&mut body)?,
            Self::TunnelingAck(b) => b.encode_into(&mut body),
            Self::RoutingIndication(b) => b.encode_into(&mut body)?,
        }
        FrameBuilder::new(self.service_type(), &body).build()
    }

    /// Service type identifier of this body
    pub const fn service_type(&self) -> ServiceType {
        match self {
            Self::SearchRequest(_) => ServiceType::SearchRequest,
            Self::SearchResponse(_) => ServiceType::SearchResponse,
            Self::DescriptionRequest(_) => ServiceType::DescriptionRequest,
            Self::DescriptionResponse(_) => ServiceType::DescriptionResponse,
            Self::ConnectRequest(_) => ServiceType::ConnectRequest,
            Self::ConnectResponse(_) => ServiceType::ConnectResponse,
            Self::ConnectionStateRequest(_) => ServiceType::ConnectionStateRequest,
            Self::ConnectionStateResponse(_) => ServiceType::ConnectionStateResponse,
            Self::DisconnectRequest(_) => ServiceType::DisconnectRequest,
            Self::DisconnectResponse(_) => ServiceType::DisconnectResponse,
            Self::TunnelingRequest(_) => ServiceType::TunnelingRequest,
            Self::TunnelingAck(_) => ServiceType::TunnelingAck,
            Self::RoutingIndication(_) => ServiceType::RoutingIndication,
        }
    }

    /// Channel id carried by the body, for bodies scoped to a connection
    ///
    /// `ConnectResponse` is excluded: it assigns the channel rather than
    /// being validated against it.
    pub const fn channel_id(&self) -> Option<u8> {
        match self {
            Self::ConnectionStateRequest(b) => Some(b.channel_id),
            Self::ConnectionStateResponse(b) => Some(b.channel_id),
            Self::DisconnectRequest(b) => Some(b.channel_id),
            Self::DisconnectResponse(b) => Some(b.channel_id),
            Self::TunnelingRequest(b) => Some(b.header.channel_id),
            Self::TunnelingAck(b) => Some(b.header.channel_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{GroupAddress, IndividualAddress};
    use crate::protocol::cemi::CemiFrame;
    use crate::protocol::constants::ServiceFamily;
    use crate::protocol::frame::Hpai;
    use crate::protocol::services::{DeviceDescription, Dib};

    fn endpoint() -> Hpai {
        Hpai::new("192.168.1.20:40001".parse().unwrap())
    }

    #[test]
    fn test_every_body_roundtrips_with_matching_length() {
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        let bodies = vec![
            Body::SearchRequest(SearchRequest {
                discovery_endpoint: endpoint(),
            }),
            Body::SearchResponse(SearchResponse {
                control_endpoint: endpoint(),
                dibs: vec![Dib::SupportedServiceFamilies(vec![(
                    ServiceFamily::Tunneling,
                    1,
                )])],
            }),
            Body::DescriptionRequest(DescriptionRequest {
                control_endpoint: endpoint(),
            }),
            Body::DescriptionResponse(DescriptionResponse {
                dibs: vec![Dib::Unknown(vec![0x02, 0x7F])],
            }),
            Body::ConnectRequest(ConnectRequest::new(endpoint(), Hpai::nat())),
            Body::ConnectResponse(ConnectResponse::accepted(
                3,
                endpoint(),
                IndividualAddress::new(1, 1, 250).unwrap(),
            )),
            Body::ConnectResponse(ConnectResponse::refused(0x24)),
            Body::ConnectionStateRequest(ConnectionStateRequest::new(3, endpoint())),
            Body::ConnectionStateResponse(ConnectionStateResponse {
                channel_id: 3,
                status: 0,
            }),
            Body::DisconnectRequest(DisconnectRequest::new(3, endpoint())),
            Body::DisconnectResponse(DisconnectResponse {
                channel_id: 3,
                status: 0,
            }),
            Body::TunnelingRequest(TunnelingRequest::new(
                3,
                200,
                CemiFrame::group_write(ga, &[0x0C, 0x1A]).unwrap(),
            )),
            Body::TunnelingAck(TunnelingAck::new(3, 200, 0)),
            Body::RoutingIndication(RoutingIndication {
                cemi: CemiFrame::group_read(ga),
            }),
        ];

        for body in bodies {
            let bytes = body.encode().unwrap();
            let total = usize::from(u16::from_be_bytes([bytes[4], bytes[5]]));
            assert_eq!(total, bytes.len(), "{:?}", body.service_type());
            assert_eq!(Body::decode(&bytes).unwrap(), body);
        }
    }

    #[test]
    fn test_tunneling_ack_datagram_is_ten_bytes() {
        let bytes = Body::TunnelingAck(TunnelingAck::new(1, 2, 0)).encode().unwrap();
        assert_eq!(bytes, [0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_channel_id() {
        let ack = Body::TunnelingAck(TunnelingAck::new(9, 0, 0));
        assert_eq!(ack.channel_id(), Some(9));
        let response = Body::ConnectResponse(ConnectResponse::refused(0x22));
        assert_eq!(response.channel_id(), None);
    }

    #[test]
    fn test_decode_description_with_tunneling() {
        let datagram = [
            0x06, 0x10, 0x02, 0x04, 0x00, 0x0C, // header, 12 bytes
            0x06, 0x02, 0x02, 0x01, 0x04, 0x01, // families: core v1, tunneling v1
        ];
        let Body::DescriptionResponse(description) = Body::decode(&datagram).unwrap() else {
            panic!("expected a description response");
        };
        assert!(description.supports(ServiceFamily::Tunneling));
    }
}
