//! Tunneling and routing bodies.
//!
//! ```text
//! TUNNELING_REQUEST:  header(6) | conn header(4) | cEMI
//! TUNNELING_ACK:      header(6) | conn header(4)          (10 bytes)
//! ROUTING_INDICATION: header(6) | cEMI
//! ```

use crate::error::{KnxError, Result};
use crate::protocol::cemi::CemiFrame;
use crate::protocol::constants::E_NO_ERROR;
use crate::protocol::frame::require_len;

/// Connection header shared by tunneling requests and acks
///
/// The fourth octet is reserved in requests and carries the status in acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHeader {
    /// Communication channel ID
    pub channel_id: u8,
    /// Sequence counter
    pub sequence: u8,
    /// Status (acks) or reserved (requests)
    pub status: u8,
}

impl ConnectionHeader {
    /// Size of the connection header
    pub const SIZE: usize = 4;

    /// Create a new connection header with status 0
    pub const fn new(channel_id: u8, sequence: u8) -> Self {
        Self {
            channel_id,
            sequence,
            status: E_NO_ERROR,
        }
    }

    /// Decode from the start of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("connection_header", data, Self::SIZE)?;
        if usize::from(data[0]) != Self::SIZE {
            return Err(KnxError::out_of_range(
                "connection_header.length",
                Self::SIZE,
                Self::SIZE,
                usize::from(data[0]),
                &data[..Self::SIZE],
            ));
        }

        Ok(Self {
            channel_id: data[1],
            sequence: data[2],
            status: data[3],
        })
    }

    /// Append the encoded header to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[Self::SIZE as u8, self.channel_id, self.sequence, self.status]);
    }
}

/// `TUNNELING_REQUEST` service (0x0420)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingRequest {
    /// Connection header
    pub header: ConnectionHeader,
    /// Carried cEMI frame
    pub cemi: CemiFrame,
}

impl TunnelingRequest {
    /// Create a new tunneling request
    pub const fn new(channel_id: u8, sequence: u8, cemi: CemiFrame) -> Self {
        Self {
            header: ConnectionHeader::new(channel_id, sequence),
            cemi,
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = ConnectionHeader::decode(data)?;
        let cemi = CemiFrame::decode(&data[ConnectionHeader::SIZE..])?;
        Ok(Self { header, cemi })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.header.encode_into(buf);
        buf.extend_from_slice(&self.cemi.encode()?);
        Ok(())
    }
}

/// `TUNNELING_ACK` service (0x0421)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelingAck {
    /// Connection header with the acknowledged sequence and status
    pub header: ConnectionHeader,
}

impl TunnelingAck {
    /// Ack for `sequence` with `status`
    pub const fn new(channel_id: u8, sequence: u8, status: u8) -> Self {
        Self {
            header: ConnectionHeader {
                channel_id,
                sequence,
                status,
            },
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != ConnectionHeader::SIZE {
            return Err(KnxError::out_of_range(
                "tunneling_ack",
                ConnectionHeader::SIZE,
                ConnectionHeader::SIZE,
                data.len(),
                data,
            ));
        }
        Ok(Self {
            header: ConnectionHeader::decode(data)?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
    }

    /// Check if the gateway accepted the request
    pub const fn is_ok(&self) -> bool {
        self.header.status == E_NO_ERROR
    }
}

/// `ROUTING_INDICATION` service (0x0530)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingIndication {
    /// Carried cEMI frame
    pub cemi: CemiFrame,
}

impl RoutingIndication {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(Self {
            cemi: CemiFrame::decode(data)?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.cemi.encode()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::GroupAddress;

    #[test]
    fn test_tunneling_request_body() {
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        let request = TunnelingRequest::new(0x15, 5, CemiFrame::group_write(ga, &[0x00]).unwrap());

        let mut body = Vec::new();
        request.encode_into(&mut body).unwrap();
        assert_eq!(&body[..4], &[0x04, 0x15, 0x05, 0x00]);
        assert_eq!(TunnelingRequest::decode(&body).unwrap(), request);
    }

    #[test]
    fn test_tunneling_ack_is_four_bytes() {
        let ack = TunnelingAck::new(0x15, 5, 0x29);
        let mut body = Vec::new();
        ack.encode_into(&mut body);
        assert_eq!(body, [0x04, 0x15, 0x05, 0x29]);

        let decoded = TunnelingAck::decode(&body).unwrap();
        assert!(!decoded.is_ok());
        assert_eq!(decoded.header.sequence, 5);

        assert!(TunnelingAck::decode(&[0x04, 0x15, 0x05, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_connection_header_bad_length() {
        let err = ConnectionHeader::decode(&[0x05, 0x01, 0x02, 0x00]).unwrap_err();
        assert!(matches!(err, KnxError::Frame(ref e) if e.field() == "connection_header.length"));
    }
}
