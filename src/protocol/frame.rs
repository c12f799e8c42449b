//! KNXnet/IP frame header, frame view and HPAI.
//!
//! ## Frame Structure
//!
//! All KNXnet/IP frames follow this structure:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! Decoding is strict: a datagram whose total length field disagrees with the
//! number of bytes received is rejected, naming the field and the bytes.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceType, HEADER_SIZE_10, IPV4_TCP, IPV4_UDP, KNXNETIP_VERSION_10, MAX_FRAME_SIZE,
};

/// Fail with `OutOfRange` unless `data` holds at least `min` bytes.
#[inline]
pub(crate) fn require_len(field: &'static str, data: &[u8], min: usize) -> Result<()> {
    if data.len() < min {
        return Err(KnxError::out_of_range(field, min, MAX_FRAME_SIZE, data.len(), data));
    }
    Ok(())
}

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxnetIpHeader {
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header for a body of `body_length` bytes
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Decode a header from the start of a byte slice
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is shorter than 6 bytes
    /// - Header length is not 0x06
    /// - Protocol version is not 0x10
    /// - Service type is unknown
    /// - Total length is smaller than the header itself
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("header", data, Self::SIZE)?;
        let bytes = &data[..Self::SIZE];

        if bytes[0] != HEADER_SIZE_10 {
            return Err(KnxError::illegal_argument(
                "header_length",
                "expected 0x06",
                bytes,
            ));
        }

        if bytes[1] != KNXNETIP_VERSION_10 {
            return Err(KnxError::unsupported_version(bytes[1]));
        }

        let service_type_raw = u16::from_be_bytes([bytes[2], bytes[3]]);
        let service_type = ServiceType::from_u16(service_type_raw)
            .ok_or_else(|| KnxError::unsupported_service_type(service_type_raw))?;

        let total_length = u16::from_be_bytes([bytes[4], bytes[5]]);
        if usize::from(total_length) < Self::SIZE {
            return Err(KnxError::out_of_range(
                "total_length",
                Self::SIZE,
                MAX_FRAME_SIZE,
                usize::from(total_length),
                bytes,
            ));
        }

        Ok(Self {
            service_type,
            total_length,
        })
    }

    /// Append the encoded header to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(HEADER_SIZE_10);
        buf.push(KNXNETIP_VERSION_10);
        buf.extend_from_slice(&self.service_type.to_u16().to_be_bytes());
        buf.extend_from_slice(&self.total_length.to_be_bytes());
    }

    /// Get the expected body length from the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Borrowed view of one complete KNXnet/IP datagram
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    data: &'a [u8],
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a datagram, requiring the total length field to match exactly
    ///
    /// # Errors
    ///
    /// Returns a frame error if the header is invalid or the datagram length
    /// differs from the total length field.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::decode(data)?;

        let total = usize::from(header.total_length);
        if data.len() != total {
            return Err(KnxError::out_of_range(
                "total_length",
                data.len(),
                data.len(),
                total,
                data,
            ));
        }

        Ok(Self { data, header })
    }

    /// Get the frame header
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Get the service type
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// Body bytes after the header
    pub fn body(&self) -> &'a [u8] {
        &self.data[KnxnetIpHeader::SIZE..]
    }

    /// The complete datagram including header
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// Builder for creating KNXnet/IP frames
///
/// Prefixes a body with a header whose total length matches.
#[derive(Debug)]
pub struct FrameBuilder<'a> {
    service_type: ServiceType,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    /// Create a new frame builder
    pub const fn new(service_type: ServiceType, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Build the datagram
    ///
    /// # Errors
    ///
    /// Returns an out-of-range frame error if the datagram would exceed
    /// the maximum frame size.
    pub fn build(&self) -> Result<Vec<u8>> {
        let total_size = self.size();
        if total_size > MAX_FRAME_SIZE {
            return Err(KnxError::out_of_range(
                "total_length",
                KnxnetIpHeader::SIZE,
                MAX_FRAME_SIZE,
                total_size,
                self.body,
            ));
        }

        let mut buf = Vec::with_capacity(total_size);
        // total_size <= MAX_FRAME_SIZE, fits in u16
        KnxnetIpHeader::new(self.service_type, self.body.len() as u16).encode_into(&mut buf);
        buf.extend_from_slice(self.body);
        Ok(buf)
    }

    /// Calculate the total frame size
    pub const fn size(&self) -> usize {
        KnxnetIpHeader::SIZE + self.body.len()
    }
}

/// Host protocol carried in an HPAI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProtocol {
    /// IPv4 over UDP
    Udp,
    /// IPv4 over TCP
    Tcp,
}

impl HostProtocol {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            IPV4_UDP => Some(Self::Udp),
            IPV4_TCP => Some(Self::Tcp),
            _ => None,
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Udp => IPV4_UDP,
            Self::Tcp => IPV4_TCP,
        }
    }
}

/// Host Protocol Address Information (HPAI)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
///
/// `0.0.0.0:0` is the NAT form: the gateway answers to the datagram source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    /// Host protocol code
    pub protocol: HostProtocol,
    /// IPv4 endpoint
    pub endpoint: SocketAddrV4,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(endpoint: SocketAddrV4) -> Self {
        Self {
            protocol: HostProtocol::Udp,
            endpoint,
        }
    }

    /// The NAT route-back HPAI (`0.0.0.0:0`)
    pub const fn nat() -> Self {
        Self::new(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
    }

    /// Check if this HPAI asks the peer to answer to the datagram source
    pub fn is_nat(&self) -> bool {
        self.endpoint.ip().is_unspecified() && self.endpoint.port() == 0
    }

    /// Decode an HPAI from the start of `data`
    ///
    /// # Errors
    ///
    /// Returns a frame error if fewer than 8 bytes are present, the structure
    /// length is not 8 or the host protocol is unknown.
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("hpai", data, Self::SIZE)?;
        let bytes = &data[..Self::SIZE];

        if usize::from(bytes[0]) != Self::SIZE {
            return Err(KnxError::out_of_range(
                "hpai.structure_length",
                Self::SIZE,
                Self::SIZE,
                usize::from(bytes[0]),
                bytes,
            ));
        }

        let protocol = HostProtocol::from_u8(bytes[1]).ok_or_else(|| {
            KnxError::illegal_argument("hpai.host_protocol", "unknown host protocol", bytes)
        })?;

        let ip = Ipv4Addr::new(bytes[2], bytes[3], bytes[4], bytes[5]);
        let port = u16::from_be_bytes([bytes[6], bytes[7]]);

        Ok(Self {
            protocol,
            endpoint: SocketAddrV4::new(ip, port),
        })
    }

    /// Append the encoded HPAI to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(Self::SIZE as u8);
        buf.push(self.protocol.to_u8());
        buf.extend_from_slice(&self.endpoint.ip().octets());
        buf.extend_from_slice(&self.endpoint.port().to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_decode() {
        let data = [
            0x06, // header length
            0x10, // protocol version
            0x02, 0x01, // service type (SEARCH_REQUEST)
            0x00, 0x0E, // total length (14 bytes)
        ];

        let header = KnxnetIpHeader::decode(&data).unwrap();
        assert_eq!(header.service_type, ServiceType::SearchRequest);
        assert_eq!(header.total_length, 14);
        assert_eq!(header.body_length(), 8);
    }

    #[test]
    fn test_header_rejects_bad_fields() {
        let err = KnxnetIpHeader::decode(&[0x05, 0x10, 0x02, 0x01, 0x00, 0x06]).unwrap_err();
        match err {
            KnxError::Frame(e) => {
                assert_eq!(e.field(), "header_length");
                assert_eq!(e.bytes(), &[0x05, 0x10, 0x02, 0x01, 0x00, 0x06]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(matches!(
            KnxnetIpHeader::decode(&[0x06, 0x20, 0x02, 0x01, 0x00, 0x06]),
            Err(KnxError::Protocol(_))
        ));
        assert!(matches!(
            KnxnetIpHeader::decode(&[0x06, 0x10, 0x09, 0x99, 0x00, 0x06]),
            Err(KnxError::Protocol(e)) if e.is_unsupported_service_type()
        ));
        assert!(KnxnetIpHeader::decode(&[0x06, 0x10]).unwrap_err().is_frame_error());
    }

    #[test]
    fn test_frame_builder() {
        let body = [0x01, 0x02, 0x03, 0x04];
        let buf = FrameBuilder::new(ServiceType::SearchRequest, &body)
            .build()
            .unwrap();

        assert_eq!(buf.len(), 10); // 6 (header) + 4 (body)
        assert_eq!(&buf[..6], &[0x06, 0x10, 0x02, 0x01, 0x00, 0x0A]);
        assert_eq!(&buf[6..], &body);
    }

    #[test]
    fn test_frame_parse_requires_exact_length() {
        let data = [
            0x06, 0x10, // header
            0x02, 0x01, // SEARCH_REQUEST
            0x00, 0x0A, // total length = 10
            0x01, 0x02, 0x03, 0x04, // body
        ];

        let frame = KnxnetIpFrame::parse(&data).unwrap();
        assert_eq!(frame.service_type(), ServiceType::SearchRequest);
        assert_eq!(frame.body(), &[0x01, 0x02, 0x03, 0x04]);

        let err = KnxnetIpFrame::parse(&data[..9]).unwrap_err();
        assert!(matches!(err, KnxError::Frame(ref e) if e.field() == "total_length" && e.is_out_of_range()));
    }

    #[test]
    fn test_hpai_roundtrip() {
        let data = [
            0x08, // structure length
            0x01, // IPv4 UDP
            192, 168, 1, 100, // IP address
            0x0E, 0x57, // port 3671
        ];

        let hpai = Hpai::decode(&data).unwrap();
        assert_eq!(hpai.endpoint, "192.168.1.100:3671".parse().unwrap());
        assert!(!hpai.is_nat());

        let mut buf = Vec::new();
        hpai.encode_into(&mut buf);
        assert_eq!(buf, data);
    }

    #[test]
    fn test_hpai_nat() {
        let mut buf = Vec::new();
        Hpai::nat().encode_into(&mut buf);
        assert_eq!(buf, [0x08, 0x01, 0, 0, 0, 0, 0, 0]);
        assert!(Hpai::decode(&buf).unwrap().is_nat());
    }

    #[test]
    fn test_hpai_invalid_length() {
        let err = Hpai::decode(&[0x07, 0x01, 1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(matches!(err, KnxError::Frame(ref e) if e.field() == "hpai.structure_length"));
    }
}
