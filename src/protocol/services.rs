//! KNXnet/IP core service bodies.
//!
//! Each body decodes from the bytes following the KNXnet/IP header and
//! encodes back to exactly the same bytes. Headers are added by
//! [`Body::encode`](crate::protocol::Body::encode).
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- SEARCH_REQUEST -------->|  (multicast, only without gateway)
//!   |<------ SEARCH_RESPONSE --------|
//!   |                                |
//!   |---- DESCRIPTION_REQUEST ------>|
//!   |<--- DESCRIPTION_RESPONSE ------|
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use std::net::Ipv4Addr;

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{
    ServiceFamily, DIB_DEVICE_INFO, DIB_SUPP_SVC_FAMILIES, E_NO_ERROR, TUNNEL_CONNECTION,
    TUNNEL_LINKLAYER,
};
use crate::protocol::frame::{require_len, Hpai};

/// Fail unless `data` is exactly `len` bytes long.
fn require_exact(field: &'static str, data: &[u8], len: usize) -> Result<()> {
    if data.len() != len {
        return Err(KnxError::out_of_range(field, len, len, data.len(), data));
    }
    Ok(())
}

// =============================================================================
// Connection Request Information / Connection Response Data
// =============================================================================

/// Connection Request Information (CRI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequestInfo {
    /// Connection type (`TUNNEL_CONNECTION` = 0x04)
    pub connection_type: u8,
    /// KNX layer (`TUNNEL_LINKLAYER` = 0x02)
    pub knx_layer: u8,
}

impl ConnectionRequestInfo {
    /// Size of a tunnel CRI
    pub const SIZE: usize = 4;

    /// CRI for a tunnel link layer connection
    pub const fn tunnel_link_layer() -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            knx_layer: TUNNEL_LINKLAYER,
        }
    }

    /// Decode CRI from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_exact("cri", data, Self::SIZE)?;
        if usize::from(data[0]) != Self::SIZE {
            return Err(KnxError::out_of_range(
                "cri.length",
                Self::SIZE,
                Self::SIZE,
                usize::from(data[0]),
                data,
            ));
        }

        Ok(Self {
            connection_type: data[1],
            knx_layer: data[2],
        })
    }

    /// Append the encoded CRI to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[Self::SIZE as u8, self.connection_type, self.knx_layer, 0x00]);
    }
}

/// Connection Response Data (CRD)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponseData {
    /// Connection type echoed by the gateway
    pub connection_type: u8,
    /// Individual address assigned to the tunnel (tunnel CRDs only)
    pub individual_address: Option<IndividualAddress>,
}

impl ConnectionResponseData {
    /// CRD for a tunnel connection with the assigned address
    pub const fn tunnel(individual_address: IndividualAddress) -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            individual_address: Some(individual_address),
        }
    }

    /// Decode CRD from bytes (2 or 4 bytes)
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("crd", data, 2)?;
        let length = usize::from(data[0]);
        if data.len() != length || !(length == 2 || length == 4) {
            return Err(KnxError::out_of_range("crd.length", 2, 4, length, data));
        }

        let individual_address =
            (length == 4).then(|| IndividualAddress::from_bytes([data[2], data[3]]));

        Ok(Self {
            connection_type: data[1],
            individual_address,
        })
    }

    /// Append the encoded CRD to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self.individual_address {
            Some(address) => {
                buf.extend_from_slice(&[4, self.connection_type]);
                buf.extend_from_slice(&address.to_bytes());
            }
            None => buf.extend_from_slice(&[2, self.connection_type]),
        }
    }
}

// =============================================================================
// Description Information Blocks
// =============================================================================

/// Device hardware DIB (54 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// KNX medium code
    pub medium: u8,
    /// Device status (bit 0: programming mode)
    pub device_status: u8,
    /// Individual address of the gateway
    pub individual_address: IndividualAddress,
    /// Project-installation identifier
    pub project_installation_id: u16,
    /// KNX serial number
    pub serial_number: [u8; 6],
    /// Routing multicast address
    pub multicast_address: Ipv4Addr,
    /// MAC address
    pub mac_address: [u8; 6],
    /// Friendly name, NUL padded
    pub friendly_name: [u8; 30],
}

impl DeviceInfo {
    /// Size of the device hardware DIB
    pub const SIZE: usize = 0x36;

    fn decode(data: &[u8]) -> Result<Self> {
        require_exact("dib.device_info", data, Self::SIZE)?;

        let mut serial_number = [0u8; 6];
        serial_number.copy_from_slice(&data[8..14]);
        let mut mac_address = [0u8; 6];
        mac_address.copy_from_slice(&data[18..24]);
        let mut friendly_name = [0u8; 30];
        friendly_name.copy_from_slice(&data[24..54]);

        Ok(Self {
            medium: data[2],
            device_status: data[3],
            individual_address: IndividualAddress::from_bytes([data[4], data[5]]),
            project_installation_id: u16::from_be_bytes([data[6], data[7]]),
            serial_number,
            multicast_address: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            mac_address,
            friendly_name,
        })
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(Self::SIZE as u8);
        buf.push(DIB_DEVICE_INFO);
        buf.push(self.medium);
        buf.push(self.device_status);
        buf.extend_from_slice(&self.individual_address.to_bytes());
        buf.extend_from_slice(&self.project_installation_id.to_be_bytes());
        buf.extend_from_slice(&self.serial_number);
        buf.extend_from_slice(&self.multicast_address.octets());
        buf.extend_from_slice(&self.mac_address);
        buf.extend_from_slice(&self.friendly_name);
    }

    /// Friendly name up to the first NUL
    pub fn name(&self) -> String {
        let end = self
            .friendly_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.friendly_name.len());
        String::from_utf8_lossy(&self.friendly_name[..end]).into_owned()
    }
}

/// Description Information Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dib {
    /// Device hardware information
    DeviceInfo(DeviceInfo),
    /// Supported service families with their versions
    SupportedServiceFamilies(Vec<(ServiceFamily, u8)>),
    /// Any other DIB, kept verbatim including its length and type octets
    Unknown(Vec<u8>),
}

impl Dib {
    /// Decode a sequence of DIBs filling `data` completely
    ///
    /// # Errors
    ///
    /// Returns a frame error if a DIB length is below 2 or runs past the end.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>> {
        let mut dibs = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            require_len("dib", rest, 2)?;
            let length = usize::from(rest[0]);
            if length < 2 || length > rest.len() {
                return Err(KnxError::out_of_range("dib.length", 2, rest.len(), length, rest));
            }

            let (dib, tail) = rest.split_at(length);
            dibs.push(Self::decode(dib)?);
            rest = tail;
        }

        Ok(dibs)
    }

    fn decode(dib: &[u8]) -> Result<Self> {
        match dib[1] {
            DIB_DEVICE_INFO => DeviceInfo::decode(dib).map(Self::DeviceInfo),
            DIB_SUPP_SVC_FAMILIES => {
                if dib.len() % 2 != 0 {
                    return Err(KnxError::illegal_argument(
                        "dib.service_families",
                        "odd length",
                        dib,
                    ));
                }
                let families = dib[2..]
                    .chunks_exact(2)
                    .map(|pair| (ServiceFamily::from_u8(pair[0]), pair[1]))
                    .collect();
                Ok(Self::SupportedServiceFamilies(families))
            }
            _ => Ok(Self::Unknown(dib.to_vec())),
        }
    }

    /// Append the encoded DIB to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::DeviceInfo(info) => info.encode_into(buf),
            Self::SupportedServiceFamilies(families) => {
                // families come from a u8 length field or the caller's short list
                buf.push((2 + families.len() * 2) as u8);
                buf.push(DIB_SUPP_SVC_FAMILIES);
                for (family, version) in families {
                    buf.push(family.to_u8());
                    buf.push(*version);
                }
            }
            Self::Unknown(raw) => buf.extend_from_slice(raw),
        }
    }
}

/// Read-only queries over a DIB list
pub trait DeviceDescription {
    /// All DIBs in wire order
    fn dibs(&self) -> &[Dib];

    /// Device hardware DIB, if present
    fn device_info(&self) -> Option<&DeviceInfo> {
        self.dibs().iter().find_map(|dib| match dib {
            Dib::DeviceInfo(info) => Some(info),
            _ => None,
        })
    }

    /// Check if the device advertises `family`
    fn supports(&self, family: ServiceFamily) -> bool {
        self.dibs().iter().any(|dib| match dib {
            Dib::SupportedServiceFamilies(families) => families.iter().any(|(f, _)| *f == family),
            _ => false,
        })
    }
}

// =============================================================================
// Search / Description
// =============================================================================

/// `SEARCH_REQUEST` service (0x0201)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    /// Endpoint the responses are sent to
    pub discovery_endpoint: Hpai,
}

impl SearchRequest {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_exact("search_request", data, Hpai::SIZE)?;
        Ok(Self {
            discovery_endpoint: Hpai::decode(data)?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.discovery_endpoint.encode_into(buf);
    }
}

/// `SEARCH_RESPONSE` service (0x0202)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    /// Control endpoint of the responding gateway
    pub control_endpoint: Hpai,
    /// Device hardware, service families and any further DIBs
    pub dibs: Vec<Dib>,
}

impl SearchResponse {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let control_endpoint = Hpai::decode(data)?;
        Ok(Self {
            control_endpoint,
            dibs: Dib::decode_all(&data[Hpai::SIZE..])?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.control_endpoint.encode_into(buf);
        for dib in &self.dibs {
            dib.encode_into(buf);
        }
    }
}

impl DeviceDescription for SearchResponse {
    fn dibs(&self) -> &[Dib] {
        &self.dibs
    }
}

/// `DESCRIPTION_REQUEST` service (0x0203)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptionRequest {
    /// Control endpoint the response is sent to
    pub control_endpoint: Hpai,
}

impl DescriptionRequest {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_exact("description_request", data, Hpai::SIZE)?;
        Ok(Self {
            control_endpoint: Hpai::decode(data)?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.control_endpoint.encode_into(buf);
    }
}

/// `DESCRIPTION_RESPONSE` service (0x0204)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionResponse {
    /// Device hardware, service families and any further DIBs
    pub dibs: Vec<Dib>,
}

impl DescriptionResponse {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(Self {
            dibs: Dib::decode_all(data)?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        for dib in &self.dibs {
            dib.encode_into(buf);
        }
    }
}

impl DeviceDescription for DescriptionResponse {
    fn dibs(&self) -> &[Dib] {
        &self.dibs
    }
}

// =============================================================================
// Connect
// =============================================================================

/// `CONNECT_REQUEST` service (0x0205)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Control endpoint (for connection management)
    pub control_endpoint: Hpai,
    /// Data endpoint (for tunneling data)
    pub data_endpoint: Hpai,
    /// Connection request information
    pub cri: ConnectionRequestInfo,
}

impl ConnectRequest {
    const SIZE: usize = 2 * Hpai::SIZE + ConnectionRequestInfo::SIZE;

    /// Create a new tunnel `CONNECT_REQUEST`
    pub const fn new(control_endpoint: Hpai, data_endpoint: Hpai) -> Self {
        Self {
            control_endpoint,
            data_endpoint,
            cri: ConnectionRequestInfo::tunnel_link_layer(),
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_exact("connect_request", data, Self::SIZE)?;
        Ok(Self {
            control_endpoint: Hpai::decode(&data[..8])?,
            data_endpoint: Hpai::decode(&data[8..16])?,
            cri: ConnectionRequestInfo::decode(&data[16..])?,
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.control_endpoint.encode_into(buf);
        self.data_endpoint.encode_into(buf);
        self.cri.encode_into(buf);
    }
}

/// `CONNECT_RESPONSE` service (0x0206)
///
/// A refusal carries only channel id and status; the endpoint and CRD are
/// present only on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
    /// Data endpoint assigned by server
    pub data_endpoint: Option<Hpai>,
    /// Connection response data
    pub crd: Option<ConnectionResponseData>,
}

impl ConnectResponse {
    /// Successful tunnel response
    pub const fn accepted(channel_id: u8, data_endpoint: Hpai, address: IndividualAddress) -> Self {
        Self {
            channel_id,
            status: E_NO_ERROR,
            data_endpoint: Some(data_endpoint),
            crd: Some(ConnectionResponseData::tunnel(address)),
        }
    }

    /// Refusal with a non-zero status
    pub const fn refused(status: u8) -> Self {
        Self {
            channel_id: 0,
            status,
            data_endpoint: None,
            crd: None,
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("connect_response", data, 2)?;
        let channel_id = data[0];
        let status = data[1];

        if data.len() == 2 {
            return Ok(Self {
                channel_id,
                status,
                data_endpoint: None,
                crd: None,
            });
        }

        require_len("connect_response", data, 2 + Hpai::SIZE + 2)?;
        Ok(Self {
            channel_id,
            status,
            data_endpoint: Some(Hpai::decode(&data[2..10])?),
            crd: Some(ConnectionResponseData::decode(&data[10..])?),
        })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.channel_id);
        buf.push(self.status);
        if let (Some(endpoint), Some(crd)) = (&self.data_endpoint, &self.crd) {
            endpoint.encode_into(buf);
            crd.encode_into(buf);
        }
    }

    /// Check if connection was successful
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

// =============================================================================
// Connection state / Disconnect
// =============================================================================

/// Decode `channel, reserved, HPAI`
fn decode_channel_request(field: &'static str, data: &[u8]) -> Result<(u8, Hpai)> {
    require_exact(field, data, 2 + Hpai::SIZE)?;
    Ok((data[0], Hpai::decode(&data[2..])?))
}

/// Decode `channel, status`
fn decode_channel_status(field: &'static str, data: &[u8]) -> Result<(u8, u8)> {
    require_exact(field, data, 2)?;
    Ok((data[0], data[1]))
}

/// `CONNECTIONSTATE_REQUEST` service (0x0207)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint
    pub control_endpoint: Hpai,
}

impl ConnectionStateRequest {
    /// Create a new `CONNECTIONSTATE_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (channel_id, control_endpoint) =
            decode_channel_request("connectionstate_request", data)?;
        Ok(Self::new(channel_id, control_endpoint))
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.channel_id);
        buf.push(0x00);
        self.control_endpoint.encode_into(buf);
    }
}

/// `CONNECTIONSTATE_RESPONSE` service (0x0208)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl ConnectionStateResponse {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (channel_id, status) = decode_channel_status("connectionstate_response", data)?;
        Ok(Self { channel_id, status })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[self.channel_id, self.status]);
    }

    /// Check if connection is still alive
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

/// `DISCONNECT_REQUEST` service (0x0209)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectRequest {
    /// Communication channel ID
    pub channel_id: u8,
    /// Control endpoint
    pub control_endpoint: Hpai,
}

impl DisconnectRequest {
    /// Create a new `DISCONNECT_REQUEST`
    pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
        Self {
            channel_id,
            control_endpoint,
        }
    }

    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (channel_id, control_endpoint) = decode_channel_request("disconnect_request", data)?;
        Ok(Self::new(channel_id, control_endpoint))
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.channel_id);
        buf.push(0x00);
        self.control_endpoint.encode_into(buf);
    }
}

/// `DISCONNECT_RESPONSE` service (0x020A)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectResponse {
    /// Communication channel ID
    pub channel_id: u8,
    /// Status code (0 = OK)
    pub status: u8,
}

impl DisconnectResponse {
    /// Decode from frame body
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (channel_id, status) = decode_channel_status("disconnect_response", data)?;
        Ok(Self { channel_id, status })
    }

    /// Append the encoded body to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[self.channel_id, self.status]);
    }

    /// Check if disconnect was acknowledged
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}
