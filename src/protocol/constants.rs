//! KNXnet/IP protocol constants and service type identifiers.

use std::net::Ipv4Addr;

/// KNXnet/IP protocol version 1.0
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 bytes)
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP port for KNXnet/IP communication
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// Maximum size of a KNXnet/IP frame we read or write
pub const MAX_FRAME_SIZE: usize = 512;

/// KNXnet/IP multicast address for search and routing
pub const KNXNETIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// KNXnet/IP service type identifiers handled by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServiceType {
    /// `SEARCH_REQUEST` - Device discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - Device discovery response
    SearchResponse = 0x0202,
    /// `DESCRIPTION_REQUEST` - Device description request
    DescriptionRequest = 0x0203,
    /// `DESCRIPTION_RESPONSE` - Device description response
    DescriptionResponse = 0x0204,
    /// `CONNECT_REQUEST` - Connection request
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE` - Connection response
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - Connection state request (heartbeat)
    ConnectionStateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE` - Connection state response
    ConnectionStateResponse = 0x0208,
    /// `DISCONNECT_REQUEST` - Disconnect request
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE` - Disconnect response
    DisconnectResponse = 0x020A,
    /// `TUNNELING_REQUEST` - Tunneling data request
    TunnelingRequest = 0x0420,
    /// `TUNNELING_ACK` - Tunneling acknowledgement
    TunnelingAck = 0x0421,
    /// `ROUTING_INDICATION` - Routing indication (multicast)
    RoutingIndication = 0x0530,
}

impl ServiceType {
    /// Convert a u16 to `ServiceType`
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0203 => Some(Self::DescriptionRequest),
            0x0204 => Some(Self::DescriptionResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionStateRequest),
            0x0208 => Some(Self::ConnectionStateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x0420 => Some(Self::TunnelingRequest),
            0x0421 => Some(Self::TunnelingAck),
            0x0530 => Some(Self::RoutingIndication),
            _ => None,
        }
    }

    /// Convert `ServiceType` to u16
    pub const fn to_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Service Families (DIB_SUPP_SVC_FAMILIES)
// =============================================================================

/// Service family advertised in a description/search response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceFamily {
    /// KNXnet/IP Core
    Core,
    /// Device management
    DeviceManagement,
    /// Tunneling
    Tunneling,
    /// Routing
    Routing,
    /// Remote logging
    RemoteLogging,
    /// Remote configuration and diagnosis
    RemoteConfiguration,
    /// Object server
    ObjectServer,
    /// Family id not known to this crate, kept verbatim
    Unknown(u8),
}

impl ServiceFamily {
    /// Convert the family id octet
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x02 => Self::Core,
            0x03 => Self::DeviceManagement,
            0x04 => Self::Tunneling,
            0x05 => Self::Routing,
            0x06 => Self::RemoteLogging,
            0x07 => Self::RemoteConfiguration,
            0x08 => Self::ObjectServer,
            other => Self::Unknown(other),
        }
    }

    /// Family id octet
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Core => 0x02,
            Self::DeviceManagement => 0x03,
            Self::Tunneling => 0x04,
            Self::Routing => 0x05,
            Self::RemoteLogging => 0x06,
            Self::RemoteConfiguration => 0x07,
            Self::ObjectServer => 0x08,
            Self::Unknown(other) => other,
        }
    }
}

// =============================================================================
// Connection Type / Layer Codes
// =============================================================================

/// Connection type for `TUNNEL_CONNECTION`
pub const TUNNEL_CONNECTION: u8 = 0x04;

/// Tunneling on the data link layer
pub const TUNNEL_LINKLAYER: u8 = 0x02;

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP protocol
pub const IPV4_UDP: u8 = 0x01;

/// IPv4 TCP protocol
pub const IPV4_TCP: u8 = 0x02;

// =============================================================================
// Description Information Block Types
// =============================================================================

/// `DEVICE_INFO` DIB
pub const DIB_DEVICE_INFO: u8 = 0x01;

/// `SUPP_SVC_FAMILIES` DIB
pub const DIB_SUPP_SVC_FAMILIES: u8 = 0x02;

// =============================================================================
// Status Codes
// =============================================================================

/// Successful operation
pub const E_NO_ERROR: u8 = 0x00;

/// Unknown or invalid communication channel id
pub const E_CONNECTION_ID: u8 = 0x21;

/// Connection type not supported
pub const E_CONNECTION_TYPE: u8 = 0x22;

/// Connection option not supported
pub const E_CONNECTION_OPTION: u8 = 0x23;

/// No more connections available
pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;

/// Error in the data connection
pub const E_DATA_CONNECTION: u8 = 0x26;

/// Error in the KNX subnetwork connection
pub const E_KNX_CONNECTION: u8 = 0x27;

/// Tunneling layer not supported
pub const E_TUNNELLING_LAYER: u8 = 0x29;

// =============================================================================
// cEMI Message Codes
// =============================================================================

/// cEMI message codes for `L_Data` services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CEMIMessageCode {
    /// `L_Data.req` - Data request
    LDataReq = 0x11,
    /// `L_Data.con` - Data confirmation
    LDataCon = 0x2E,
    /// `L_Data.ind` - Data indication
    LDataInd = 0x29,
}

impl CEMIMessageCode {
    /// Convert u8 to `CEMIMessageCode`
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x11 => Some(Self::LDataReq),
            0x2E => Some(Self::LDataCon),
            0x29 => Some(Self::LDataInd),
            _ => None,
        }
    }

    /// Convert `CEMIMessageCode` to u8
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// KNX Priority
// =============================================================================

/// KNX message priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Priority {
    /// System priority
    System = 0b00,
    /// Normal priority
    Normal = 0b01,
    /// Urgent priority
    Urgent = 0b10,
    /// Low priority (default for group communication)
    #[default]
    Low = 0b11,
}

impl Priority {
    /// Convert the two priority bits
    pub const fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::System,
            0b01 => Self::Normal,
            0b10 => Self::Urgent,
            _ => Self::Low,
        }
    }

    /// Convert Priority to its two bits
    pub const fn to_bits(self) -> u8 {
        self as u8
    }
}
