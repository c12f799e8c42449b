//! Common External Message Interface (cEMI) implementation.
//!
//! cEMI is the application frame carried inside tunneling requests and
//! routing indications. This module decodes and encodes `L_Data` frames and
//! builds the group value services the client sends.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info (variable)               │
//! ├──────────────────────────────────────────┤
//! │ Service Information (L_Data)             │
//! │  ├─ Control Field 1 (1 byte)             │
//! │  ├─ Control Field 2 (1 byte)             │
//! │  ├─ Source Address (2 bytes)             │
//! │  ├─ Destination Address (2 bytes)        │
//! │  ├─ NPDU Length (1 byte)                 │
//! │  ├─ TPCI/APCI (1-2 bytes)                │
//! │  └─ Data (variable)                      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The NPDU length counts the octets following the TPCI octet. Values of six
//! bits or less may travel inside the APCI octet ([`Payload::Embedded`]),
//! everything else follows it ([`Payload::Appended`]).
//!
//! ## Example
//!
//! ```
//! use knx_link::protocol::cemi::{CemiFrame, Payload};
//! use knx_link::GroupAddress;
//!
//! let ga = GroupAddress::new(1, 2, 3).unwrap();
//! let frame = CemiFrame::group_write(ga, &[0x01]).unwrap();
//! assert_eq!(frame.payload, Payload::Embedded(0x01));
//!
//! let bytes = frame.encode().unwrap();
//! assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
//! ```

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::constants::{CEMIMessageCode, Priority};
use crate::protocol::frame::require_len;

/// Control Field 1 of `L_Data` frame
///
/// ```text
/// Bit 7: Frame Type (0=extended, 1=standard)
/// Bit 6: Reserved
/// Bit 5: Repeat (0=repeat, 1=do not repeat)
/// Bit 4: System Broadcast (0=system, 1=broadcast)
/// Bit 3-2: Priority (00=system, 01=normal, 10=urgent, 11=low)
/// Bit 1: Acknowledge Request (0=no ack, 1=ack requested)
/// Bit 0: Confirm (0=no error, 1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField1 {
    raw: u8,
}

impl From<u8> for ControlField1 {
    #[inline]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField1> for u8 {
    #[inline]
    fn from(ctrl: ControlField1) -> u8 {
        ctrl.raw
    }
}

impl ControlField1 {
    /// Get raw byte value
    #[inline]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Check if frame is standard (true) or extended (false)
    #[inline]
    pub const fn is_standard_frame(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Check if repeat flag is set (do not repeat if true)
    #[inline]
    pub const fn do_not_repeat(self) -> bool {
        (self.raw & 0x20) != 0
    }

    /// Check if this is a broadcast
    #[inline]
    pub const fn is_broadcast(self) -> bool {
        (self.raw & 0x10) != 0
    }

    /// Get priority
    #[inline]
    pub const fn priority(self) -> Priority {
        Priority::from_bits(self.raw >> 2)
    }

    /// Check if acknowledge is requested
    #[inline]
    pub const fn ack_requested(self) -> bool {
        (self.raw & 0x02) != 0
    }

    /// Check if confirm error flag is set
    #[inline]
    pub const fn has_error(self) -> bool {
        (self.raw & 0x01) != 0
    }

    /// Create a new Control Field 1
    pub const fn new(
        standard_frame: bool,
        do_not_repeat: bool,
        broadcast: bool,
        priority: Priority,
        ack_requested: bool,
        has_error: bool,
    ) -> Self {
        let mut raw = 0u8;

        if standard_frame {
            raw |= 0x80;
        }
        if do_not_repeat {
            raw |= 0x20;
        }
        if broadcast {
            raw |= 0x10;
        }
        raw |= (priority.to_bits() & 0x03) << 2;
        if ack_requested {
            raw |= 0x02;
        }
        if has_error {
            raw |= 0x01;
        }

        Self { raw }
    }
}

impl Default for ControlField1 {
    /// Standard frame, do not repeat, broadcast, low priority (0xBC)
    #[inline]
    fn default() -> Self {
        Self::new(true, true, true, Priority::Low, false, false)
    }
}

/// Control Field 2 of `L_Data` frame
///
/// ```text
/// Bit 7: Destination Address Type (0=individual, 1=group)
/// Bit 6-4: Hop Count (0-7)
/// Bit 3-0: Extended Frame Format (0000=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField2 {
    raw: u8,
}

impl From<u8> for ControlField2 {
    #[inline]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField2> for u8 {
    #[inline]
    fn from(ctrl: ControlField2) -> u8 {
        ctrl.raw
    }
}

impl ControlField2 {
    /// Get raw byte value
    #[inline]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Check if destination is group address (true) or individual (false)
    #[inline]
    pub const fn is_group_address(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Get hop count (0-7)
    #[inline]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }

    /// Get extended frame format
    #[inline]
    pub const fn extended_format(self) -> u8 {
        self.raw & 0x0F
    }

    /// Create a new Control Field 2
    pub const fn new(is_group: bool, hop_count: u8, extended_format: u8) -> Self {
        let mut raw = 0u8;

        if is_group {
            raw |= 0x80;
        }
        raw |= (hop_count & 0x07) << 4;
        raw |= extended_format & 0x0F;

        Self { raw }
    }
}

impl Default for ControlField2 {
    /// Group address, hop count 6, standard format (0xE0)
    #[inline]
    fn default() -> Self {
        Self::new(true, 6, 0)
    }
}

/// TPCI (Transport Layer Protocol Control Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tpci {
    /// Unnumbered Data Packet
    UnnumberedData,
    /// Numbered Data Packet with sequence number
    NumberedData {
        /// Sequence number (0-15)
        sequence: u8,
    },
    /// Unnumbered Control Packet (connect/disconnect)
    UnnumberedControl {
        /// Control code in bits 1-0
        code: u8,
    },
    /// Numbered Control Packet (ack/nak)
    NumberedControl {
        /// Sequence number (0-15)
        sequence: u8,
        /// Control code in bits 1-0
        code: u8,
    },
}

impl Tpci {
    /// Parse TPCI from the first byte of the TPCI/APCI field
    pub const fn from_byte(byte: u8) -> Self {
        let sequence = (byte >> 2) & 0x0F;
        let code = byte & 0x03;
        match byte >> 6 {
            0b00 => Self::UnnumberedData,
            0b01 => Self::NumberedData { sequence },
            0b10 => Self::UnnumberedControl { code },
            _ => Self::NumberedControl { sequence, code },
        }
    }

    /// TPCI bits of the first octet (APCI bits left clear for data packets)
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::UnnumberedData => 0x00,
            Self::NumberedData { sequence } => 0x40 | ((sequence & 0x0F) << 2),
            Self::UnnumberedControl { code } => 0x80 | (code & 0x03),
            Self::NumberedControl { sequence, code } => {
                0xC0 | ((sequence & 0x0F) << 2) | (code & 0x03)
            }
        }
    }

    /// Check if this is a data packet
    pub const fn is_data(self) -> bool {
        matches!(self, Self::UnnumberedData | Self::NumberedData { .. })
    }
}

/// APCI (Application Layer Protocol Control Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Apci {
    /// Group Value Read (`A_GroupValue_Read`)
    GroupValueRead,
    /// Group Value Response (`A_GroupValue_Response`)
    GroupValueResponse,
    /// Group Value Write (`A_GroupValue_Write`)
    GroupValueWrite,
    /// Individual Address Write
    IndividualAddressWrite,
    /// Individual Address Read
    IndividualAddressRead,
    /// Individual Address Response
    IndividualAddressResponse,
    /// ADC Read
    AdcRead,
    /// ADC Response
    AdcResponse,
    /// Memory Read
    MemoryRead,
    /// Memory Response
    MemoryResponse,
    /// Memory Write
    MemoryWrite,
    /// Device Descriptor Read
    DeviceDescriptorRead,
    /// Device Descriptor Response
    DeviceDescriptorResponse,
    /// Any other 10-bit APCI, kept verbatim
    Unknown(u16),
}

impl Apci {
    /// Map a 10-bit APCI whose low six bits are clear
    pub const fn from_u16(apci: u16) -> Self {
        match apci {
            0x000 => Self::GroupValueRead,
            0x040 => Self::GroupValueResponse,
            0x080 => Self::GroupValueWrite,
            0x0C0 => Self::IndividualAddressWrite,
            0x100 => Self::IndividualAddressRead,
            0x140 => Self::IndividualAddressResponse,
            0x180 => Self::AdcRead,
            0x1C0 => Self::AdcResponse,
            0x200 => Self::MemoryRead,
            0x240 => Self::MemoryResponse,
            0x280 => Self::MemoryWrite,
            0x300 => Self::DeviceDescriptorRead,
            0x340 => Self::DeviceDescriptorResponse,
            _ => Self::Unknown(apci),
        }
    }

    /// Convert APCI to its 10-bit value
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::GroupValueRead => 0x000,
            Self::GroupValueResponse => 0x040,
            Self::GroupValueWrite => 0x080,
            Self::IndividualAddressWrite => 0x0C0,
            Self::IndividualAddressRead => 0x100,
            Self::IndividualAddressResponse => 0x140,
            Self::AdcRead => 0x180,
            Self::AdcResponse => 0x1C0,
            Self::MemoryRead => 0x200,
            Self::MemoryResponse => 0x240,
            Self::MemoryWrite => 0x280,
            Self::DeviceDescriptorRead => 0x300,
            Self::DeviceDescriptorResponse => 0x340,
            Self::Unknown(val) => val,
        }
    }

    /// Check if this APCI carries a group value (write or response)
    pub const fn carries_group_value(self) -> bool {
        matches!(self, Self::GroupValueWrite | Self::GroupValueResponse)
    }
}

/// Application data of a data TPDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Six-bit value carried in the low bits of the APCI octet
    Embedded(u8),
    /// Octets following the APCI octet (may be empty for control TPDUs)
    Appended(Vec<u8>),
}

impl Payload {
    /// Payload as plain bytes (embedded values become a single byte)
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Self::Embedded(value) => vec![*value],
            Self::Appended(data) => data.clone(),
        }
    }

    /// Choose the compact form for small single-byte values
    fn for_value(data: &[u8]) -> Self {
        match data {
            [value] if *value <= 0x3F => Self::Embedded(*value),
            _ => Self::Appended(data.to_vec()),
        }
    }
}

/// Owned cEMI `L_Data` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CemiFrame {
    /// Message code (`L_Data.req`, `.con` or `.ind`)
    pub message_code: CEMIMessageCode,
    /// Raw additional information block
    pub additional_info: Vec<u8>,
    /// Control field 1
    pub ctrl1: ControlField1,
    /// Control field 2
    pub ctrl2: ControlField2,
    /// Source address (individual)
    pub source: IndividualAddress,
    /// Destination address (group or individual, see `ctrl2`)
    pub destination: u16,
    /// TPCI
    pub tpci: Tpci,
    /// APCI, `None` for control TPDUs
    pub apci: Option<Apci>,
    /// Application data
    pub payload: Payload,
}

impl CemiFrame {
    /// Bytes from control field 1 up to and including the TPCI octet
    const LDATA_MIN: usize = 8;

    /// Largest number of octets after the APCI octet
    pub const MAX_APPENDED: usize = 254;

    fn group_service(destination: GroupAddress, apci: Apci, payload: Payload) -> Self {
        Self {
            message_code: CEMIMessageCode::LDataReq,
            additional_info: Vec::new(),
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::default(),
            destination: destination.raw(),
            tpci: Tpci::UnnumberedData,
            apci: Some(apci),
            payload,
        }
    }

    fn checked_value(data: &[u8]) -> Result<Payload> {
        if data.is_empty() || data.len() > Self::MAX_APPENDED {
            return Err(KnxError::out_of_range(
                "data",
                1,
                Self::MAX_APPENDED,
                data.len(),
                data,
            ));
        }
        Ok(Payload::for_value(data))
    }

    /// `L_Data.req` carrying `A_GroupValue_Read`
    pub fn group_read(destination: GroupAddress) -> Self {
        Self::group_service(destination, Apci::GroupValueRead, Payload::Embedded(0))
    }

    /// `L_Data.req` carrying `A_GroupValue_Write`
    ///
    /// # Errors
    ///
    /// Returns an out-of-range frame error if `data` is empty or longer than
    /// 254 bytes.
    pub fn group_write(destination: GroupAddress, data: &[u8]) -> Result<Self> {
        let payload = Self::checked_value(data)?;
        Ok(Self::group_service(destination, Apci::GroupValueWrite, payload))
    }

    /// `L_Data.req` carrying `A_GroupValue_Response`
    ///
    /// # Errors
    ///
    /// Same bounds as [`CemiFrame::group_write`].
    pub fn group_response(destination: GroupAddress, data: &[u8]) -> Result<Self> {
        let payload = Self::checked_value(data)?;
        Ok(Self::group_service(
            destination,
            Apci::GroupValueResponse,
            payload,
        ))
    }

    /// Decode a complete cEMI frame
    ///
    /// # Errors
    ///
    /// Returns a frame error if lengths are inconsistent and a protocol error
    /// if the message code is not an `L_Data` service.
    pub fn decode(data: &[u8]) -> Result<Self> {
        require_len("cemi", data, 2)?;

        let message_code =
            CEMIMessageCode::from_u8(data[0]).ok_or_else(|| KnxError::invalid_message_code(data[0]))?;

        let info_len = usize::from(data[1]);
        let service_start = 2 + info_len;
        if data.len() < service_start + Self::LDATA_MIN {
            return Err(KnxError::out_of_range(
                "cemi.additional_info_length",
                0,
                data.len().saturating_sub(2 + Self::LDATA_MIN),
                info_len,
                data,
            ));
        }
        let additional_info = data[2..service_start].to_vec();

        let ldata = &data[service_start..];
        let ctrl1 = ControlField1::from(ldata[0]);
        let ctrl2 = ControlField2::from(ldata[1]);
        let source = IndividualAddress::from_bytes([ldata[2], ldata[3]]);
        let destination = u16::from_be_bytes([ldata[4], ldata[5]]);
        let npdu_len = usize::from(ldata[6]);
        let tpci_octet = ldata[7];

        // NPDU length counts the octets after the TPCI octet
        let expected = Self::LDATA_MIN + npdu_len;
        if ldata.len() != expected {
            return Err(KnxError::out_of_range(
                "cemi.npdu_length",
                ldata.len().saturating_sub(Self::LDATA_MIN),
                ldata.len().saturating_sub(Self::LDATA_MIN),
                npdu_len,
                data,
            ));
        }

        let tpci = Tpci::from_byte(tpci_octet);
        if !tpci.is_data() {
            if npdu_len != 0 {
                return Err(KnxError::illegal_argument(
                    "cemi.tpci",
                    "control TPDU carries no APCI",
                    data,
                ));
            }
            return Ok(Self {
                message_code,
                additional_info,
                ctrl1,
                ctrl2,
                source,
                destination,
                tpci,
                apci: None,
                payload: Payload::Appended(Vec::new()),
            });
        }

        if npdu_len == 0 {
            return Err(KnxError::illegal_argument(
                "cemi.npdu_length",
                "data TPDU without APCI",
                data,
            ));
        }

        let raw_apci = (u16::from(tpci_octet & 0x03) << 8) | u16::from(ldata[8]);
        let (apci, payload) = if npdu_len == 1 {
            (
                Apci::from_u16(raw_apci & 0x3C0),
                Payload::Embedded((raw_apci & 0x3F) as u8),
            )
        } else {
            let apci = if raw_apci & 0x3F == 0 {
                Apci::from_u16(raw_apci)
            } else {
                Apci::Unknown(raw_apci)
            };
            (apci, Payload::Appended(ldata[9..].to_vec()))
        };

        Ok(Self {
            message_code,
            additional_info,
            ctrl1,
            ctrl2,
            source,
            destination,
            tpci,
            apci: Some(apci),
            payload,
        })
    }

    /// Encode to bytes (exact inverse of [`CemiFrame::decode`])
    ///
    /// # Errors
    ///
    /// Returns an out-of-range frame error if the additional info or the
    /// appended payload does not fit its length octet.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let info_len = u8::try_from(self.additional_info.len()).map_err(|_| {
            KnxError::out_of_range(
                "cemi.additional_info",
                0,
                255,
                self.additional_info.len(),
                &self.additional_info,
            )
        })?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.message_code.to_u8());
        buf.push(info_len);
        buf.extend_from_slice(&self.additional_info);
        buf.push(self.ctrl1.raw());
        buf.push(self.ctrl2.raw());
        buf.extend_from_slice(&self.source.to_bytes());
        buf.extend_from_slice(&self.destination.to_be_bytes());

        let Some(apci) = self.apci else {
            buf.push(0);
            buf.push(self.tpci.to_byte());
            return Ok(buf);
        };

        let (raw_apci, appended): (u16, &[u8]) = match &self.payload {
            Payload::Embedded(value) => (apci.to_u16() | u16::from(*value & 0x3F), &[][..]),
            Payload::Appended(data) => (apci.to_u16(), data.as_slice()),
        };
        if appended.len() > Self::MAX_APPENDED {
            return Err(KnxError::out_of_range(
                "data",
                0,
                Self::MAX_APPENDED,
                appended.len(),
                appended,
            ));
        }

        // bounded by MAX_APPENDED above
        buf.push((1 + appended.len()) as u8);
        buf.push(self.tpci.to_byte() | ((raw_apci >> 8) as u8 & 0x03));
        buf.push((raw_apci & 0xFF) as u8);
        buf.extend_from_slice(appended);
        Ok(buf)
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        let tpdu = match (&self.apci, &self.payload) {
            (None, _) => 1,
            (Some(_), Payload::Embedded(_)) => 2,
            (Some(_), Payload::Appended(data)) => 2 + data.len(),
        };
        2 + self.additional_info.len() + 7 + tpdu
    }

    /// Get destination as group address (if applicable)
    #[inline]
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination))
    }

    /// Get destination as individual address (if applicable)
    #[inline]
    pub fn destination_individual(&self) -> Option<IndividualAddress> {
        (!self.ctrl2.is_group_address()).then(|| IndividualAddress::from(self.destination))
    }

    /// Check if this is a group value write
    #[inline]
    pub fn is_group_write(&self) -> bool {
        self.apci == Some(Apci::GroupValueWrite)
    }

    /// Check if this is a group value read
    #[inline]
    pub fn is_group_read(&self) -> bool {
        self.apci == Some(Apci::GroupValueRead)
    }

    /// Check if this is a group value response
    #[inline]
    pub fn is_group_response(&self) -> bool {
        self.apci == Some(Apci::GroupValueResponse)
    }

    /// Application data as plain bytes
    pub fn value(&self) -> Vec<u8> {
        self.payload.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_field1() {
        let ctrl = ControlField1::new(true, false, true, Priority::Normal, false, false);
        assert!(ctrl.is_standard_frame());
        assert!(!ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Normal);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
        assert_eq!(ctrl.raw(), 0x94);
    }

    #[test]
    fn test_control_field1_default() {
        let ctrl = ControlField1::default();
        assert_eq!(ctrl.raw(), 0xBC);
        assert!(ctrl.do_not_repeat());
        assert_eq!(ctrl.priority(), Priority::Low);
    }

    #[test]
    fn test_control_field2_default() {
        let ctrl = ControlField2::default();
        assert_eq!(ctrl.raw(), 0xE0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);
    }

    #[test]
    fn test_tpci_parse() {
        assert_eq!(Tpci::from_byte(0b0000_0000), Tpci::UnnumberedData);
        assert_eq!(
            Tpci::from_byte(0b0100_1100),
            Tpci::NumberedData { sequence: 3 }
        );
        assert_eq!(
            Tpci::from_byte(0b1000_0001),
            Tpci::UnnumberedControl { code: 1 }
        );
        assert_eq!(Tpci::from_byte(0xC2).to_byte(), 0xC2);
        assert!(!Tpci::from_byte(0x80).is_data());
    }

    #[test]
    fn test_decode_group_write_embedded() {
        // L_Data.ind, group write to 1/2/3 with value 0x01 from 1.1.1
        let data = [
            0x29, 0x00, // message code, no additional info
            0xBC, 0xE0, // control fields
            0x11, 0x01, // Source: 1.1.1
            0x0A, 0x03, // Destination: 1/2/3
            0x01, // NPDU length
            0x00, // TPCI (unnumbered data)
            0x81, // APCI (group write) + 6-bit data (0x01)
        ];

        let frame = CemiFrame::decode(&data).unwrap();
        assert_eq!(frame.message_code, CEMIMessageCode::LDataInd);
        assert_eq!(frame.source, IndividualAddress::new(1, 1, 1).unwrap());
        assert_eq!(
            frame.destination_group(),
            Some(GroupAddress::new(1, 2, 3).unwrap())
        );
        assert!(frame.is_group_write());
        assert_eq!(frame.payload, Payload::Embedded(0x01));
        assert_eq!(frame.value(), vec![0x01]);
        assert_eq!(frame.encode().unwrap(), data);
    }

    #[test]
    fn test_decode_group_response_appended() {
        // 2-byte float value after the APCI octet
        let data = [
            0x29, 0x00, 0xBC, 0xE0, 0x11, 0x05, 0x2E, 0x07, 0x03, 0x00, 0x40, 0x0C, 0x1A,
        ];

        let frame = CemiFrame::decode(&data).unwrap();
        assert!(frame.is_group_response());
        assert_eq!(frame.payload, Payload::Appended(vec![0x0C, 0x1A]));
        assert_eq!(frame.encoded_len(), data.len());
        assert_eq!(frame.encode().unwrap(), data);
    }

    #[test]
    fn test_additional_info_preserved() {
        let data = [
            0x2E, 0x04, 0x03, 0x02, 0x40, 0x00, // L_Data.con, 4 bytes add info
            0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00, 0x80,
        ];

        let frame = CemiFrame::decode(&data).unwrap();
        assert_eq!(frame.additional_info, vec![0x03, 0x02, 0x40, 0x00]);
        assert_eq!(frame.encode().unwrap(), data);
    }

    #[test]
    fn test_control_tpdu() {
        // T_Connect to individual address 1.1.5
        let data = [0x11, 0x00, 0xB0, 0x60, 0x00, 0x00, 0x11, 0x05, 0x00, 0x80];
        let frame = CemiFrame::decode(&data).unwrap();
        assert_eq!(frame.apci, None);
        assert_eq!(frame.tpci, Tpci::UnnumberedControl { code: 0 });
        assert_eq!(
            frame.destination_individual(),
            Some(IndividualAddress::new(1, 1, 5).unwrap())
        );
        assert_eq!(frame.encode().unwrap(), data);
    }

    #[test]
    fn test_builders() {
        let ga = GroupAddress::new(1, 2, 3).unwrap();

        let read = CemiFrame::group_read(ga).encode().unwrap();
        assert_eq!(
            read,
            [0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x0A, 0x03, 0x01, 0x00, 0x00]
        );

        let write = CemiFrame::group_write(ga, &[0x01]).unwrap().encode().unwrap();
        assert_eq!(&write[8..], &[0x01, 0x00, 0x81]);

        let write = CemiFrame::group_write(ga, &[0x12, 0x34]).unwrap().encode().unwrap();
        assert_eq!(&write[8..], &[0x03, 0x00, 0x80, 0x12, 0x34]);

        // values above six bits never embed
        let write = CemiFrame::group_write(ga, &[0x40]).unwrap();
        assert_eq!(write.payload, Payload::Appended(vec![0x40]));

        assert!(CemiFrame::group_write(ga, &[]).unwrap_err().is_frame_error());
        assert!(CemiFrame::group_response(ga, &[0u8; 255]).is_err());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            CemiFrame::decode(&[0xFF, 0x00, 0xBC, 0xE0, 0, 0, 0, 0, 0x01, 0x00, 0x80]),
            Err(KnxError::Protocol(_))
        ));

        // NPDU length claims two octets, only one present
        let err = CemiFrame::decode(&[0x29, 0x00, 0xBC, 0xE0, 0, 0, 0, 0, 0x02, 0x00, 0x80])
            .unwrap_err();
        assert!(matches!(err, KnxError::Frame(ref e) if e.field() == "cemi.npdu_length"));

        // additional info longer than the frame
        let err = CemiFrame::decode(&[0x29, 0x10, 0xBC]).unwrap_err();
        assert!(matches!(err, KnxError::Frame(ref e) if e.field() == "cemi.additional_info_length"));
    }
}
