//! KNX Individual Address implementation.
//!
//! Individual addresses identify physical devices on the KNX bus and appear
//! as the source of every cEMI frame and inside the tunnel CRD.
//! Format: Area.Line.Device (e.g., 1.1.5)

use crate::error::{KnxError, Result};
use core::fmt;

/// KNX Individual Address (Area.Line.Device)
///
/// # Examples
///
/// ```
/// use knx_link::IndividualAddress;
///
/// let addr = IndividualAddress::new(1, 1, 5).unwrap();
/// assert_eq!(addr.to_string(), "1.1.5");
/// assert_eq!("1.1.5".parse::<IndividualAddress>().unwrap(), addr);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(into = "u16", from = "u16"))]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Maximum area value (4 bits)
    pub const MAX_AREA: u8 = 15;
    /// Maximum line value (4 bits)
    pub const MAX_LINE: u8 = 15;

    /// Create a new Individual Address from components.
    ///
    /// # Errors
    ///
    /// Returns an addressing error if area or line exceed 15.
    pub fn new(area: u8, line: u8, device: u8) -> Result<Self> {
        if area > Self::MAX_AREA || line > Self::MAX_LINE {
            return Err(KnxError::address_out_of_range());
        }

        let raw = (u16::from(area) << 12) | (u16::from(line) << 8) | u16::from(device);
        Ok(Self { raw })
    }

    /// Get the raw u16 representation of the address.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// Area component (0-15).
    #[inline]
    pub const fn area(self) -> u8 {
        ((self.raw >> 12) & 0x0F) as u8
    }

    /// Line component (0-15).
    #[inline]
    pub const fn line(self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Device component (0-255).
    #[inline]
    pub const fn device(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Big-endian wire representation.
    #[inline]
    pub const fn to_bytes(self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }

    /// Build from the big-endian wire representation.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            raw: u16::from_be_bytes(bytes),
        }
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl From<u16> for IndividualAddress {
    #[inline]
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<IndividualAddress> for u16 {
    #[inline]
    fn from(addr: IndividualAddress) -> u16 {
        addr.raw
    }
}

impl core::str::FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.').map(|p| p.parse::<u8>().ok());

        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Some(area)), Some(Some(line)), Some(Some(device)), None) => {
                Self::new(area, line, device)
            }
            _ => Err(KnxError::invalid_individual_address()),
        }
    }
}
