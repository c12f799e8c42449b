//! KNXnet/IP protocol implementation.
//!
//! Wire structures for KNXnet/IP frames and the cEMI messages they carry.
//! Every structure decodes with validation and encodes back byte for byte.

pub mod body;
pub mod cemi;
pub mod constants;
pub mod frame;
pub mod services;
pub mod tunneling;

pub use body::Body;
pub use cemi::{Apci, CemiFrame, ControlField1, ControlField2, Payload, Tpci};
pub use constants::*;
pub use frame::{Hpai, HostProtocol, KnxnetIpFrame, KnxnetIpHeader};
pub use services::*;
pub use tunneling::*;
