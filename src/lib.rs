#![doc = include_str!("../README.md")]

//! ## Modules
//!
//! - [`protocol`]: KNXnet/IP frames and cEMI messages, decoded with validation
//! - [`client`]: connection lifecycle, heartbeat and the tunneling data path
//! - [`event_pool`]: request/response correlation
//! - [`status`]: last known value per group address
//! - [`plugin`]: observer and extension plugins
//! - [`config`]: immutable client configuration

// Macro module first so the macros are in textual scope everywhere
#[macro_use]
pub mod macros;

pub mod addressing;
mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod event_pool;
pub mod plugin;
pub mod protocol;
pub mod status;

#[doc(inline)]
pub use addressing::{GroupAddress, IndividualAddress};
#[doc(inline)]
pub use client::{ClientState, KnxClient};
#[doc(inline)]
pub use config::{Config, ConfigBuilder, LocalPorts, Timeouts};
#[doc(inline)]
pub use error::{KnxError, Result};
#[doc(inline)]
pub use event_pool::RequestCategory;
#[doc(inline)]
pub use status::{StatusData, StatusPool};
