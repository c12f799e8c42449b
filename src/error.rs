//! Error types for KNX operations following M-ERRORS-CANONICAL-STRUCTS guideline.
//!
//! Every category wraps a struct carrying a private kind and a captured
//! backtrace. Callers inspect errors through the `is_*` helpers instead of
//! matching on internals, which keeps the kinds free to grow.

use core::fmt;
use std::backtrace::Backtrace;
use std::io;

use crate::event_pool::RequestCategory;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Frame decode/encode error variants (internal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameErrorKind {
    OutOfRange { min: usize, max: usize, actual: usize },
    IllegalArgument { reason: &'static str },
}

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    UnsupportedVersion(u8),
    UnsupportedServiceType(u16),
    InvalidMessageCode(u8),
    WrongChannelId { expected: u8, actual: u8 },
    NoTunnelingSupport,
    UnexpectedBody,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionErrorKind {
    Refused(u8),
    Timeout(RequestCategory),
    NoGatewayFound,
    Lost,
    LivenessFailure,
    NotConnected,
    AlreadyStarted,
}

/// Tunneling error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TunnelingErrorKind {
    AckTimeout(u8),
    AckFailed { sequence: u8, status: u8 },
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    Io,
    ChannelClosed,
}

/// Addressing error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingErrorKind {
    InvalidIndividualAddress,
    InvalidGroupAddress,
    OutOfRange,
}

/// Event pool error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventPoolErrorKind {
    SlotOccupied(RequestCategory),
    SequenceOutstanding(u8),
}

/// Configuration error variants (internal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConfigErrorKind {
    InvalidValue { key: &'static str, reason: &'static str },
    UnknownKey(String),
    Unparsable { key: String, value: String },
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX engine error types.
///
/// This is the main error type returned by all operations of the crate.
#[derive(Debug)]
pub enum KnxError {
    /// Malformed or out-of-bounds wire structure
    Frame(FrameError),
    /// Protocol violations (unknown service, wrong channel, etc.)
    Protocol(ProtocolError),
    /// Connection lifecycle errors (refused, timeout, liveness, etc.)
    Connection(ConnectionError),
    /// Tunneling data path errors (missing or negative ACK)
    Tunneling(TunnelingError),
    /// Socket and queue errors
    Transport(TransportError),
    /// Addressing errors (invalid address format, etc.)
    Addressing(AddressingError),
    /// Correlation store errors
    EventPool(EventPoolError),
    /// Rejected configuration
    Config(ConfigError),
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Frame error naming the offending field, its bounds and the raw bytes
#[derive(Debug)]
pub struct FrameError {
    field: &'static str,
    kind: FrameErrorKind,
    bytes: Vec<u8>,
    backtrace: Backtrace,
}

impl FrameError {
    pub(crate) fn new(field: &'static str, kind: FrameErrorKind, bytes: &[u8]) -> Self {
        Self {
            field,
            kind,
            bytes: bytes.to_vec(),
            backtrace: Backtrace::capture(),
        }
    }

    /// Name of the field that failed validation
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Bytes that were being decoded (or encoded) when validation failed
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check if a length or value was outside its allowed bounds
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind, FrameErrorKind::OutOfRange { .. })
    }

    /// Check if a field carried a value that is not allowed at all
    pub fn is_illegal_argument(&self) -> bool {
        matches!(self.kind, FrameErrorKind::IllegalArgument { .. })
    }

    /// Captured backtrace (empty unless `RUST_BACKTRACE` is set)
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// Protocol error with backtrace
#[derive(Debug)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if a frame carried a foreign channel id
    pub fn is_wrong_channel_id(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::WrongChannelId { .. })
    }

    /// Check if the gateway lacks the tunneling service family
    pub fn is_no_tunneling_support(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::NoTunnelingSupport)
    }

    /// Check if the service type identifier is unknown
    pub fn is_unsupported_service_type(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnsupportedServiceType(_))
    }
}

/// Connection error with backtrace
#[derive(Debug)]
pub struct ConnectionError {
    kind: ConnectionErrorKind,
    backtrace: Backtrace,
}

impl ConnectionError {
    pub(crate) fn new(kind: ConnectionErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Timeout(_))
    }

    /// Request category that timed out, if this is a timeout
    pub fn timed_out_category(&self) -> Option<RequestCategory> {
        match self.kind {
            ConnectionErrorKind::Timeout(category) => Some(category),
            _ => None,
        }
    }

    /// Check if connection was refused
    pub fn is_refused(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::Refused(_))
    }

    /// Check if connection was lost
    pub fn is_lost(&self) -> bool {
        matches!(
            self.kind,
            ConnectionErrorKind::Lost | ConnectionErrorKind::LivenessFailure
        )
    }

    /// Check if the client is not (or no longer) connected
    pub fn is_not_connected(&self) -> bool {
        matches!(self.kind, ConnectionErrorKind::NotConnected)
    }
}

/// Tunneling error with backtrace
#[derive(Debug)]
pub struct TunnelingError {
    kind: TunnelingErrorKind,
    backtrace: Backtrace,
}

impl TunnelingError {
    pub(crate) fn new(kind: TunnelingErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if no acknowledgement arrived
    pub fn is_ack_timeout(&self) -> bool {
        matches!(self.kind, TunnelingErrorKind::AckTimeout(_))
    }

    /// Check if the gateway answered with a non-success status
    pub fn is_ack_failed(&self) -> bool {
        matches!(self.kind, TunnelingErrorKind::AckFailed { .. })
    }
}

/// Transport error with backtrace and the underlying I/O error
#[derive(Debug)]
pub struct TransportError {
    kind: TransportErrorKind,
    source: Option<io::Error>,
    backtrace: Backtrace,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind, source: Option<io::Error>) -> Self {
        Self {
            kind,
            source,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the channel (queue or socket) was already closed
    pub fn is_channel_closed(&self) -> bool {
        matches!(self.kind, TransportErrorKind::ChannelClosed)
    }
}

/// Addressing error with backtrace
#[derive(Debug)]
pub struct AddressingError {
    kind: AddressingErrorKind,
    backtrace: Backtrace,
}

impl AddressingError {
    pub(crate) fn new(kind: AddressingErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if address is out of range
    pub fn is_out_of_range(&self) -> bool {
        matches!(self.kind, AddressingErrorKind::OutOfRange)
    }
}

/// Event pool error with backtrace
#[derive(Debug)]
pub struct EventPoolError {
    kind: EventPoolErrorKind,
    backtrace: Backtrace,
}

impl EventPoolError {
    pub(crate) fn new(kind: EventPoolErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if a single-slot category already had an outstanding request
    pub fn is_slot_occupied(&self) -> bool {
        matches!(self.kind, EventPoolErrorKind::SlotOccupied(_))
    }

    /// Check if a tunneling request with the same sequence was still in flight
    pub fn is_sequence_outstanding(&self) -> bool {
        matches!(self.kind, EventPoolErrorKind::SequenceOutstanding(_))
    }
}

/// Configuration error
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
}

impl ConfigError {
    pub(crate) fn new(kind: ConfigErrorKind) -> Self {
        Self { kind }
    }

    /// Check if a key was not recognised
    pub fn is_unknown_key(&self) -> bool {
        matches!(self.kind, ConfigErrorKind::UnknownKey(_))
    }

    /// Check if a value violated its constraints
    pub fn is_invalid_value(&self) -> bool {
        matches!(self.kind, ConfigErrorKind::InvalidValue { .. })
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Frame errors
    pub(crate) fn out_of_range(
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
        bytes: &[u8],
    ) -> Self {
        Self::Frame(FrameError::new(
            field,
            FrameErrorKind::OutOfRange { min, max, actual },
            bytes,
        ))
    }

    pub(crate) fn illegal_argument(field: &'static str, reason: &'static str, bytes: &[u8]) -> Self {
        Self::Frame(FrameError::new(
            field,
            FrameErrorKind::IllegalArgument { reason },
            bytes,
        ))
    }

    // Protocol errors
    pub(crate) fn unsupported_version(version: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion(version)))
    }

    pub(crate) fn unsupported_service_type(raw: u16) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedServiceType(raw)))
    }

    pub(crate) fn invalid_message_code(code: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidMessageCode(code)))
    }

    pub(crate) fn wrong_channel_id(expected: u8, actual: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::WrongChannelId {
            expected,
            actual,
        }))
    }

    pub(crate) fn no_tunneling_support() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::NoTunnelingSupport))
    }

    pub(crate) fn unexpected_body() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnexpectedBody))
    }

    // Connection errors
    pub(crate) fn connection_refused(status: u8) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Refused(status)))
    }

    pub(crate) fn connection_timeout(category: RequestCategory) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Timeout(category)))
    }

    pub(crate) fn no_gateway_found() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NoGatewayFound))
    }

    pub(crate) fn connection_lost() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Lost))
    }

    pub(crate) fn liveness_failure() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::LivenessFailure))
    }

    pub(crate) fn not_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NotConnected))
    }

    pub(crate) fn already_started() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::AlreadyStarted))
    }

    // Tunneling errors
    pub(crate) fn ack_timeout(sequence: u8) -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::AckTimeout(sequence)))
    }

    pub(crate) fn ack_failed(sequence: u8, status: u8) -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::AckFailed {
            sequence,
            status,
        }))
    }

    // Transport errors
    pub(crate) fn io(source: io::Error) -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::Io, Some(source)))
    }

    pub(crate) fn channel_closed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ChannelClosed, None))
    }

    // Addressing errors
    pub(crate) fn invalid_group_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidGroupAddress))
    }

    pub(crate) fn invalid_individual_address() -> Self {
        Self::Addressing(AddressingError::new(
            AddressingErrorKind::InvalidIndividualAddress,
        ))
    }

    pub(crate) fn address_out_of_range() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::OutOfRange))
    }

    // Event pool errors
    pub(crate) fn slot_occupied(category: RequestCategory) -> Self {
        Self::EventPool(EventPoolError::new(EventPoolErrorKind::SlotOccupied(category)))
    }

    pub(crate) fn sequence_outstanding(sequence: u8) -> Self {
        Self::EventPool(EventPoolError::new(EventPoolErrorKind::SequenceOutstanding(
            sequence,
        )))
    }

    // Configuration errors
    pub(crate) fn invalid_config(key: &'static str, reason: &'static str) -> Self {
        Self::Config(ConfigError::new(ConfigErrorKind::InvalidValue { key, reason }))
    }

    pub(crate) fn unknown_config_key(key: &str) -> Self {
        Self::Config(ConfigError::new(ConfigErrorKind::UnknownKey(key.to_owned())))
    }

    pub(crate) fn unparsable_config(key: &str, value: &str) -> Self {
        Self::Config(ConfigError::new(ConfigErrorKind::Unparsable {
            key: key.to_owned(),
            value: value.to_owned(),
        }))
    }

    /// Check if this error is a frame validation failure
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Self::Frame(_))
    }

    /// Check if this error means the client is not connected
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Connection(e) if e.is_not_connected())
    }

    /// Check if this error is a request or acknowledgement timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_timeout(),
            Self::Tunneling(e) => e.is_ack_timeout(),
            _ => false,
        }
    }
}

impl From<io::Error> for KnxError {
    fn from(source: io::Error) -> Self {
        Self::io(source)
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FrameErrorKind::OutOfRange { min, max, actual } => write!(
                f,
                "field '{}' out of range [{min}..{max}], actual {actual} (bytes: {})",
                self.field,
                Hex(&self.bytes)
            ),
            FrameErrorKind::IllegalArgument { reason } => write!(
                f,
                "field '{}' illegal: {reason} (bytes: {})",
                self.field,
                Hex(&self.bytes)
            ),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConfigErrorKind::InvalidValue { key, reason } => write!(f, "{key}: {reason}"),
            ConfigErrorKind::UnknownKey(key) => write!(f, "unknown key '{key}'"),
            ConfigErrorKind::Unparsable { key, value } => {
                write!(f, "cannot parse value '{value}' for key '{key}'")
            }
        }
    }
}

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Frame(e) => write!(f, "Frame error: {e}"),
            KnxError::Protocol(e) => write!(f, "Protocol error: {:?}", e.kind),
            KnxError::Connection(e) => write!(f, "Connection error: {:?}", e.kind),
            KnxError::Tunneling(e) => write!(f, "Tunneling error: {:?}", e.kind),
            KnxError::Transport(e) => match &e.source {
                Some(source) => write!(f, "Transport error: {:?}: {source}", e.kind),
                None => write!(f, "Transport error: {:?}", e.kind),
            },
            KnxError::Addressing(e) => write!(f, "Addressing error: {:?}", e.kind),
            KnxError::EventPool(e) => write!(f, "Event pool error: {:?}", e.kind),
            KnxError::Config(e) => write!(f, "Configuration error: {e}"),
        }
    }
}

impl std::error::Error for KnxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KnxError::Transport(TransportError {
                source: Some(source),
                ..
            }) => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display_names_field_and_bytes() {
        let err = KnxError::out_of_range("total_length", 6, 6, 4, &[0x06, 0x10, 0x02, 0x01]);
        let text = err.to_string();
        assert!(text.contains("total_length"));
        assert!(text.contains("[6..6]"));
        assert!(text.contains("06 10 02 01"));
        assert!(err.is_frame_error());
    }

    #[test]
    fn test_timeout_helpers() {
        assert!(KnxError::connection_timeout(RequestCategory::Connect).is_timeout());
        assert!(KnxError::ack_timeout(3).is_timeout());
        assert!(!KnxError::not_connected().is_timeout());
        assert!(KnxError::not_connected().is_not_connected());
    }

    #[test]
    fn test_io_source_is_exposed() {
        use std::error::Error as _;

        let err = KnxError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.source().is_some());
    }
}
