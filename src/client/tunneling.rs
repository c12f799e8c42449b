//! Tunneling data path: acknowledged sends and the receive sequence.

use std::sync::atomic::Ordering;

use super::Inner;
use crate::channel::ChannelKind;
use crate::error::{KnxError, Result};
use crate::event_pool::RequestCategory;
use crate::protocol::cemi::CemiFrame;
use crate::protocol::tunneling::TunnelingRequest;
use crate::protocol::Body;

/// What to do with an inbound tunneling request, by sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SequenceDecision {
    /// New frame: apply it
    Accept,
    /// Same sequence as the last accepted frame (our ack was lost)
    Duplicate,
    /// Up to 127 behind the last accepted frame
    Stale,
}

/// Receive sequence counter of one tunnel
///
/// The first frame after connect sets the counter. A frame up to 127 steps
/// behind the last accepted one (modulo 256) is stale; any other frame is
/// accepted and resynchronises the counter, with a warning if frames were
/// skipped.
#[derive(Debug, Default)]
pub(super) struct ReceiveSequence {
    last: Option<u8>,
}

impl ReceiveSequence {
    pub(super) fn classify(&mut self, sequence: u8) -> SequenceDecision {
        let Some(last) = self.last else {
            self.last = Some(sequence);
            return SequenceDecision::Accept;
        };
        if sequence == last {
            return SequenceDecision::Duplicate;
        }
        if last.wrapping_sub(sequence) < 128 {
            return SequenceDecision::Stale;
        }

        let expected = last.wrapping_add(1);
        if sequence != expected {
            log::warn!("tunneling sequence gap: expected {expected}, got {sequence}");
        }
        self.last = Some(sequence);
        SequenceDecision::Accept
    }
}

impl Inner {
    /// Send `cemi` in a tunneling request and wait for a positive ack
    pub(super) fn tunnel(&self, cemi: CemiFrame) -> Result<()> {
        let session = self.connected_session()?;

        // The counter only advances once the sequence is registered
        let (sequence, body, guard) = loop {
            let sequence = self.send_sequence.load(Ordering::Acquire);
            let body = Body::TunnelingRequest(TunnelingRequest::new(
                session.channel_id,
                sequence,
                cemi.clone(),
            ));
            let guard = match self.events.register(RequestCategory::Tunneling, body.clone()) {
                Ok(guard) => guard,
                Err(_) if self.send_sequence.load(Ordering::Acquire) != sequence => continue,
                Err(e) => return Err(e),
            };
            if self
                .send_sequence
                .compare_exchange(sequence, sequence.wrapping_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break (sequence, body, guard);
            }
        };

        let attempts = self.config.attempts();
        let timeout = self.config.timeout(RequestCategory::Tunneling);

        for attempt in 1..=attempts {
            self.send(ChannelKind::Data, body.clone(), session.data_endpoint.into())?;
            guard.mark_sent();

            match guard.await_response(timeout) {
                Some(Body::TunnelingAck(ack)) if ack.is_ok() => {
                    log::debug!("sequence {sequence} acknowledged");
                    return Ok(());
                }
                Some(Body::TunnelingAck(ack)) => {
                    return Err(KnxError::ack_failed(sequence, ack.header.status));
                }
                Some(_) => return Err(KnxError::unexpected_body()),
                None if self.events.is_cancelled() => return Err(KnxError::not_connected()),
                None => log::warn!("no ack for sequence {sequence} (attempt {attempt}/{attempts})"),
            }
        }

        Err(KnxError::ack_timeout(sequence))
    }
}
