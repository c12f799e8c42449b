//! Request/response correlation store.
//!
//! Five control-plane categories hold at most one outstanding request each.
//! Tunneling requests are keyed by their sequence number. A waiter blocks on
//! its entry in check-interval slices so that cancellation is observed
//! promptly; the entry is removed when the [`EventGuard`] drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{KnxError, Result};
use crate::protocol::Body;

/// Kind of outstanding request, used for correlation and timeout lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    /// `SEARCH_REQUEST` awaiting a `SEARCH_RESPONSE`
    Discovery,
    /// `DESCRIPTION_REQUEST` awaiting a `DESCRIPTION_RESPONSE`
    Description,
    /// `CONNECT_REQUEST` awaiting a `CONNECT_RESPONSE`
    Connect,
    /// `CONNECTIONSTATE_REQUEST` awaiting a `CONNECTIONSTATE_RESPONSE`
    ConnectionState,
    /// `DISCONNECT_REQUEST` awaiting a `DISCONNECT_RESPONSE`
    Disconnect,
    /// `TUNNELING_REQUEST` awaiting a `TUNNELING_ACK`
    Tunneling,
}

impl RequestCategory {
    /// Every category in lifecycle order
    pub const ALL: [Self; 6] = [
        Self::Discovery,
        Self::Description,
        Self::Connect,
        Self::ConnectionState,
        Self::Disconnect,
        Self::Tunneling,
    ];

    /// Slot index for single-slot categories
    const fn slot(self) -> Option<usize> {
        match self {
            Self::Discovery => Some(0),
            Self::Description => Some(1),
            Self::Connect => Some(2),
            Self::ConnectionState => Some(3),
            Self::Disconnect => Some(4),
            Self::Tunneling => None,
        }
    }

    /// Category a response body completes, with its sequence for tunneling
    pub fn of_response(body: &Body) -> Option<(Self, Option<u8>)> {
        match body {
            Body::SearchResponse(_) => Some((Self::Discovery, None)),
            Body::DescriptionResponse(_) => Some((Self::Description, None)),
            Body::ConnectResponse(_) => Some((Self::Connect, None)),
            Body::ConnectionStateResponse(_) => Some((Self::ConnectionState, None)),
            Body::DisconnectResponse(_) => Some((Self::Disconnect, None)),
            Body::TunnelingAck(ack) => Some((Self::Tunneling, Some(ack.header.sequence))),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Exchange {
    sent_at: Option<Instant>,
    response: Option<Body>,
    received_at: Option<Instant>,
}

/// One in-flight request and its (first) response
#[derive(Debug)]
pub struct EventData {
    request: Body,
    exchange: Mutex<Exchange>,
    arrived: Condvar,
}

impl EventData {
    fn new(request: Body) -> Self {
        Self {
            request,
            exchange: Mutex::new(Exchange::default()),
            arrived: Condvar::new(),
        }
    }

    /// The request body as registered
    pub fn request(&self) -> &Body {
        &self.request
    }

    /// Check if a response has been stored
    pub fn has_response(&self) -> bool {
        self.exchange.lock().response.is_some()
    }

    /// Time of the most recent send
    pub fn sent_at(&self) -> Option<Instant> {
        self.exchange.lock().sent_at
    }

    /// Time the response was stored
    pub fn received_at(&self) -> Option<Instant> {
        self.exchange.lock().received_at
    }

    /// Store the first response; later ones are ignored
    fn complete(&self, response: Body) -> bool {
        let mut exchange = self.exchange.lock();
        if exchange.response.is_some() {
            return false;
        }
        exchange.response = Some(response);
        exchange.received_at = Some(Instant::now());
        self.arrived.notify_all();
        true
    }
}

/// Correlation store shared by the lifecycle, the data path and the
/// inbound dispatcher
#[derive(Debug)]
pub struct EventPool {
    slots: [Mutex<Option<Arc<EventData>>>; 5],
    tunneling: DashMap<u8, Arc<EventData>>,
    check_interval: Duration,
    cancelled: AtomicBool,
}

impl EventPool {
    /// Create an empty pool whose waits proceed in `check_interval` slices
    pub fn new(check_interval: Duration) -> Self {
        Self {
            slots: Default::default(),
            tunneling: DashMap::new(),
            check_interval,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Register an outgoing request
    ///
    /// # Errors
    ///
    /// Fails fast if the single-slot category is occupied, or if a tunneling
    /// request with the same sequence number is still outstanding.
    pub fn register(&self, category: RequestCategory, request: Body) -> Result<EventGuard<'_>> {
        if self.is_cancelled() {
            return Err(KnxError::not_connected());
        }

        let data = Arc::new(EventData::new(request));

        let sequence = match category.slot() {
            Some(index) => {
                let mut slot = self.slots[index].lock();
                if slot.is_some() {
                    return Err(KnxError::slot_occupied(category));
                }
                *slot = Some(Arc::clone(&data));
                None
            }
            None => {
                let Body::TunnelingRequest(tunneling) = &data.request else {
                    return Err(KnxError::unexpected_body());
                };
                let sequence = tunneling.header.sequence;
                match self.tunneling.entry(sequence) {
                    Entry::Occupied(_) => return Err(KnxError::sequence_outstanding(sequence)),
                    Entry::Vacant(vacant) => {
                        vacant.insert(Arc::clone(&data));
                    }
                }
                Some(sequence)
            }
        };

        log::trace!("event pool: registered {category:?} (sequence {sequence:?})");
        Ok(EventGuard {
            pool: self,
            category,
            sequence,
            data,
        })
    }

    /// Hand a response body to the waiting entry
    ///
    /// Returns `false` if nothing was waiting for it (unmatched responses are
    /// ignored) or the entry already had a response.
    pub fn complete(&self, response: &Body) -> bool {
        let Some((category, sequence)) = RequestCategory::of_response(response) else {
            return false;
        };

        let entry = match (category.slot(), sequence) {
            (Some(index), _) => self.slots[index].lock().clone(),
            (None, Some(sequence)) => self.tunneling.get(&sequence).map(|e| Arc::clone(&e)),
            (None, None) => None,
        };

        match entry {
            Some(data) => data.complete(response.clone()),
            None => {
                log::debug!("event pool: no waiter for {category:?} response");
                false
            }
        }
    }

    /// Check if a request of `category` is outstanding
    pub fn is_pending(&self, category: RequestCategory) -> bool {
        match category.slot() {
            Some(index) => self.slots[index].lock().is_some(),
            None => !self.tunneling.is_empty(),
        }
    }

    /// Wake every waiter and refuse further registrations
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        for slot in &self.slots {
            if let Some(data) = slot.lock().as_ref() {
                let _exchange = data.exchange.lock();
                data.arrived.notify_all();
            }
        }
        for entry in self.tunneling.iter() {
            let _exchange = entry.exchange.lock();
            entry.arrived.notify_all();
        }
    }

    /// Check if the pool was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn remove(&self, category: RequestCategory, sequence: Option<u8>, data: &Arc<EventData>) {
        match (category.slot(), sequence) {
            (Some(index), _) => {
                let mut slot = self.slots[index].lock();
                if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, data)) {
                    *slot = None;
                }
            }
            (None, Some(sequence)) => {
                self.tunneling
                    .remove_if(&sequence, |_, current| Arc::ptr_eq(current, data));
            }
            (None, None) => {}
        }
    }
}

/// Registration handle; removes the entry from the pool when dropped
#[derive(Debug)]
pub struct EventGuard<'a> {
    pool: &'a EventPool,
    category: RequestCategory,
    sequence: Option<u8>,
    data: Arc<EventData>,
}

impl EventGuard<'_> {
    /// Category this entry was registered under
    pub fn category(&self) -> RequestCategory {
        self.category
    }

    /// Shared entry
    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Record a (re)send of the request
    pub fn mark_sent(&self) {
        self.data.exchange.lock().sent_at = Some(Instant::now());
    }

    /// Wait up to `timeout` for the response
    ///
    /// Returns `None` if no response arrived in time or the pool was
    /// cancelled. The wait proceeds in check-interval slices.
    pub fn await_response(&self, timeout: Duration) -> Option<Body> {
        let deadline = Instant::now() + timeout;
        let mut exchange = self.data.exchange.lock();

        loop {
            if let Some(response) = &exchange.response {
                return Some(response.clone());
            }
            if self.pool.is_cancelled() {
                return None;
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let slice = self.pool.check_interval.min(deadline - now);
            let _ = self.data.arrived.wait_for(&mut exchange, slice);
        }
    }
}

impl Drop for EventGuard<'_> {
    fn drop(&mut self) {
        self.pool.remove(self.category, self.sequence, &self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cemi::CemiFrame;
    use crate::protocol::frame::Hpai;
    use crate::protocol::services::{ConnectRequest, ConnectResponse, ConnectionStateResponse};
    use crate::protocol::tunneling::{TunnelingAck, TunnelingRequest};
    use crate::GroupAddress;
    use std::thread;

    fn connect_request() -> Body {
        Body::ConnectRequest(ConnectRequest::new(Hpai::nat(), Hpai::nat()))
    }

    fn tunneling_request(sequence: u8) -> Body {
        let ga = GroupAddress::new(1, 2, 3).unwrap();
        Body::TunnelingRequest(TunnelingRequest::new(1, sequence, CemiFrame::group_read(ga)))
    }

    #[test]
    fn test_single_slot_rejects_second_request() {
        let pool = EventPool::new(Duration::from_millis(10));
        let guard = pool.register(RequestCategory::Connect, connect_request()).unwrap();

        let err = pool
            .register(RequestCategory::Connect, connect_request())
            .unwrap_err();
        assert!(matches!(err, KnxError::EventPool(ref e) if e.is_slot_occupied()));

        // other categories are independent
        let _other = pool
            .register(RequestCategory::Description, connect_request())
            .unwrap();

        drop(guard);
        assert!(!pool.is_pending(RequestCategory::Connect));
        assert!(pool.register(RequestCategory::Connect, connect_request()).is_ok());
    }

    #[test]
    fn test_response_completes_waiter_across_threads() {
        let pool = Arc::new(EventPool::new(Duration::from_millis(10)));
        let waiter_pool = Arc::clone(&pool);

        let waiter = thread::spawn(move || {
            let guard = waiter_pool
                .register(RequestCategory::Connect, connect_request())
                .unwrap();
            guard.mark_sent();
            guard.await_response(Duration::from_secs(2))
        });

        while !pool.is_pending(RequestCategory::Connect) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(pool.complete(&Body::ConnectResponse(ConnectResponse::refused(0x24))));

        let response = waiter.join().unwrap();
        assert_eq!(response, Some(Body::ConnectResponse(ConnectResponse::refused(0x24))));
    }

    #[test]
    fn test_unmatched_response_is_ignored() {
        let pool = EventPool::new(Duration::from_millis(10));
        let stray = Body::ConnectionStateResponse(ConnectionStateResponse {
            channel_id: 1,
            status: 0,
        });
        assert!(!pool.complete(&stray));
        assert!(!pool.complete(&connect_request()));
    }

    #[test]
    fn test_first_response_wins() {
        let pool = EventPool::new(Duration::from_millis(10));
        let guard = pool.register(RequestCategory::Connect, connect_request()).unwrap();

        assert!(pool.complete(&Body::ConnectResponse(ConnectResponse::refused(1))));
        assert!(!pool.complete(&Body::ConnectResponse(ConnectResponse::refused(2))));
        assert_eq!(
            guard.await_response(Duration::from_millis(1)),
            Some(Body::ConnectResponse(ConnectResponse::refused(1)))
        );
        assert!(guard.data().has_response());
    }

    #[test]
    fn test_timeout_returns_none() {
        let pool = EventPool::new(Duration::from_millis(5));
        let guard = pool.register(RequestCategory::Connect, connect_request()).unwrap();

        let started = Instant::now();
        assert_eq!(guard.await_response(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_tunneling_entries_keyed_by_sequence() {
        let pool = EventPool::new(Duration::from_millis(10));
        let first = pool.register(RequestCategory::Tunneling, tunneling_request(5)).unwrap();
        let _second = pool.register(RequestCategory::Tunneling, tunneling_request(6)).unwrap();

        assert!(pool
            .register(RequestCategory::Tunneling, tunneling_request(5))
            .is_err());

        assert!(pool.complete(&Body::TunnelingAck(TunnelingAck::new(1, 5, 0))));
        assert!(!pool.complete(&Body::TunnelingAck(TunnelingAck::new(1, 7, 0))));
        assert!(first.await_response(Duration::ZERO).is_some());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let pool = Arc::new(EventPool::new(Duration::from_millis(10)));
        let waiter_pool = Arc::clone(&pool);

        let waiter = thread::spawn(move || {
            let guard = waiter_pool
                .register(RequestCategory::Disconnect, connect_request())
                .unwrap();
            let started = Instant::now();
            let response = guard.await_response(Duration::from_secs(10));
            (response, started.elapsed())
        });

        while !pool.is_pending(RequestCategory::Disconnect) {
            thread::sleep(Duration::from_millis(1));
        }
        pool.cancel();

        let (response, waited) = waiter.join().unwrap();
        assert_eq!(response, None);
        assert!(waited < Duration::from_secs(1));
        assert!(pool
            .register(RequestCategory::Connect, connect_request())
            .unwrap_err()
            .is_not_connected());
    }
}
