//! End-to-end tests against a scripted gateway on the loopback interface.
//!
//! The fake gateway answers on a single UDP socket for both the control and
//! the data endpoint. Every body it receives is recorded so tests can assert
//! on the exact traffic the client produced.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use knx_link::plugin::{ExtensionPlugin, ObserverPlugin, PluginRegistry};
use knx_link::protocol::services::{
    ConnectResponse, ConnectionStateResponse, DescriptionResponse, DeviceDescription, Dib,
    DisconnectRequest, DisconnectResponse,
};
use knx_link::protocol::{Body, CemiFrame, Hpai, ServiceFamily, TunnelingAck, TunnelingRequest};
use knx_link::{ga, ClientState, Config, IndividualAddress, KnxClient, KnxError, RequestCategory};

const CHANNEL_ID: u8 = 7;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Poll `condition` until it holds or `timeout` elapses
fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(ms(5));
    }
    condition()
}

// =============================================================================
// Fake gateway
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Script {
    answer_connect: bool,
    refuse_connect: Option<u8>,
    answer_heartbeat: bool,
    heartbeat_status: u8,
    answer_tunneling: bool,
    ack_status: u8,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            answer_connect: true,
            refuse_connect: None,
            answer_heartbeat: true,
            heartbeat_status: 0,
            answer_tunneling: true,
            ack_status: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Seen {
    bodies: Mutex<Vec<Body>>,
    client_control: Mutex<Option<SocketAddr>>,
    client_data: Mutex<Option<SocketAddr>>,
}

struct FakeGateway {
    socket: UdpSocket,
    endpoint: SocketAddrV4,
    seen: Arc<Seen>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeGateway {
    fn start(script: Script) -> Self {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket.set_read_timeout(Some(ms(20))).unwrap();
        let endpoint = match socket.local_addr().unwrap() {
            SocketAddr::V4(endpoint) => endpoint,
            SocketAddr::V6(_) => unreachable!("bound to an IPv4 address"),
        };

        let seen = Arc::new(Seen::default());
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let socket = socket.try_clone().unwrap();
            let seen = Arc::clone(&seen);
            let running = Arc::clone(&running);
            thread::spawn(move || serve(&socket, endpoint, script, &seen, &running))
        };

        Self {
            socket,
            endpoint,
            seen,
            running,
            handle: Some(handle),
        }
    }

    fn count(&self, predicate: impl Fn(&Body) -> bool) -> usize {
        self.seen.bodies.lock().iter().filter(|body| predicate(body)).count()
    }

    fn send_to_data(&self, body: &Body) {
        let target = self.seen.client_data.lock().expect("client data endpoint");
        self.socket.send_to(&body.encode().unwrap(), target).unwrap();
    }

    fn send_to_control(&self, body: &Body) {
        let target = self.seen.client_control.lock().expect("client control endpoint");
        self.socket.send_to(&body.encode().unwrap(), target).unwrap();
    }

    fn indication(&self, channel_id: u8, sequence: u8, data: &[u8]) -> Body {
        let mut cemi = CemiFrame::group_write(ga!(1 / 2 / 3), data).unwrap();
        cemi.source = IndividualAddress::new(1, 1, 5).unwrap();
        Body::TunnelingRequest(TunnelingRequest::new(channel_id, sequence, cemi))
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(socket: &UdpSocket, endpoint: SocketAddrV4, script: Script, seen: &Seen, running: &AtomicBool) {
    let mut buf = [0u8; 512];
    while running.load(Ordering::Acquire) {
        let Ok((len, source)) = socket.recv_from(&mut buf) else {
            continue;
        };
        let Ok(body) = Body::decode(&buf[..len]) else {
            continue;
        };
        seen.bodies.lock().push(body.clone());

        let answer = match &body {
            Body::DescriptionRequest(_) => Some(Body::DescriptionResponse(DescriptionResponse {
                dibs: vec![Dib::SupportedServiceFamilies(vec![
                    (ServiceFamily::Core, 1),
                    (ServiceFamily::Tunneling, 1),
                ])],
            })),
            Body::ConnectRequest(_) if script.refuse_connect.is_some() => script
                .refuse_connect
                .map(|status| Body::ConnectResponse(ConnectResponse::refused(status))),
            Body::ConnectRequest(request) if script.answer_connect => {
                *seen.client_control.lock() = Some(source);
                *seen.client_data.lock() = Some(request.data_endpoint.endpoint.into());
                Some(Body::ConnectResponse(ConnectResponse::accepted(
                    CHANNEL_ID,
                    Hpai::new(endpoint),
                    IndividualAddress::new(1, 1, 250).unwrap(),
                )))
            }
            Body::ConnectionStateRequest(request) if script.answer_heartbeat => {
                Some(Body::ConnectionStateResponse(ConnectionStateResponse {
                    channel_id: request.channel_id,
                    status: script.heartbeat_status,
                }))
            }
            Body::DisconnectRequest(request) => Some(Body::DisconnectResponse(DisconnectResponse {
                channel_id: request.channel_id,
                status: 0,
            })),
            Body::TunnelingRequest(request) if script.answer_tunneling => Some(Body::TunnelingAck(TunnelingAck::new(
                request.header.channel_id,
                request.header.sequence,
                script.ack_status,
            ))),
            _ => None,
        };

        if let Some(answer) = answer {
            let _ = socket.send_to(&answer.encode().unwrap(), source);
        }
    }
}

// =============================================================================
// Recording plugin
// =============================================================================

#[derive(Debug, Default)]
struct Recorder {
    incoming: AtomicUsize,
    errors: Mutex<Vec<String>>,
    started: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl ObserverPlugin for Recorder {
    fn on_incoming_body(&self, _body: &Body) {
        self.incoming.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &KnxError) {
        self.errors.lock().push(error.to_string());
    }
}

impl ExtensionPlugin for Recorder {
    fn on_start(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

fn plugins(recorder: &Arc<Recorder>) -> PluginRegistry {
    PluginRegistry::builder()
        .observer_arc(Arc::clone(recorder) as Arc<dyn ObserverPlugin>)
        .extension_arc(Arc::clone(recorder) as Arc<dyn ExtensionPlugin>)
        .build()
}

fn config(gateway: SocketAddrV4) -> knx_link::ConfigBuilder {
    let mut builder = Config::builder()
        .gateway(gateway)
        .local_ip(Ipv4Addr::LOCALHOST)
        .attempts(3)
        .check_interval(ms(5));
    for category in RequestCategory::ALL {
        builder = builder.timeout(category, ms(100));
    }
    builder
}

fn connected(gateway: &FakeGateway, recorder: &Arc<Recorder>) -> KnxClient {
    let _ = env_logger::builder().is_test(true).try_init();
    let client = KnxClient::new(config(gateway.endpoint).build().unwrap(), plugins(recorder)).unwrap();
    client.connect().unwrap();
    client
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_connect_and_close() {
    let gateway = FakeGateway::start(Script::default());
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    assert_eq!(client.state(), ClientState::Connected);
    assert_eq!(client.channel_id(), Some(CHANNEL_ID));
    assert_eq!(client.individual_address(), IndividualAddress::new(1, 1, 250).ok());
    assert_eq!(client.gateway(), Some(gateway.endpoint));
    let description = client.gateway_description().unwrap();
    assert!(description.supports(ServiceFamily::Tunneling));
    assert!(eventually(ms(500), || recorder.started.load(Ordering::SeqCst) == 1));

    client.close();
    assert_eq!(client.state(), ClientState::Closed);
    assert_eq!(gateway.count(|b| matches!(b, Body::DisconnectRequest(_))), 1);
    assert!(client.failure().is_none());
    assert!(eventually(ms(500), || recorder.shutdowns.load(Ordering::SeqCst) == 1));

    // closing twice is a no-op and the client cannot be reused
    client.close();
    assert!(client.connect().unwrap_err().is_not_connected());
    assert!(client.write_request(ga!(1 / 2 / 3), &[1]).unwrap_err().is_not_connected());
}

#[test]
fn test_connect_retries_then_times_out() {
    let gateway = FakeGateway::start(Script {
        answer_connect: false,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let client = KnxClient::new(config(gateway.endpoint).build().unwrap(), plugins(&recorder)).unwrap();

    let started = Instant::now();
    let err = client.connect().unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        KnxError::Connection(ref e) if e.timed_out_category() == Some(RequestCategory::Connect)
    ));
    assert_eq!(gateway.count(|b| matches!(b, Body::ConnectRequest(_))), 3);
    assert!(elapsed >= ms(300), "gave up after {elapsed:?}");
    assert!(elapsed < ms(2000), "took {elapsed:?}");
    assert_eq!(client.state(), ClientState::Closed);

    // never started, so no shutdown notification
    thread::sleep(ms(50));
    assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 0);
}

#[test]
fn test_refused_connect_is_not_retried() {
    let gateway = FakeGateway::start(Script {
        refuse_connect: Some(0x24),
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let client = KnxClient::new(config(gateway.endpoint).build().unwrap(), plugins(&recorder)).unwrap();

    let err = client.connect().unwrap_err();
    assert!(matches!(err, KnxError::Connection(ref e) if e.is_refused()));
    assert_eq!(gateway.count(|b| matches!(b, Body::ConnectRequest(_))), 1);
    assert_eq!(client.state(), ClientState::Closed);
    assert!(client.channel_id().is_none());
}

#[test]
fn test_write_is_acknowledged() {
    let gateway = FakeGateway::start(Script::default());
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    client.write_request(ga!(1 / 2 / 3), &[0x0C, 0x1A]).unwrap();
    knx_link::knx_read!(client, 1 / 2 / 3).unwrap();

    let requests: Vec<u8> = gateway
        .seen
        .bodies
        .lock()
        .iter()
        .filter_map(|body| match body {
            Body::TunnelingRequest(request) => Some(request.header.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec![0, 1]);

    // our own writes do not touch the status pool
    assert!(client.peek_status(ga!(1 / 2 / 3)).is_none());
}

#[test]
fn test_negative_ack_fails_the_write() {
    let gateway = FakeGateway::start(Script {
        ack_status: 0x29,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    let err = client.write_request(ga!(1 / 2 / 3), &[1]).unwrap_err();
    assert!(matches!(err, KnxError::Tunneling(ref e) if e.is_ack_failed()));
    assert_eq!(gateway.count(|b| matches!(b, Body::TunnelingRequest(_))), 1);
}

#[test]
fn test_unacked_write_retries_same_sequence() {
    let gateway = FakeGateway::start(Script {
        answer_tunneling: false,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    let started = Instant::now();
    let err = client.write_request(ga!(1 / 2 / 3), &[0x01]).unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(matches!(err, KnxError::Tunneling(ref e) if e.is_ack_timeout()));
    assert!(elapsed >= ms(300), "gave up after {elapsed:?}");
    assert!(elapsed < ms(2000), "took {elapsed:?}");

    let sequences: Vec<u8> = gateway
        .seen
        .bodies
        .lock()
        .iter()
        .filter_map(|body| match body {
            Body::TunnelingRequest(request) => Some(request.header.sequence),
            _ => None,
        })
        .collect();
    assert_eq!(sequences, vec![0, 0, 0]);
    assert_eq!(client.state(), ClientState::Connected);
}

#[test]
fn test_duplicate_indication_applied_once() {
    let gateway = FakeGateway::start(Script::default());
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    let indication = gateway.indication(CHANNEL_ID, 5, &[0x42]);
    gateway.send_to_data(&indication);
    gateway.send_to_data(&indication);

    let acks = || gateway.count(|b| matches!(b, Body::TunnelingAck(ack) if ack.header.sequence == 5));
    assert!(eventually(ms(1000), || acks() == 2));

    let status = client.status(ga!(1 / 2 / 3)).unwrap();
    assert_eq!(status.value, vec![0x42]);
    assert!(status.is_dirty());
    assert!(!client.status(ga!(1 / 2 / 3)).unwrap().is_dirty());
    assert!(eventually(ms(500), || recorder.incoming.load(Ordering::SeqCst) >= 1));

    // the next sequence is applied again
    gateway.send_to_data(&gateway.indication(CHANNEL_ID, 6, &[0x43]));
    assert!(eventually(ms(1000), || {
        client.peek_status(ga!(1 / 2 / 3)).is_some_and(|s| s.value == [0x43])
    }));
}

#[test]
fn test_wrong_channel_is_rejected() {
    let gateway = FakeGateway::start(Script::default());
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    gateway.send_to_data(&gateway.indication(CHANNEL_ID + 1, 0, &[0x01]));

    assert!(eventually(ms(1000), || recorder.errors.lock().len() == 1));
    thread::sleep(ms(50));
    assert!(client.peek_status(ga!(1 / 2 / 3)).is_none());
    assert_eq!(gateway.count(|b| matches!(b, Body::TunnelingAck(_))), 0);
    assert_eq!(client.state(), ClientState::Connected);
}

#[test]
fn test_gateway_disconnect_closes_client() {
    let gateway = FakeGateway::start(Script::default());
    let recorder = Arc::new(Recorder::default());
    let client = connected(&gateway, &recorder);

    gateway.send_to_control(&Body::DisconnectRequest(DisconnectRequest::new(
        CHANNEL_ID,
        Hpai::new(gateway.endpoint),
    )));

    assert!(client.wait_closed(Some(ms(2000))));
    assert!(client.failure().is_some_and(|e| matches!(&*e, KnxError::Connection(c) if c.is_lost())));
    assert!(eventually(ms(1000), || {
        gateway.count(|b| matches!(b, Body::DisconnectResponse(_))) == 1
    }));
    // the gateway already dropped the tunnel, so we never ask
    assert_eq!(gateway.count(|b| matches!(b, Body::DisconnectRequest(_))), 0);
    assert!(eventually(ms(500), || recorder.shutdowns.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_liveness_failure_closes_once() {
    let gateway = FakeGateway::start(Script {
        answer_heartbeat: false,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let _ = env_logger::builder().is_test(true).try_init();

    let config = config(gateway.endpoint)
        .heartbeat_interval(ms(100))
        .alive_timeout(ms(250))
        .build()
        .unwrap();
    let client = KnxClient::new(config, plugins(&recorder)).unwrap();
    client.connect().unwrap();

    assert!(client.wait_closed(Some(ms(5000))));
    assert_eq!(client.state(), ClientState::Closed);
    assert!(gateway.count(|b| matches!(b, Body::ConnectionStateRequest(_))) >= 1);

    assert!(eventually(ms(1000), || recorder.shutdowns.load(Ordering::SeqCst) == 1));
    thread::sleep(ms(100));
    assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.errors.lock().len(), 1);
    assert!(client.write_request(ga!(1 / 2 / 3), &[1]).unwrap_err().is_not_connected());
}

fn heartbeat_client(gateway: &FakeGateway, recorder: &Arc<Recorder>, alive_timeout: Duration) -> KnxClient {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = config(gateway.endpoint)
        .heartbeat_interval(ms(100))
        .alive_timeout(alive_timeout)
        .build()
        .unwrap();
    let client = KnxClient::new(config, plugins(recorder)).unwrap();
    client.connect().unwrap();
    client
}

#[test]
fn test_unknown_channel_heartbeat_closes_at_once() {
    let gateway = FakeGateway::start(Script {
        heartbeat_status: 0x21,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    // a long alive timeout: only the error answer can close the client in time
    let client = heartbeat_client(&gateway, &recorder, Duration::from_secs(30));

    assert!(client.wait_closed(Some(ms(2000))), "still {}", client.state());
    assert!(client.failure().is_some_and(|e| matches!(&*e, KnxError::Connection(c) if c.is_lost())));
    assert_eq!(gateway.count(|b| matches!(b, Body::ConnectionStateRequest(_))), 1);
    // the gateway dropped the channel already
    assert_eq!(gateway.count(|b| matches!(b, Body::DisconnectRequest(_))), 0);
    assert!(eventually(ms(1000), || recorder.shutdowns.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_heartbeat_error_answers_do_not_keep_alive() {
    let gateway = FakeGateway::start(Script {
        heartbeat_status: 0x27,
        ..Script::default()
    });
    let recorder = Arc::new(Recorder::default());
    let client = heartbeat_client(&gateway, &recorder, ms(350));

    assert!(client.wait_closed(Some(ms(3000))), "still {}", client.state());
    assert!(client.failure().is_some_and(|e| matches!(&*e, KnxError::Connection(c) if c.is_lost())));
    assert!(gateway.count(|b| matches!(b, Body::ConnectionStateRequest(_))) >= 2);
}

/// Observer that takes far longer than any close should
struct Sluggish;

impl ObserverPlugin for Sluggish {
    fn on_outgoing_body(&self, _body: &Body) {
        thread::sleep(Duration::from_secs(2));
    }
}

#[test]
fn test_slow_observer_does_not_stall_close() {
    let _ = env_logger::builder().is_test(true).try_init();
    let gateway = FakeGateway::start(Script::default());
    let config = config(gateway.endpoint).pool_size(1).build().unwrap();
    let plugins = PluginRegistry::builder().observer(Sluggish).build();
    let client = KnxClient::new(config, plugins).unwrap();
    client.connect().unwrap();

    let started = Instant::now();
    client.close();
    let elapsed = started.elapsed();

    assert_eq!(client.state(), ClientState::Closed);
    assert!(elapsed < ms(1500), "close took {elapsed:?}");
    assert_eq!(gateway.count(|b| matches!(b, Body::DisconnectRequest(_))), 1);
}
