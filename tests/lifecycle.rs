//! Setup failures, teardown, peer errors and idle progress.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tagwire::demo::{encode_sequence, payload_len};
use tagwire::fabric::{
    Admission, ConnRequest, Context, ContextParams, EndpointId, EndpointParams, ErrHandlingMode,
    ListenerParams, OpHandle, RequestParams, Status, Tag, TagMask, Worker,
};
use tagwire::session::{AcceptorState, SetupStage};
use tagwire::{ConnectionAcceptor, ConnectionInitiator, SessionConfig, TransportError, TransportSession};

mod common;

use common::{await_raw_verdict, connected_pair, listening_server, raw_attempt, RawOutcome, DEADLINE};

// --- Teardown ---

#[test]
fn test_drop_never_used_roles() {
    drop(TransportSession::new().unwrap());
    drop(ConnectionInitiator::new().unwrap());
    drop(ConnectionAcceptor::new().unwrap());
}

#[test]
fn test_drop_listening_acceptor_releases_port() {
    let (server, addr) = listening_server();
    drop(server);

    // The port can be bound again.
    let mut again = ConnectionAcceptor::new().unwrap();
    assert_eq!(again.listen("127.0.0.1", addr.port()).unwrap(), addr);
}

#[test]
fn test_drop_with_stored_request_rejects_client() {
    let (mut server, addr) = listening_server();
    let mut attempt = raw_attempt(addr);
    server.wait_for_client().unwrap();
    assert_eq!(server.state(), AcceptorState::RequestStored);

    drop(server);

    let mut buf = Vec::new();
    let mut verdict = RawOutcome::Waiting;
    let start = Instant::now();
    while verdict == RawOutcome::Waiting && start.elapsed() < DEADLINE {
        verdict = common::poll_raw(&mut attempt, &mut buf);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(verdict, RawOutcome::Rejected);
}

#[test]
fn test_drop_after_transfer() {
    let (server, mut client) = connected_pair();
    let send = client.send_message(encode_sequence(1, 4), payload_len(4));
    client.session_mut().wait_for_completion(send).unwrap();
    drop(client);
    drop(server);
}

// --- Fatal setup failures ---

#[test]
fn test_configuration_failure_raises() {
    let mut config = SessionConfig::default();
    config.context.features = vec!["stream".to_string()];
    let err = ConnectionAcceptor::with_config(&config).unwrap_err();
    assert!(matches!(
        err,
        TransportError::Configuration {
            stage: SetupStage::Context,
            status: Status::Unsupported
        }
    ));
}

#[test]
fn test_demo_and_logging_settings_do_not_block_sessions() {
    let mut configs = Vec::new();
    for count in [0, 5_000_000] {
        let mut config = SessionConfig::default();
        config.demo.count = count;
        configs.push(config);
    }
    let mut config = SessionConfig::default();
    config.observability.log_level = "verbose".to_string();
    configs.push(config);

    for config in &configs {
        TransportSession::with_config(config).unwrap();
        ConnectionInitiator::with_config(config).unwrap();
        ConnectionAcceptor::with_config(config).unwrap();
    }
}

#[test]
fn test_listener_failure_leaves_nothing_behind() {
    let (_holder, addr) = listening_server();

    let mut server = ConnectionAcceptor::new().unwrap();
    let err = server.listen("127.0.0.1", addr.port()).unwrap_err();
    assert!(matches!(err, TransportError::Listener { status: Status::Busy, .. }));
    assert_eq!(server.state(), AcceptorState::Idle);
    assert_eq!(server.session().resource_count(), 0);
}

#[test]
fn test_connect_twice_is_refused() {
    let (_server, mut client) = connected_pair();
    let endpoint = client.endpoint().unwrap();
    let err = client.connect("127.0.0.1", 1).unwrap_err();
    assert_eq!(err.status(), Status::AlreadyExists);
    assert_eq!(client.endpoint(), Some(endpoint));
}

// --- Peer errors ---

#[test]
fn test_peer_error_is_reported_not_raised() {
    let (mut server, addr) = listening_server();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);

    let mut client = ConnectionInitiator::new().unwrap();
    client.on_peer_error(Arc::new(move |_ep: EndpointId, status: Status| {
        assert!(status.is_err());
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    client.connect("127.0.0.1", addr.port()).unwrap();
    server.wait_for_client().unwrap();
    server.bind_endpoint().unwrap();

    drop(server);

    let start = Instant::now();
    while errors.load(Ordering::SeqCst) == 0 && start.elapsed() < DEADLINE {
        client.session_mut().progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    // Sending on the failed endpoint reports the failure as a status.
    let handle = client.send_message(vec![0u8; 4], 4);
    assert!(handle.status().is_err());
}

#[test]
fn test_peer_error_does_not_disturb_other_endpoint() {
    let context = Context::init(&ContextParams::default(), &SessionConfig::default()).unwrap();
    let mut worker = Worker::create(&context, &context.worker_defaults()).unwrap();

    let held: Arc<Mutex<Vec<ConnRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&held);
    let listener = worker
        .listener_create(ListenerParams::new(
            "127.0.0.1:0".parse().unwrap(),
            Box::new(move |req: ConnRequest| {
                sink.lock().unwrap().push(req);
                Admission::Held
            }),
        ))
        .unwrap();
    let port = worker.listener_local_addr(listener).unwrap().port();

    let mut doomed = ConnectionInitiator::new().unwrap();
    doomed.connect("127.0.0.1", port).unwrap();
    let mut healthy = ConnectionInitiator::new().unwrap();
    healthy.connect("127.0.0.1", port).unwrap();

    let start = Instant::now();
    while held.lock().unwrap().len() < 2 && start.elapsed() < DEADLINE {
        worker.progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    let failures = Arc::new(AtomicUsize::new(0));
    for request in std::mem::take(&mut *held.lock().unwrap()) {
        let seen = Arc::clone(&failures);
        worker
            .ep_create(
                EndpointParams::from_request(request)
                    .err_mode(ErrHandlingMode::Peer)
                    .err_handler(Arc::new(move |_ep: EndpointId, _status: Status| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })),
            )
            .unwrap();
    }

    let recv = worker.tag_recv_nb(vec![0u8; 8], 8, Tag(0), TagMask::FULL, &RequestParams::default());
    let OpHandle::Pending(recv_id) = recv else {
        panic!("receive must be pending");
    };

    drop(doomed);
    let start = Instant::now();
    while failures.load(Ordering::SeqCst) == 0 && start.elapsed() < DEADLINE {
        worker.progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(worker.request_check_status(recv_id), Status::InProgress);

    let send = healthy.send_message(encode_sequence(7, 2), 8);
    healthy.session_mut().wait_for_completion(send).unwrap();

    let start = Instant::now();
    while worker.request_check_status(recv_id).is_in_progress() && start.elapsed() < DEADLINE {
        worker.progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    let completion = worker.request_release(recv_id).unwrap();
    assert_eq!(completion.data(), encode_sequence(7, 2).as_slice());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

// --- Idle progress ---

#[test]
fn test_idle_progress_has_no_effect() {
    let mut session = TransportSession::new().unwrap();
    for _ in 0..1000 {
        assert_eq!(session.progress(), 0);
    }
    assert_eq!(session.outstanding_requests(), 0);
    assert_eq!(session.resource_count(), 0);

    let (mut server, _addr) = listening_server();
    for _ in 0..1000 {
        assert_eq!(server.session_mut().progress(), 0);
    }
    assert_eq!(server.state(), AcceptorState::Listening);
    assert_eq!(server.session().resource_count(), 1);
}

#[test]
fn test_late_attempt_after_bind_is_refused() {
    let (mut server, client) = connected_pair();
    let addr = server.local_addr().unwrap();
    let mut late = raw_attempt(addr);
    assert_eq!(await_raw_verdict(&mut server, &mut late), RawOutcome::Rejected);
    assert!(client.is_connected());
}
