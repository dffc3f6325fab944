//! Connection admission: one client per acceptor, every other attempt refused.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use proptest::prelude::*;
use tagwire::fabric::{
    Admission, ConnRequest, Context, ContextParams, EndpointParams, ListenerParams, OpHandle, Status,
    Worker,
};
use tagwire::session::AcceptorState;
use tagwire::{ConnectionInitiator, SessionConfig, TransportError};

mod common;

use common::{
    await_raw_outcome, await_raw_verdict, connected_pair, listening_server, poll_raw, raw_attempt,
    RawOutcome, DEADLINE,
};

/// Open `n` raw attempts against one acceptor and progress it until all but
/// one have been refused. Returns the number of refused attempts.
fn run_attempts(n: usize) -> usize {
    let (mut server, addr) = listening_server();
    let mut attempts: Vec<_> = (0..n).map(|_| (raw_attempt(addr), Vec::new())).collect();
    let mut verdicts = vec![RawOutcome::Waiting; n];

    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        server.session_mut().progress();
        for (i, (stream, buf)) in attempts.iter_mut().enumerate() {
            if verdicts[i] == RawOutcome::Waiting {
                verdicts[i] = poll_raw(stream, buf);
            }
        }
        let decided = verdicts.iter().filter(|v| **v != RawOutcome::Waiting).count();
        if decided >= n - 1 && server.is_client_connected() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    // A few more rounds: the admitted attempt must stay untouched.
    for _ in 0..20 {
        server.session_mut().progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    for (i, (stream, buf)) in attempts.iter_mut().enumerate() {
        if verdicts[i] == RawOutcome::Waiting {
            verdicts[i] = poll_raw(stream, buf);
        }
    }

    assert!(server.is_client_connected());
    assert_eq!(server.state(), AcceptorState::RequestStored);
    assert_eq!(verdicts.iter().filter(|v| **v == RawOutcome::Closed).count(), 0);
    assert_eq!(verdicts.iter().filter(|v| **v == RawOutcome::Waiting).count(), 1);

    server.bind_endpoint().unwrap();
    assert_eq!(server.state(), AcceptorState::EndpointBound);

    verdicts.iter().filter(|v| **v == RawOutcome::Rejected).count()
}

#[test]
fn test_second_client_is_refused() {
    assert_eq!(run_attempts(2), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_single_admission(n in 2usize..6) {
        prop_assert_eq!(run_attempts(n), n - 1);
    }
}

#[test]
fn test_slot_is_not_rearmed_after_bind() {
    let (mut server, addr) = listening_server();
    let _first = raw_attempt(addr);
    server.wait_for_client().unwrap();
    server.bind_endpoint().unwrap();

    // The endpoint exists; a later attempt is still refused.
    let mut late = raw_attempt(addr);
    assert_eq!(await_raw_verdict(&mut server, &mut late), RawOutcome::Rejected);
    assert!(server.bind_endpoint().is_err());
}

#[test]
fn test_rejected_request_is_gone_from_worker() {
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
    let addr = worker.listener_local_addr(listener).unwrap();

    let mut first = raw_attempt(addr);
    let mut second = raw_attempt(addr);
    let start = Instant::now();
    while held.lock().unwrap().len() < 2 && start.elapsed() < DEADLINE {
        worker.progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    let mut requests = std::mem::take(&mut *held.lock().unwrap());
    assert_eq!(requests.len(), 2);
    assert_eq!(worker.resource_count(), 3);

    let client_addr = requests[0].query().unwrap().client_addr;
    assert_eq!(client_addr.ip().to_string(), "127.0.0.1");

    // Rejecting consumes the request; only the other one can become an endpoint.
    let rejected = requests.remove(0);
    worker.listener_reject(listener, rejected).unwrap();
    assert_eq!(worker.resource_count(), 2);

    let accepted = requests.remove(0);
    worker.ep_create(EndpointParams::from_request(accepted)).unwrap();
    assert_eq!(worker.resource_count(), 2);

    assert_eq!(await_raw_outcome(&mut first), RawOutcome::Rejected);
    assert_eq!(await_raw_outcome(&mut second), RawOutcome::Accepted);
}

#[test]
fn test_reject_with_wrong_listener_is_invalid() {
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
    let other = worker
        .listener_create(ListenerParams::new(
            "127.0.0.1:0".parse().unwrap(),
            Box::new(Admission::Refused),
        ))
        .unwrap();
    let addr = worker.listener_local_addr(listener).unwrap();

    let mut attempt = raw_attempt(addr);
    let start = Instant::now();
    while held.lock().unwrap().is_empty() && start.elapsed() < DEADLINE {
        worker.progress();
        std::thread::sleep(Duration::from_millis(1));
    }
    let request = held.lock().unwrap().pop().unwrap();
    assert_eq!(request.listener(), listener);
    assert_eq!(worker.resource_count(), 3);
    assert_eq!(worker.listener_reject(other, request), Err(Status::InvalidParam));

    // The request was consumed, so its connection is refused all the same.
    assert_eq!(worker.resource_count(), 2);
    assert_eq!(await_raw_outcome(&mut attempt), RawOutcome::Rejected);
}

#[test]
fn test_refused_client_send_fails_with_rejected() {
    let (mut server, _client) = connected_pair();
    let addr = server.local_addr().unwrap();

    let mut second = ConnectionInitiator::new().unwrap();
    second.connect("127.0.0.1", addr.port()).unwrap();
    let OpHandle::Pending(send_id) = second.send_message(vec![1, 2, 3, 4], 4) else {
        panic!("send before admission must be pending");
    };

    let start = Instant::now();
    while second.session().request_status(send_id).is_in_progress() && start.elapsed() < DEADLINE {
        server.session_mut().progress();
        second.session_mut().progress();
        std::thread::sleep(Duration::from_millis(1));
    }

    let err = second
        .session_mut()
        .wait_for_completion(OpHandle::Pending(send_id))
        .unwrap_err();
    assert!(matches!(err, TransportError::Operation(Status::Rejected)));
    assert_eq!(second.session().outstanding_requests(), 0);
}
