mod common;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::*;
use mqttlink::network::application::mqtt::client::SUBSCRIBE_MESSAGE_ID;
use mqttlink::network::application::mqtt::{Client, QoS};
use mqttlink::network::error::Error;
use mqttlink::session::supervisor::DISCONNECT_PAUSE;
use mqttlink::session::{
    ConnectionState, Delay, Dispatcher, Phase, Producer, Publisher, Supervisor,
};

type Received = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

type Established = (
    Client<MockNetwork>,
    SharedWire,
    Dispatcher,
    ConnectionState,
    Received,
);

fn dispatcher_with_sink(state: &ConnectionState, capacity: usize) -> (Dispatcher, Received) {
    let received: Received = Arc::default();
    let sink = Arc::clone(&received);
    let dispatcher = Dispatcher::new(state.clone(), "my/subscribe/topic", capacity)
        .unwrap()
        .with_sink(move |topic: &str, payload: &[u8]| {
            sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
        });
    (dispatcher, received)
}

/// A connected client whose CONNACK has been dispatched, with the wire
/// cleared of CONNECT and SUBSCRIBE.
fn established(capacity: usize) -> Established {
    let (client, wire) = connected_client();
    let state = ConnectionState::new();
    let (mut dispatcher, received) = dispatcher_with_sink(&state, capacity);
    wire.feed(&connack(0));
    client.input(&mut dispatcher).unwrap();
    wire.take_written();
    (client, wire, dispatcher, state, received)
}

// Event dispatcher

#[test]
fn test_connack_sets_connected_and_subscribes() {
    let (client, wire) = connected_client();
    let state = ConnectionState::new();
    let (mut dispatcher, _) = dispatcher_with_sink(&state, 128);

    wire.feed(&connack(0));
    client.input(&mut dispatcher).unwrap();

    assert!(state.is_connected());
    let packets = wire.written_packets();
    assert_eq!(packet_types(&packets), vec![0x80]);
    assert_eq!(&packets[0].1[..2], &SUBSCRIBE_MESSAGE_ID.to_be_bytes());
}

#[test]
fn test_refused_connack_does_not_connect() {
    let (client, wire) = connected_client();
    let state = ConnectionState::new();
    let (mut dispatcher, _) = dispatcher_with_sink(&state, 128);

    wire.feed(&connack(4));
    assert_eq!(client.input(&mut dispatcher), Err(Error::ConnectionRefused(4)));
    assert!(!state.is_connected());
    assert!(wire.take_written().is_empty());
}

#[test]
fn test_disconnect_clears_connected() {
    let (client, _wire, mut dispatcher, state, _) = established(128);
    assert!(state.is_connected());

    client.disconnect(&mut dispatcher).unwrap();
    assert!(!state.is_connected());
}

#[test]
fn test_rejected_subscription_keeps_session() {
    let (client, wire, mut dispatcher, state, _) = established(128);
    wire.feed(&suback(SUBSCRIBE_MESSAGE_ID, 0x80));

    client.input(&mut dispatcher).unwrap();
    assert!(state.is_connected());
    assert!(client.is_open());
}

#[test]
fn test_publish_fits_is_acked_and_delivered() {
    let (client, wire, mut dispatcher, _, received) = established(128);
    wire.feed(&publish("my/subscribe/topic", 1, 0x0102, b"hello"));

    client.input(&mut dispatcher).unwrap();

    assert_eq!(wire.take_written(), puback(0x0102));
    assert_eq!(
        *received.lock().unwrap(),
        vec![("my/subscribe/topic".to_string(), b"hello".to_vec())]
    );
    assert_eq!(dispatcher.payload().contents(), Some(&b"hello"[..]));
}

#[test]
fn test_oversized_publish_is_acked_and_dropped() {
    let (client, wire, mut dispatcher, _, received) = established(8);
    wire.feed(&publish("my/subscribe/topic", 1, 9, &[b'z'; 40]));
    wire.feed(&pingresp());

    client.input(&mut dispatcher).unwrap();

    assert_eq!(wire.take_written(), puback(9));
    assert!(received.lock().unwrap().is_empty());
    assert!(dispatcher.payload().contents().is_none());

    // The body was drained in full, so the next packet parses cleanly.
    assert_eq!(wire.unread(), 2);
    client.input(&mut dispatcher).unwrap();
    assert_eq!(wire.unread(), 0);
    assert!(client.is_open());
}

#[test]
fn test_empty_publish_is_acked_without_reading() {
    let (client, wire, mut dispatcher, _, received) = established(128);
    wire.feed(&publish("my/subscribe/topic", 1, 3, b""));

    client.input(&mut dispatcher).unwrap();

    assert_eq!(wire.take_written(), puback(3));
    assert_eq!(
        *received.lock().unwrap(),
        vec![("my/subscribe/topic".to_string(), Vec::new())]
    );
}

#[test]
fn test_qos0_publish_is_not_acked() {
    let (client, wire, mut dispatcher, _, received) = established(128);
    wire.feed(&publish("my/subscribe/topic", 0, 0, b"x"));

    client.input(&mut dispatcher).unwrap();

    assert!(wire.take_written().is_empty());
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[test]
fn test_truncated_publish_disconnects_without_ack() {
    let (client, wire, mut dispatcher, state, received) = established(128);
    let mut packet = publish("my/subscribe/topic", 1, 5, b"0123456789");
    packet.truncate(packet.len() - 6);
    wire.feed(&packet);
    wire.lock().eof = true;

    client.input(&mut dispatcher).unwrap();

    let packets = wire.written_packets();
    assert_eq!(packet_types(&packets), vec![0xE0]);
    assert!(!state.is_connected());
    assert!(!client.is_open());
    assert!(received.lock().unwrap().is_empty());
}

#[test]
fn test_dispatcher_rejects_bad_topic() {
    let state = ConnectionState::new();
    assert!(Dispatcher::new(state.clone(), "", 16).is_err());
    assert!(Dispatcher::new(state, &"t".repeat(257), 16).is_err());
}

// Connection state

#[test]
fn test_writer_waits_for_reader_holding_the_flag() {
    let state = ConnectionState::new();
    let written = Arc::new(AtomicBool::new(false));

    let writer = state.with_connected(|connected| {
        assert!(!connected);
        let writer = {
            let state = state.clone();
            let written = Arc::clone(&written);
            thread::spawn(move || {
                state.set_connected(true);
                written.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!written.load(Ordering::SeqCst));
        writer
    });

    writer.join().unwrap();
    assert!(written.load(Ordering::SeqCst));
    assert!(state.is_connected());
}

#[test]
fn test_concurrent_toggling() {
    let state = ConnectionState::new();
    let writers: Vec<_> = (0..4)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || {
                for n in 0..1000 {
                    state.set_connected((n + i) % 2 == 0);
                }
            })
        })
        .collect();

    for _ in 0..1000 {
        state.with_connected(|_| ());
        let _ = state.is_connected();
    }
    for writer in writers {
        writer.join().unwrap();
    }

    state.set_connected(false);
    assert!(!state.is_connected());
}

// Reconnect supervisor

type SupervisorParts = (Supervisor<MockNetwork, RecordingDelay>, RecordingDelay, ConnectionState);

fn supervisor(network: MockNetwork) -> SupervisorParts {
    supervisor_with_keepalive(network, 60)
}

fn supervisor_with_keepalive(network: MockNetwork, keep_alive_seconds: u16) -> SupervisorParts {
    let mut options = mqttlink::network::application::mqtt::Options::new("dev-1").unwrap();
    options.keep_alive_seconds = keep_alive_seconds;
    let client = Arc::new(Client::new(network, broker_addr(), options, 128, 128).unwrap());
    let state = ConnectionState::new();
    let dispatcher = Dispatcher::new(state.clone(), "my/subscribe/topic", 128).unwrap();
    let delay = RecordingDelay::default();
    let supervisor = Supervisor::new(client, dispatcher, Duration::from_secs(60), delay.clone());
    (supervisor, delay, state)
}

#[test]
fn test_supervisor_retries_until_connected() {
    let network = MockNetwork::new();
    network.script([Err(Error::Timeout), Err(Error::Timeout), Ok(())]);
    let wire = network.wire.clone();
    let (mut supervisor, delay, state) = supervisor(network);

    assert_eq!(supervisor.phase(), Phase::Disconnected);

    supervisor.step();
    assert_eq!(supervisor.attempts(), 1);
    assert_eq!(supervisor.phase(), Phase::Connecting);
    assert!(delay.recorded().is_empty());

    supervisor.step();
    assert_eq!(supervisor.attempts(), 2);
    assert_eq!(supervisor.phase(), Phase::Connecting);

    supervisor.step();
    assert_eq!(supervisor.attempts(), 3);
    assert_eq!(supervisor.phase(), Phase::Connected);
    assert_eq!(delay.recorded(), vec![Duration::from_secs(60); 2]);
    assert_eq!(wire.lock().connects, 3);
    assert!(!state.is_connected());

    wire.take_written();
    wire.feed(&connack(0));
    supervisor.step();

    assert!(state.is_connected());
    assert_eq!(packet_types(&wire.written_packets()), vec![0x80]);
    assert_eq!(supervisor.phase(), Phase::Connected);
}

#[test]
fn test_supervisor_keeps_retrying_a_dead_broker() {
    let network = MockNetwork::new();
    network.script(std::iter::repeat_n(Err(Error::Timeout), 100));
    let (mut supervisor, delay, state) = supervisor(network);

    for attempt in 1..=100 {
        supervisor.step();
        assert_eq!(supervisor.attempts(), attempt);
        assert_eq!(supervisor.phase(), Phase::Connecting);
    }

    let sleeps = delay.recorded();
    assert_eq!(sleeps.len(), 99);
    assert!(sleeps.iter().all(|d| *d >= Duration::from_secs(60)));
    assert!(!state.is_connected());
}

#[test]
fn test_supervisor_idle_step_keeps_session() {
    let (mut supervisor, delay, _) = supervisor(MockNetwork::new());
    supervisor.step();
    assert_eq!(supervisor.phase(), Phase::Connected);

    for _ in 0..5 {
        supervisor.step();
    }
    assert_eq!(supervisor.phase(), Phase::Connected);
    assert_eq!(supervisor.attempts(), 1);
    assert!(delay.recorded().is_empty());
}

#[test]
fn test_supervisor_tears_down_on_poll_error() {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let (mut supervisor, delay, state) = supervisor(network);

    supervisor.step();
    wire.feed(&connack(0));
    supervisor.step();
    assert!(state.is_connected());
    wire.take_written();

    wire.lock().fail_reads = true;
    supervisor.step();

    assert_eq!(supervisor.phase(), Phase::Disconnected);
    assert!(!state.is_connected());
    assert!(!supervisor.client().is_open());
    assert_eq!(packet_types(&wire.written_packets()), vec![0xE0]);
    assert_eq!(delay.recorded(), vec![DISCONNECT_PAUSE]);

    // The attempt counter never resets, so the reconnect waits the backoff.
    supervisor.step();
    assert_eq!(supervisor.attempts(), 2);
    assert_eq!(supervisor.phase(), Phase::Connected);
    assert_eq!(
        delay.recorded(),
        vec![DISCONNECT_PAUSE, Duration::from_secs(60)]
    );
}

#[test]
fn test_supervisor_tears_down_on_refused_connack() {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let (mut supervisor, _, state) = supervisor(network);

    supervisor.step();
    wire.feed(&connack(5));
    supervisor.step();

    assert_eq!(supervisor.phase(), Phase::Disconnected);
    assert!(!state.is_connected());
}

#[test]
fn test_supervisor_tears_down_on_peer_close() {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let (mut supervisor, _, state) = supervisor(network);

    supervisor.step();
    wire.feed(&connack(0));
    supervisor.step();
    wire.lock().eof = true;
    supervisor.step();

    assert_eq!(supervisor.phase(), Phase::Disconnected);
    assert!(!state.is_connected());
}

#[test]
fn test_supervisor_tears_down_on_missed_pingresp() {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let (mut supervisor, delay, state) = supervisor_with_keepalive(network, 1);

    supervisor.step();
    wire.feed(&connack(0));
    supervisor.step();
    assert!(state.is_connected());
    wire.take_written();

    thread::sleep(Duration::from_millis(1100));
    supervisor.step();
    assert_eq!(supervisor.phase(), Phase::Connected);
    assert_eq!(packet_types(&wire.written_packets()), vec![0xC0]);

    // No PINGRESP arrives before the next ping falls due.
    thread::sleep(Duration::from_millis(1100));
    supervisor.step();

    assert_eq!(supervisor.phase(), Phase::Disconnected);
    assert!(!state.is_connected());
    assert!(!supervisor.client().is_open());
    assert_eq!(packet_types(&wire.written_packets()), vec![0xE0]);
    assert_eq!(delay.recorded(), vec![DISCONNECT_PAUSE]);
}

#[test]
fn test_supervisor_tears_down_after_truncated_publish() {
    let network = MockNetwork::new();
    let wire = network.wire.clone();
    let (mut supervisor, delay, state) = supervisor(network);

    supervisor.step();
    wire.feed(&connack(0));
    supervisor.step();
    assert!(state.is_connected());
    wire.take_written();

    let packet = publish("my/subscribe/topic", 1, 7, b"hello world");
    wire.feed(&packet[..packet.len() - 4]);
    supervisor.step();

    // The dispatcher dropped the session without acknowledging.
    assert!(!state.is_connected());
    assert!(!supervisor.client().is_open());
    assert_eq!(packet_types(&wire.written_packets()), vec![0xE0]);
    assert_eq!(supervisor.phase(), Phase::Connected);
    assert!(delay.recorded().is_empty());

    supervisor.step();
    assert_eq!(supervisor.phase(), Phase::Disconnected);
    assert_eq!(delay.recorded(), vec![DISCONNECT_PAUSE]);
    assert!(wire.written_packets().is_empty());
}

// Producer

/// Virtual clock advanced only by [`ClockDelay`].
#[derive(Debug, Clone, Default)]
struct Clock(Arc<AtomicU64>);

impl Clock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Default)]
struct ClockDelay(Clock);

impl Delay for ClockDelay {
    fn sleep(&mut self, duration: Duration) {
        self.0.0.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct FakePublisher {
    clock: Clock,
    fail: bool,
    sent: Mutex<Vec<(Duration, String, QoS, Vec<u8>)>>,
}

impl Publisher for FakePublisher {
    fn publish(&self, topic: &str, qos: QoS, payload: &[u8]) -> Result<u16, Error> {
        if self.fail {
            return Err(Error::NotOpen);
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((self.clock.now(), topic.to_string(), qos, payload.to_vec()));
        Ok(sent.len() as u16)
    }
}

#[test]
fn test_producer_publishes_once_per_period() {
    let clock = Clock::default();
    let publisher = Arc::new(FakePublisher {
        clock: clock.clone(),
        ..Default::default()
    });
    let state = ConnectionState::new();
    state.set_connected(true);
    let mut producer = Producer::new(
        Arc::clone(&publisher),
        state,
        "my/publish/topic",
        b"1",
        Duration::from_secs(5),
        ClockDelay(clock.clone()),
    );

    while clock.now() < Duration::from_secs(12) {
        producer.cycle();
    }

    let sent = publisher.sent.lock().unwrap();
    let in_window: Vec<_> = sent
        .iter()
        .filter(|(at, ..)| *at <= Duration::from_secs(12))
        .collect();
    assert_eq!(in_window.len(), 2);
    assert_eq!(in_window[0].0, Duration::from_secs(5));
    assert_eq!(in_window[1].0, Duration::from_secs(10));
    assert_eq!(in_window[0].1, "my/publish/topic");
    assert_eq!(in_window[0].2, QoS::AtLeastOnce);
    assert_eq!(in_window[0].3, b"1");
}

#[test]
fn test_producer_skips_while_disconnected() {
    let publisher = Arc::new(FakePublisher::default());
    let state = ConnectionState::new();
    let mut producer = Producer::new(
        Arc::clone(&publisher),
        state.clone(),
        "t",
        b"1",
        Duration::from_secs(5),
        ClockDelay::default(),
    );

    assert_eq!(producer.cycle(), None);
    assert_eq!(producer.tick(), None);
    assert!(publisher.sent.lock().unwrap().is_empty());

    state.set_connected(true);
    assert_eq!(producer.tick(), Some(Ok(1)));
}

#[test]
fn test_producer_reports_publish_failure() {
    let publisher = Arc::new(FakePublisher {
        fail: true,
        ..Default::default()
    });
    let state = ConnectionState::new();
    state.set_connected(true);
    let producer = Producer::new(
        publisher,
        state,
        "t",
        b"1",
        Duration::from_secs(5),
        ClockDelay::default(),
    );
    assert_eq!(producer.tick(), Some(Err(Error::NotOpen)));
}

#[test]
fn test_producer_through_client() {
    let (client, wire) = connected_client();
    let client = Arc::new(client);
    let state = ConnectionState::new();
    state.set_connected(true);
    let producer = Producer::new(
        Arc::clone(&client),
        state,
        "my/publish/topic",
        b"1",
        Duration::from_secs(5),
        ClockDelay::default(),
    );

    let id = producer.tick().unwrap().unwrap();
    let packets = wire.written_packets();
    assert_eq!(packets[0].0, 0x32);
    assert!(packets[0].1.ends_with(&[(id >> 8) as u8, id as u8, b'1']));
}

#[test]
fn test_producer_and_dispatcher_do_not_deadlock() {
    let (client, wire, dispatcher, state, _) = established(128);
    let client = Arc::new(client);
    let mut dispatcher = dispatcher;

    let producer = Producer::new(
        Arc::clone(&client),
        state.clone(),
        "my/publish/topic",
        b"1",
        Duration::ZERO,
        ClockDelay::default(),
    );
    let publishing = thread::spawn(move || {
        for _ in 0..500 {
            let _ = producer.tick();
        }
    });

    for i in 0..200u16 {
        wire.feed(&publish("my/subscribe/topic", 1, i + 1, b"ping"));
        client.input(&mut dispatcher).unwrap();
    }

    publishing.join().unwrap();
    assert!(state.is_connected());
    assert_eq!(wire.unread(), 0);
}
