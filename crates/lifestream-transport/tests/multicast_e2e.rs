//! End-to-end multicast engine tests over the loopback route.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use lifestream_transport::{EngineKind, Frame, StreamingFactory};

const GROUP: &str = "239.255.0.21";
const WAIT: Duration = Duration::from_secs(5);

fn grid_payload() -> Vec<u8> {
    let mut payload = b"020x010".to_vec();
    payload.extend((0..200).map(|i| if i % 3 == 0 { b'#' } else { b' ' }));
    payload
}

fn round_trip(kind: EngineKind, port: u16) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("lifestream_transport=debug")
        .with_test_writer()
        .try_init();

    let factory = StreamingFactory::new(kind);
    let (client, server) = factory.create_pair();

    let (tx, rx) = unbounded::<Frame>();
    client.set_on_data_received(Arc::new(move |frame| {
        let _ = tx.send(frame);
    }));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let d = disconnected.clone();
    client.set_on_disconnected(Arc::new(move || {
        d.fetch_add(1, Ordering::SeqCst);
    }));

    server.start(GROUP, port, 2).unwrap();
    client.connect(GROUP, port).unwrap();
    thread::sleep(Duration::from_millis(100));

    let payload = grid_payload();
    let mut wire = payload.clone();
    wire.push(b'\n');
    server.broadcast_data(&wire);

    let frame = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(&frame[..], &payload[..]);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    client.disconnect();
    client.disconnect();
    server.stop();
    server.stop();
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    assert!(!client.is_connected());
    assert!(!server.is_running());
}

#[test]
fn test_multicast_round_trip() {
    round_trip(EngineKind::Multicast, 19221);
}

#[test]
fn test_pooled_multicast_round_trip() {
    round_trip(EngineKind::PooledMulticast, 19222);
}
