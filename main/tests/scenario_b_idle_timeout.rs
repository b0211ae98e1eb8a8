#[path = "support.rs"]
mod support;

use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

#[test]
fn idle_connection_is_closed_around_five_seconds() {
    let port = support::free_port();
    let _server = support::Server::start(port, &[]);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to echo server");
    stream.set_read_timeout(Some(Duration::from_secs(7))).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).expect("read should observe EOF, not time out");
    let elapsed = start.elapsed();

    assert_eq!(n, 0, "idle-timeout teardown should present as EOF");
    assert!(elapsed >= Duration::from_millis(4900), "closed too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(6500), "closed too late: {elapsed:?}");
}
