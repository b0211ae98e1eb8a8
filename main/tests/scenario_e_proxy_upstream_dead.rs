#[path = "support.rs"]
mod support;

use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

#[test]
fn dead_upstream_tears_down_within_five_seconds_and_server_keeps_serving() {
    // A free port nobody is listening on, per scenario E.
    let dead_upstream_port = support::free_port();

    let proxy_port = support::free_port();
    let _proxy = support::Server::start(
        proxy_port,
        &[
            "--proxy",
            "--remote-ip",
            "127.0.0.1",
            "--remote-port",
            &dead_upstream_port.to_string(),
        ],
    );

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).expect("connect to proxy");
    client.set_read_timeout(Some(Duration::from_secs(7))).unwrap();

    let start = Instant::now();
    let mut buf = [0u8; 8];
    let n = client.read(&mut buf).expect("read should observe EOF, not time out");
    let elapsed = start.elapsed();

    assert_eq!(n, 0, "dead-upstream teardown should present as EOF");
    assert!(elapsed <= Duration::from_millis(6500), "torn down too late: {elapsed:?}");

    // The listener itself must still be alive for new connections.
    let second = TcpStream::connect(("127.0.0.1", proxy_port));
    assert!(second.is_ok(), "proxy server should keep serving after a torn-down session");
}
