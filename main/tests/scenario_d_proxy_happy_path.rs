#[path = "support.rs"]
mod support;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[test]
fn proxy_relays_bytes_to_and_from_the_upstream_echo() {
    let upstream_port = support::free_port();
    let _upstream = support::Server::start(upstream_port, &[]);

    let proxy_port = support::free_port();
    let _proxy = support::Server::start(
        proxy_port,
        &[
            "--proxy",
            "--remote-ip",
            "127.0.0.1",
            "--remote-port",
            &upstream_port.to_string(),
        ],
    );

    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).expect("connect to proxy");
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    client.write_all(b"abc").expect("write through proxy");

    let mut buf = [0u8; 16];
    let mut total = Vec::new();
    while total.len() < 3 {
        let n = client.read(&mut buf).expect("read relayed bytes back");
        assert!(n > 0, "proxy closed before relaying all bytes");
        total.extend_from_slice(&buf[..n]);
    }
    assert_eq!(&total, b"abc");
}
