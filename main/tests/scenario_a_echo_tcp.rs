#[path = "support.rs"]
mod support;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[test]
fn echo_tcp_round_trips_a_line_and_closes_cleanly() {
    let port = support::free_port();
    let _server = support::Server::start(port, &[]);

    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect to echo server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    stream.write_all(b"hello\n").expect("write request");

    let mut buf = [0u8; 64];
    let mut total = Vec::new();
    while total.len() < 6 {
        let n = stream.read(&mut buf).expect("read echoed bytes");
        assert!(n > 0, "server closed before echoing all bytes");
        total.extend_from_slice(&buf[..n]);
    }
    assert_eq!(&total, b"hello\n");

    drop(stream);
}
