#[path = "support.rs"]
mod support;

#[test]
fn two_concurrent_udp_peers_each_get_their_own_echo() {
    let port = support::free_port();
    let _server = support::Server::start(port, &[]);

    let client_a = support::udp_client();
    let client_b = support::udp_client();

    client_a.send_to(b"ping", ("127.0.0.1", port)).expect("client A send");
    client_b.send_to(b"pong", ("127.0.0.1", port)).expect("client B send");

    let mut buf = [0u8; 64];
    let (n, _) = client_a.recv_from(&mut buf).expect("client A recv");
    assert_eq!(&buf[..n], b"ping");

    let (n, _) = client_b.recv_from(&mut buf).expect("client B recv");
    assert_eq!(&buf[..n], b"pong");
}
