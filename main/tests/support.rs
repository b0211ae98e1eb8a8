//! Shared black-box test harness: spawns the compiled server as a child
//! process and drives it with real TCP/UDP sockets, matching the server's
//! own non-blocking wire format.

#![allow(dead_code)]

use std::net::{TcpListener, UdpSocket};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Picks a currently-free port by binding to port 0 and reading it back,
/// then releasing the socket immediately. Races with other port users are
/// possible in principle but acceptable for test code running on loopback.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port").local_addr().unwrap().port()
}

pub struct Server {
    child: Child,
}

impl Server {
    pub fn start(port: u16, extra_args: &[&str]) -> Server {
        let exe = env!("CARGO_BIN_EXE_echo-reactor");
        let mut cmd = Command::new(exe);
        cmd.arg("--port").arg(port.to_string());
        cmd.args(extra_args);
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        let child = cmd.spawn().expect("spawn server process");
        // Give the reactor time to bind its listener/socket before the
        // first connection attempt.
        std::thread::sleep(Duration::from_millis(150));
        Server { child }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn udp_client() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").expect("bind udp client socket");
    sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    sock
}
