use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{info, warn};

use reactor::{ConnHandle, Reactor, Session, TimerId};
use status::Status;

/// Bytes held in flight between a read and the write that echoes it back.
/// Large enough that typical test traffic (a single line, a handful of KB)
/// round-trips in one read/write pair; see the `EchoSession` doc for what
/// happens when a peer tries to push more than this before draining.
const BUF_SIZE: usize = 4096;

/// How long an echo connection or UDP peer may sit with no activity before
/// its timer tears it down.
const IDLE_TIMEOUT_MS: u64 = 5_000;

/// Echoes back whatever it receives, one TCP connection or UDP peer at a
/// time. Strictly half-duplex per connection: a TCP session disables its
/// read side the moment it has bytes to write back, and doesn't re-enable it
/// until the echo has fully drained. A UDP peer is symmetric, using the
/// reactor's per-peer `read_enabled` flag and write queue instead of socket
/// interest.
///
/// `buf` is read into starting at offset 0 on every read, which is only
/// reachable while the connection's read side is armed -- and read is
/// disarmed for the entire lifetime of a pending write. A peer that keeps
/// writing past `BUF_SIZE` bytes in a single logical burst never overflows
/// `buf`: each `read_tcp`/UDP receive is bounded by the buffer's own length,
/// so a burst larger than the buffer simply arrives across more than one
/// read/write cycle instead of corrupting anything.
pub struct EchoSession {
    buf: Vec<u8>,
    taken: usize,
    sent: usize,
    timer: Option<TimerId>,
    weak_self: Weak<RefCell<EchoSession>>,
}

impl EchoSession {
    pub fn new() -> Rc<RefCell<EchoSession>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(EchoSession {
                buf: vec![0u8; BUF_SIZE],
                taken: 0,
                sent: 0,
                timer: None,
                weak_self: weak.clone(),
            })
        })
    }

    fn self_handle(&self) -> Rc<RefCell<dyn Session>> {
        self.weak_self.upgrade().expect("echo session outlived its own Rc")
    }

    fn reschedule_timer(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        if let Some(id) = self.timer.take() {
            reactor.cancel_timer(id);
        }
        self.timer = reactor.schedule_timer(IDLE_TIMEOUT_MS, self.self_handle(), handle);
    }

    fn stop(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        if let Some(id) = self.timer.take() {
            reactor.cancel_timer(id);
        }
        match handle {
            ConnHandle::Tcp(id) => reactor.close_tcp(id),
            ConnHandle::Udp(sock, peer) => reactor.close_udp_peer(sock, peer),
        }
    }
}

impl Session for EchoSession {
    fn on_accept(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        self.reschedule_timer(reactor, handle);
    }

    fn on_readable(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        if self.timer.is_none() {
            self.reschedule_timer(reactor, handle);
        }
        match handle {
            ConnHandle::Tcp(id) => {
                if reactor.tcp_has_error(id) {
                    warn!("echo: tcp error flagged by the backend, closing session");
                    self.stop(reactor, handle);
                    return;
                }
                match reactor.read_tcp(id, &mut self.buf) {
                    Ok(0) => {
                        info!("echo: peer closed the connection");
                        self.stop(reactor, handle);
                    }
                    Ok(n) => {
                        self.taken = n;
                        self.sent = 0;
                        if reactor.enable_tcp_write(id).is_err() {
                            self.stop(reactor, handle);
                            return;
                        }
                        self.reschedule_timer(reactor, handle);
                    }
                    Err(Status::WouldBlock) => {}
                    Err(e) => {
                        warn!("echo: tcp read error ({e}), closing session");
                        self.stop(reactor, handle);
                    }
                }
            }
            ConnHandle::Udp(sock, peer) => {
                let datagram = reactor.udp_datagram(sock);
                let n = datagram.len().min(self.buf.len());
                self.buf[..n].copy_from_slice(&datagram[..n]);
                self.taken = n;
                self.sent = 0;
                reactor.set_udp_read_enabled(sock, peer, false);
                if let Err(e) = reactor.queue_udp_write(sock, peer) {
                    warn!("echo: udp write queue rejected peer {peer} ({e}), closing session");
                    self.stop(reactor, handle);
                    return;
                }
                self.reschedule_timer(reactor, handle);
            }
        }
    }

    fn on_writable(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        match handle {
            ConnHandle::Tcp(id) => match reactor.write_tcp(id, &self.buf[self.sent..self.taken]) {
                Ok(0) => {
                    info!("echo: peer closed the connection");
                    self.stop(reactor, handle);
                }
                Ok(n) => {
                    self.sent += n;
                    if self.sent < self.taken {
                        return;
                    }
                    self.taken = 0;
                    self.sent = 0;
                    if reactor.enable_tcp_read(id).is_err() {
                        self.stop(reactor, handle);
                        return;
                    }
                    self.reschedule_timer(reactor, handle);
                }
                Err(Status::WouldBlock) => {}
                Err(e) => {
                    warn!("echo: tcp write error ({e}), closing session");
                    self.stop(reactor, handle);
                }
            },
            ConnHandle::Udp(sock, peer) => match reactor.send_udp_datagram(sock, peer, &self.buf[..self.taken]) {
                Ok(()) => {
                    reactor.dequeue_udp_write(sock, peer);
                    self.taken = 0;
                    self.sent = 0;
                    reactor.set_udp_read_enabled(sock, peer, true);
                    self.reschedule_timer(reactor, handle);
                }
                Err(Status::WouldBlock) => {}
                Err(e) => {
                    warn!("echo: udp send error to {peer} ({e}), closing session");
                    self.stop(reactor, handle);
                }
            },
        }
    }

    fn on_timer(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        self.timer = None;
        info!("echo: idle timeout, closing session");
        self.stop(reactor, handle);
    }
}
