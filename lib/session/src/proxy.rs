use std::cell::RefCell;
use std::net::TcpStream;
use std::rc::{Rc, Weak};

use log::{info, warn};

use hashtable::Address;
use reactor::{ConnHandle, Reactor, Session, TcpConnId, TimerId};
use status::Status;

const BUF_SIZE: usize = 4096;

/// Idle timeout tied to the client-facing connection.
const CLIENT_TIMEOUT_MS: u64 = 5_000;
/// Idle timeout tied to the remote (upstream) connection. Deliberately
/// longer than the client side's: a slow upstream shouldn't get torn down
/// just because the client-facing leg happens to fire its timer first, and
/// every read/write on either leg reschedules both anyway.
const REMOTE_TIMEOUT_MS: u64 = 6_000;

/// A transparent TCP-to-TCP proxy: one accepted client connection paired
/// with one outbound connection to a fixed remote address, relaying bytes
/// in both directions.
///
/// Each leg is half-duplex exactly like [`crate::EchoSession`], but the two
/// legs' read/write arming are cross-wired instead of self-contained: bytes
/// read from the client are staged in `to_remote` and drained by writing to
/// the remote leg, and bytes read from the remote are staged in `to_client`
/// and drained by writing to the client leg. A leg's own read and write are
/// still mutually exclusive -- `client read -> disable client.read, enable
/// remote.write`; `remote write drains to_remote -> enable remote.read` --
/// matching the reactor's "at most one direction armed" rule per connection.
///
/// The proxy is constructed with only the client leg and a remote address;
/// the remote leg is dialed from `on_accept`, as soon as the client
/// connection is registered, using the same "insert-then-install" two-phase
/// pattern the reactor's `add_tcp_conn_with`/`connect_tcp_with` expose.
pub struct ProxySession {
    client: TcpConnId,
    remote: Option<TcpConnId>,
    remote_addr: Address,

    to_remote: Vec<u8>,
    to_remote_taken: usize,
    to_remote_sent: usize,

    to_client: Vec<u8>,
    to_client_taken: usize,
    to_client_sent: usize,

    client_timer: Option<TimerId>,
    remote_timer: Option<TimerId>,

    weak_self: Weak<RefCell<ProxySession>>,
}

impl ProxySession {
    fn new(client: TcpConnId, remote_addr: Address) -> Rc<RefCell<ProxySession>> {
        Rc::new_cyclic(|weak| {
            RefCell::new(ProxySession {
                client,
                remote: None,
                remote_addr,
                to_remote: vec![0u8; BUF_SIZE],
                to_remote_taken: 0,
                to_remote_sent: 0,
                to_client: vec![0u8; BUF_SIZE],
                to_client_taken: 0,
                to_client_sent: 0,
                client_timer: None,
                remote_timer: None,
                weak_self: weak.clone(),
            })
        })
    }

    /// Registers a freshly-accepted client connection as one half of a
    /// proxy pair, the other half pointed at `remote_addr`. Meant to be
    /// called from a listener's accept callback.
    pub fn accept(reactor: &mut Reactor, stream: TcpStream, peer: Address, remote_addr: Address) {
        let result = reactor.add_tcp_conn_with(stream, peer, move |client_id| {
            ProxySession::new(client_id, remote_addr) as Rc<RefCell<dyn Session>>
        });
        if let Err(e) = result {
            warn!("proxy: failed to register client connection from {peer} ({e})");
        }
    }

    fn self_handle(&self) -> Rc<RefCell<dyn Session>> {
        self.weak_self.upgrade().expect("proxy session outlived its own Rc")
    }

    /// Dials the remote leg, unless it's already up. Called from
    /// `on_accept` so the dial happens no matter what the client does next;
    /// also called defensively from `on_readable` in case a client event
    /// ever reaches this session before `remote` is set. On failure, tears
    /// the (remote-less) session down immediately.
    fn ensure_remote(&mut self, reactor: &mut Reactor) {
        if self.remote.is_some() {
            return;
        }
        let remote_addr = self.remote_addr;
        let self_rc = self.self_handle();
        match reactor.connect_tcp_with(remote_addr, move |_remote_id| self_rc) {
            Ok(remote_id) => {
                self.remote = Some(remote_id);
                if reactor.enable_tcp_read(remote_id).is_err() {
                    warn!("proxy: failed to arm read on remote leg to {remote_addr}");
                    self.teardown(reactor);
                    return;
                }
                self.reschedule_timers(reactor);
            }
            Err(e) => {
                warn!("proxy: failed to connect upstream {remote_addr} ({e}), tearing down client session");
                self.teardown(reactor);
            }
        }
    }

    fn reschedule_timers(&mut self, reactor: &mut Reactor) {
        if let Some(id) = self.client_timer.take() {
            reactor.cancel_timer(id);
        }
        self.client_timer = reactor.schedule_timer(CLIENT_TIMEOUT_MS, self.self_handle(), ConnHandle::Tcp(self.client));
        if let Some(remote_id) = self.remote {
            if let Some(id) = self.remote_timer.take() {
                reactor.cancel_timer(id);
            }
            self.remote_timer = reactor.schedule_timer(REMOTE_TIMEOUT_MS, self.self_handle(), ConnHandle::Tcp(remote_id));
        }
    }

    fn teardown(&mut self, reactor: &mut Reactor) {
        if let Some(id) = self.client_timer.take() {
            reactor.cancel_timer(id);
        }
        if let Some(id) = self.remote_timer.take() {
            reactor.cancel_timer(id);
        }
        if let Some(remote_id) = self.remote.take() {
            reactor.close_tcp(remote_id);
        }
        reactor.close_tcp(self.client);
    }

    fn handle_client_read(&mut self, reactor: &mut Reactor) {
        match reactor.read_tcp(self.client, &mut self.to_remote) {
            Ok(0) => {
                info!("proxy: client closed the connection");
                self.teardown(reactor);
            }
            Ok(n) => {
                self.to_remote_taken = n;
                self.to_remote_sent = 0;
                let _ = reactor.disable_tcp_interest(self.client);
                if let Some(remote_id) = self.remote {
                    if reactor.enable_tcp_write(remote_id).is_err() {
                        self.teardown(reactor);
                        return;
                    }
                }
                self.reschedule_timers(reactor);
            }
            Err(Status::WouldBlock) => {}
            Err(e) => {
                warn!("proxy: client read error ({e})");
                self.teardown(reactor);
            }
        }
    }

    fn handle_remote_read(&mut self, reactor: &mut Reactor) {
        let remote_id = match self.remote {
            Some(r) => r,
            None => return,
        };
        match reactor.read_tcp(remote_id, &mut self.to_client) {
            Ok(0) => {
                info!("proxy: remote closed the connection");
                self.teardown(reactor);
            }
            Ok(n) => {
                self.to_client_taken = n;
                self.to_client_sent = 0;
                let _ = reactor.disable_tcp_interest(remote_id);
                if reactor.enable_tcp_write(self.client).is_err() {
                    self.teardown(reactor);
                    return;
                }
                self.reschedule_timers(reactor);
            }
            Err(Status::WouldBlock) => {}
            Err(e) => {
                warn!("proxy: remote read error ({e})");
                self.teardown(reactor);
            }
        }
    }

    fn handle_client_write(&mut self, reactor: &mut Reactor) {
        match reactor.write_tcp(self.client, &self.to_client[self.to_client_sent..self.to_client_taken]) {
            Ok(0) => {
                info!("proxy: client closed the connection");
                self.teardown(reactor);
            }
            Ok(n) => {
                self.to_client_sent += n;
                if self.to_client_sent < self.to_client_taken {
                    return;
                }
                self.to_client_taken = 0;
                self.to_client_sent = 0;
                if reactor.enable_tcp_read(self.client).is_err() {
                    self.teardown(reactor);
                    return;
                }
                self.reschedule_timers(reactor);
            }
            Err(Status::WouldBlock) => {}
            Err(e) => {
                warn!("proxy: client write error ({e})");
                self.teardown(reactor);
            }
        }
    }

    fn handle_remote_write(&mut self, reactor: &mut Reactor) {
        let remote_id = match self.remote {
            Some(r) => r,
            None => return,
        };
        match reactor.write_tcp(remote_id, &self.to_remote[self.to_remote_sent..self.to_remote_taken]) {
            Ok(0) => {
                info!("proxy: remote closed the connection");
                self.teardown(reactor);
            }
            Ok(n) => {
                self.to_remote_sent += n;
                if self.to_remote_sent < self.to_remote_taken {
                    return;
                }
                self.to_remote_taken = 0;
                self.to_remote_sent = 0;
                if reactor.enable_tcp_read(remote_id).is_err() {
                    self.teardown(reactor);
                    return;
                }
                self.reschedule_timers(reactor);
            }
            Err(Status::WouldBlock) => {}
            Err(e) => {
                warn!("proxy: remote write error ({e})");
                self.teardown(reactor);
            }
        }
    }
}

impl Session for ProxySession {
    /// Dials the remote leg and arms both timers as soon as the client
    /// connection is accepted, rather than waiting for the client's first
    /// byte -- a client that connects and sends nothing never raises an
    /// `on_readable` to defer to, so setup can't wait for one.
    fn on_accept(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        let _ = handle;
        self.ensure_remote(reactor);
    }

    fn on_readable(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        if let ConnHandle::Tcp(id) = handle {
            if reactor.tcp_has_error(id) {
                warn!("proxy: tcp error flagged by the backend on {handle:?}, tearing down session");
                self.teardown(reactor);
                return;
            }
        }
        if self.remote.is_none() {
            self.ensure_remote(reactor);
            if self.remote.is_none() {
                return;
            }
        }
        match handle {
            ConnHandle::Tcp(id) if id == self.client => self.handle_client_read(reactor),
            ConnHandle::Tcp(id) if Some(id) == self.remote => self.handle_remote_read(reactor),
            _ => {}
        }
    }

    fn on_writable(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        match handle {
            ConnHandle::Tcp(id) if id == self.client => self.handle_client_write(reactor),
            ConnHandle::Tcp(id) if Some(id) == self.remote => self.handle_remote_write(reactor),
            _ => {}
        }
    }

    fn on_timer(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        info!("proxy: idle timeout on {handle:?}, tearing down session");
        self.teardown(reactor);
    }
}
