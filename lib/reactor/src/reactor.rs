use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use std::time::Instant;

use log::{error, warn};

use hashtable::{Address, OpenAddressMap};
use status::Status;
use timer::{TimerHeap, TimerId};

use crate::backend::{Interest, ReactorBackend, ReadyEvent};
use crate::event::{ConnHandle, EventOwner, TcpConnId, UdpSockId};
use crate::session::{NullSession, Session};
use crate::slab::Slab;
use crate::write_queue::WriteQueue;

/// Scratch buffer size for a single UDP datagram. Datagrams larger than this
/// are truncated by `recv_from`.
const UDP_MSG_SIZE: usize = 512;

/// Consecutive non-`EAGAIN` errors tolerated from a single UDP socket's read
/// path before the reactor gives up on that readiness pass. A socket that
/// keeps handing back `ECONNREFUSED` (a previous send's ICMP bounce) must
/// not be allowed to spin the reactor forever, but one bad datagram also
/// must not tear down a socket serving many well-behaved peers.
const UDP_READ_ERROR_LIMIT: u32 = 16;

struct ListenerEntry {
    listener: TcpListener,
    /// Builds the session for a freshly-accepted connection and registers
    /// it with the reactor itself (via `Reactor::add_tcp_conn`), since a
    /// session's own bookkeeping often needs the resulting `TcpConnId`.
    accept: Box<dyn FnMut(&mut Reactor, TcpStream, Address)>,
}

struct TcpConnEntry {
    stream: TcpStream,
    peer: Address,
    session: Rc<RefCell<dyn Session>>,
    read_enabled: bool,
    write_enabled: bool,
    /// Set when the backend last reported `EPOLLERR`/`EPOLLHUP` for this fd
    /// (see `dispatch`). Sticky until the connection is closed -- there's no
    /// path that un-sets it, since an errored fd isn't expected to recover.
    error: bool,
}

/// A single peer's worth of state inside a [`UdpSockEntry`]'s Peer Table.
/// This entry *is* the connection's owning storage: there is no separate
/// slab, the `OpenAddressMap` slot owns it directly.
struct UdpPeerEntry {
    session: Rc<RefCell<dyn Session>>,
    /// Per-connection read arming, independent of the (always-armed)
    /// socket-level readiness. A datagram arriving while this is `false`
    /// is dropped with a warning rather than delivered.
    read_enabled: bool,
}

struct UdpSockEntry {
    socket: UdpSocket,
    /// Builds a fresh session for a peer seen for the first time on this
    /// socket. Each peer gets its own session instance (own buffer, own
    /// timer) even though every peer shares the one underlying fd.
    make_session: Box<dyn Fn() -> Rc<RefCell<dyn Session>>>,
    peers: OpenAddressMap<Address, UdpPeerEntry>,
    /// Marks which peers currently have a write queued. The queue's value
    /// type carries no payload -- the owning session holds its own
    /// 4096-byte buffer and pulls bytes from it when its write handler
    /// runs, exactly as the TCP path does.
    write_queue: WriteQueue<()>,
    /// Set by the backend event (`EPOLLOUT`) and cleared again by a
    /// `send_to` that returns `EAGAIN`, per §4.5.
    writable: bool,
    consecutive_read_errors: u32,
    /// Set when the backend last reported `EPOLLERR`/`EPOLLHUP` for this
    /// socket's fd (see `dispatch`). The socket itself keeps running --
    /// UDP read failures are already bounded by `consecutive_read_errors`
    /// -- this just makes the last-observed OS error visible to callers.
    error: bool,
    /// The most recently received datagram, valid only until the next
    /// `recv_from` call on this socket.
    scratch: Vec<u8>,
}

/// The single-threaded event multiplexer: owns every listener, TCP
/// connection and UDP socket, dispatches backend readiness events to the
/// right session, and drives the timer heap.
pub struct Reactor {
    backend: Box<dyn ReactorBackend>,
    listeners: Slab<ListenerEntry>,
    tcp_conns: Slab<TcpConnEntry>,
    udp_socks: Slab<UdpSockEntry>,
    owners: std::collections::HashMap<RawFd, EventOwner>,
    timers: TimerHeap,
    /// Timer firings land here rather than being invoked directly from
    /// inside `TimerHeap::process` -- the heap's closures only need to push
    /// `(session, handle)` pairs, never `&mut Reactor` itself, which avoids
    /// the reentrancy a closure capturing the reactor it's stored inside
    /// would otherwise require. `process_timers` drains this after the heap
    /// pass completes, once `&mut self` is free again.
    due_timers: Rc<RefCell<Vec<(Rc<RefCell<dyn Session>>, ConnHandle)>>>,
    start: Instant,
    events_buf: Vec<ReadyEvent>,
}

impl Reactor {
    pub fn new(backend: Box<dyn ReactorBackend>, timer_capacity: usize) -> Self {
        Reactor {
            backend,
            listeners: Slab::new(),
            tcp_conns: Slab::new(),
            udp_socks: Slab::new(),
            owners: std::collections::HashMap::new(),
            timers: TimerHeap::new(timer_capacity),
            due_timers: Rc::new(RefCell::new(Vec::new())),
            start: Instant::now(),
            events_buf: Vec::with_capacity(512),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    // --- listeners -----------------------------------------------------

    pub fn add_listener(
        &mut self,
        listener: TcpListener,
        accept: impl FnMut(&mut Reactor, TcpStream, Address) + 'static,
    ) -> Result<usize, Status> {
        listener.set_nonblocking(true).map_err(|_| Status::Generic)?;
        let fd = listener.as_raw_fd();
        let idx = self.listeners.insert(ListenerEntry {
            listener,
            accept: Box::new(accept),
        });
        self.backend.register(fd, fd as u64, Interest::READ)?;
        self.owners.insert(fd, EventOwner::Listener(idx));
        Ok(idx)
    }

    fn handle_listener_readable(&mut self, idx: usize) {
        loop {
            let accepted = match self.listeners.get_mut(idx) {
                Some(entry) => entry.listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let peer = Address::from(addr);
                    // Swap the callback out so it can take `&mut self`
                    // without also holding a borrow of `self.listeners`.
                    let mut callback = match self.listeners.get_mut(idx) {
                        Some(entry) => std::mem::replace(&mut entry.accept, Box::new(|_, _, _| {})),
                        None => return,
                    };
                    callback(self, stream, peer);
                    if let Some(entry) = self.listeners.get_mut(idx) {
                        entry.accept = callback;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("accept() failed on listener {idx}: {e}");
                    return;
                }
            }
        }
    }

    // --- TCP connections -------------------------------------------------

    /// Registers a freshly-accepted TCP connection and, before returning,
    /// fires the session's `on_accept` lifecycle hook synchronously -- not
    /// just the first readiness event. A session that only armed its idle
    /// timer reactively from `on_readable`/`on_writable` would never see
    /// one for a client that connects and then sends nothing: edge-triggered
    /// `epoll` raises no event at all on a silently idle fd, so the
    /// connection would sit forever. `on_accept` runs here instead, right
    /// after the fd is registered, so setup work that must happen no matter
    /// what the peer does next (arming a timeout, dialing an upstream) isn't
    /// at the mercy of the peer ever doing anything.
    pub fn add_tcp_conn(
        &mut self,
        stream: TcpStream,
        peer: Address,
        session: Rc<RefCell<dyn Session>>,
    ) -> Result<TcpConnId, Status> {
        let id = self.insert_tcp_conn(stream, peer, session, Interest::READ)?;
        self.fire_on_accept(id);
        Ok(id)
    }

    /// Like [`Reactor::add_tcp_conn`], but `make_session` is given the
    /// connection's own id -- for sessions (the proxy pair) that need to
    /// close over their own handle before any event can possibly fire.
    /// Inserts a no-op placeholder first so the id exists to hand to
    /// `make_session`, then immediately swaps in the real session and fires
    /// `on_accept` on it; no reactor turn runs in between, so the
    /// placeholder never actually observes anything.
    pub fn add_tcp_conn_with(
        &mut self,
        stream: TcpStream,
        peer: Address,
        make_session: impl FnOnce(TcpConnId) -> Rc<RefCell<dyn Session>>,
    ) -> Result<TcpConnId, Status> {
        let id = self.insert_tcp_conn(stream, peer, Rc::new(RefCell::new(NullSession)), Interest::READ)?;
        let session = make_session(id);
        self.set_tcp_session(id, session);
        self.fire_on_accept(id);
        Ok(id)
    }

    fn insert_tcp_conn(
        &mut self,
        stream: TcpStream,
        peer: Address,
        session: Rc<RefCell<dyn Session>>,
        interest: Interest,
    ) -> Result<TcpConnId, Status> {
        stream.set_nonblocking(true).map_err(|_| Status::Generic)?;
        let fd = stream.as_raw_fd();
        let idx = self.tcp_conns.insert(TcpConnEntry {
            stream,
            peer,
            session,
            read_enabled: interest.read,
            write_enabled: interest.write,
            error: false,
        });
        self.backend.register(fd, fd as u64, interest)?;
        self.owners.insert(fd, EventOwner::Tcp(TcpConnId(idx)));
        Ok(TcpConnId(idx))
    }

    fn fire_on_accept(&mut self, id: TcpConnId) {
        let session = match self.tcp_conns.get(id.0) {
            Some(entry) => entry.session.clone(),
            None => return,
        };
        session.borrow_mut().on_accept(self, ConnHandle::Tcp(id));
    }

    /// Replaces the session attached to an already-registered TCP
    /// connection. Used by `add_tcp_conn_with`/`connect_tcp_with` to swap a
    /// placeholder for the real, id-aware session.
    pub fn set_tcp_session(&mut self, id: TcpConnId, session: Rc<RefCell<dyn Session>>) {
        if let Some(entry) = self.tcp_conns.get_mut(id.0) {
            entry.session = session;
        }
    }

    /// Opens an outbound, non-blocking TCP connection and registers it with
    /// no armed direction -- the session arms read/write itself once it
    /// decides what to wait for first. Mirrors `add_conn` for the proxy's
    /// remote side (§4.4): the connect is issued eagerly; if it doesn't
    /// complete synchronously the socket is still usable non-blocking (the
    /// session will see writability once the handshake finishes).
    pub fn connect_tcp(
        &mut self,
        addr: Address,
        session: Rc<RefCell<dyn Session>>,
    ) -> Result<TcpConnId, Status> {
        let stream = TcpStream::connect(addr.to_socket_addr()).map_err(|e| {
            warn!("outbound connect to {addr} failed: {e}");
            Status::Generic
        })?;
        stream.set_nonblocking(true).map_err(|_| Status::Generic)?;
        let fd = stream.as_raw_fd();
        let idx = self.tcp_conns.insert(TcpConnEntry {
            stream,
            peer: addr,
            session,
            read_enabled: false,
            write_enabled: false,
            error: false,
        });
        self.backend.register(fd, fd as u64, Interest::NONE)?;
        self.owners.insert(fd, EventOwner::Tcp(TcpConnId(idx)));
        Ok(TcpConnId(idx))
    }

    /// Like [`Reactor::connect_tcp`], but `make_session` is given the
    /// remote connection's own id -- used by the proxy session to install
    /// itself as the remote side's handler once the outbound id is known.
    pub fn connect_tcp_with(
        &mut self,
        addr: Address,
        make_session: impl FnOnce(TcpConnId) -> Rc<RefCell<dyn Session>>,
    ) -> Result<TcpConnId, Status> {
        let id = self.connect_tcp(addr, Rc::new(RefCell::new(NullSession)))?;
        let session = make_session(id);
        self.set_tcp_session(id, session);
        Ok(id)
    }

    pub fn close_tcp(&mut self, id: TcpConnId) {
        if let Some(entry) = self.tcp_conns.remove(id.0) {
            let fd = entry.stream.as_raw_fd();
            let _ = self.backend.deregister(fd);
            self.owners.remove(&fd);
        }
    }

    pub fn tcp_peer(&self, id: TcpConnId) -> Option<Address> {
        self.tcp_conns.get(id.0).map(|e| e.peer)
    }

    /// Whether the backend has ever reported `EPOLLERR`/`EPOLLHUP` for this
    /// connection (see `dispatch`). A session can check this before acting
    /// on an event instead of waiting for the next `read_tcp`/`write_tcp`
    /// call to surface the same failure.
    pub fn tcp_has_error(&self, id: TcpConnId) -> bool {
        self.tcp_conns.get(id.0).map(|e| e.error).unwrap_or(false)
    }

    pub fn read_tcp(&mut self, id: TcpConnId, buf: &mut [u8]) -> Result<usize, Status> {
        let entry = self.tcp_conns.get_mut(id.0).ok_or(Status::NotFound)?;
        match entry.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Status::WouldBlock),
            Err(_) => Err(Status::Generic),
        }
    }

    pub fn write_tcp(&mut self, id: TcpConnId, buf: &[u8]) -> Result<usize, Status> {
        let entry = self.tcp_conns.get_mut(id.0).ok_or(Status::NotFound)?;
        match entry.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(Status::WouldBlock),
            Err(_) => Err(Status::Generic),
        }
    }

    /// Arms read interest and disarms write interest. At most one of
    /// read/write is ever armed for a TCP connection outside of the middle
    /// of dispatching an event.
    pub fn enable_tcp_read(&mut self, id: TcpConnId) -> Result<(), Status> {
        self.set_tcp_interest(id, Interest::READ)
    }

    pub fn enable_tcp_write(&mut self, id: TcpConnId) -> Result<(), Status> {
        self.set_tcp_interest(id, Interest::WRITE)
    }

    /// Disarms both directions. Used when a connection has handed its data
    /// off to its peer and has nothing to do until that peer catches up
    /// (the proxy's "disable client.read" / "disable remote.read" steps) --
    /// distinct from the echo sessions, which always have exactly one
    /// direction armed via `enable_tcp_read`/`enable_tcp_write`.
    pub fn disable_tcp_interest(&mut self, id: TcpConnId) -> Result<(), Status> {
        self.set_tcp_interest(id, Interest::NONE)
    }

    fn set_tcp_interest(&mut self, id: TcpConnId, interest: Interest) -> Result<(), Status> {
        let fd = self.tcp_conns.get(id.0).ok_or(Status::NotFound)?.stream.as_raw_fd();
        self.backend.modify(fd, fd as u64, interest)?;
        if let Some(entry) = self.tcp_conns.get_mut(id.0) {
            entry.read_enabled = interest.read;
            entry.write_enabled = interest.write;
        }
        Ok(())
    }

    // --- UDP sockets -----------------------------------------------------

    /// Binds (or adopts) a UDP socket into the reactor. `make_session` is
    /// called once per distinct remote peer the socket observes, the first
    /// time a datagram arrives from it -- this is the Peer Table's
    /// insert-on-miss path from §4.5.
    pub fn add_udp_sock(
        &mut self,
        socket: UdpSocket,
        make_session: impl Fn() -> Rc<RefCell<dyn Session>> + 'static,
        write_queue_capacity: usize,
    ) -> Result<UdpSockId, Status> {
        socket.set_nonblocking(true).map_err(|_| Status::Generic)?;
        let fd = socket.as_raw_fd();
        let idx = self.udp_socks.insert(UdpSockEntry {
            socket,
            make_session: Box::new(make_session),
            peers: OpenAddressMap::new(),
            write_queue: WriteQueue::new(write_queue_capacity),
            writable: false,
            consecutive_read_errors: 0,
            error: false,
            scratch: Vec::with_capacity(UDP_MSG_SIZE),
        });
        // Both directions are armed at the socket level for the lifetime of
        // the socket; per-peer arming is tracked in user space (the Peer
        // Table's `read_enabled` and the Write Queue's membership).
        self.backend.register(fd, fd as u64, Interest::BOTH)?;
        self.owners.insert(fd, EventOwner::UdpSocket(UdpSockId(idx)));
        Ok(UdpSockId(idx))
    }

    pub fn del_udp_sock(&mut self, id: UdpSockId) {
        if let Some(entry) = self.udp_socks.remove(id.0) {
            let fd = entry.socket.as_raw_fd();
            let _ = self.backend.deregister(fd);
            self.owners.remove(&fd);
        }
    }

    /// The number of distinct peers currently tracked on this socket's
    /// Peer Table.
    pub fn udp_peer_count(&self, id: UdpSockId) -> usize {
        self.udp_socks.get(id.0).map(|e| e.peers.len()).unwrap_or(0)
    }

    /// The bytes of the datagram that triggered the session's current
    /// `on_readable` call. Valid only from within that call -- mirrors the
    /// source's `udp_recv_buf`, which copies out of the socket's scratch
    /// buffer before the next `recvfrom` overwrites it.
    pub fn udp_datagram(&self, id: UdpSockId) -> &[u8] {
        self.udp_socks.get(id.0).map(|e| e.scratch.as_slice()).unwrap_or(&[])
    }

    /// Whether the backend has ever reported `EPOLLERR`/`EPOLLHUP` for this
    /// socket's fd (see `dispatch`). Socket-wide, not per-peer -- a single
    /// UDP fd is shared by every peer on it.
    pub fn udp_sock_has_error(&self, id: UdpSockId) -> bool {
        self.udp_socks.get(id.0).map(|e| e.error).unwrap_or(false)
    }

    /// Flips a peer connection's read-enabled flag without disturbing the
    /// socket-level registration. A peer with reads disabled still has its
    /// datagrams drained off the kernel queue (so well-behaved peers aren't
    /// starved) but they're dropped with a warning instead of delivered.
    pub fn set_udp_read_enabled(&mut self, id: UdpSockId, peer: Address, enabled: bool) {
        if let Some(entry) = self.udp_socks.get_mut(id.0) {
            if let Some(peer_entry) = entry.peers.get_mut(&peer) {
                peer_entry.read_enabled = enabled;
            }
        }
    }

    /// Removes `peer` from both the Peer Table and the Write Queue. The
    /// UDP analogue of `close_tcp`/`del_conn` (§4.4): there's no fd to
    /// close, just the in-process bookkeeping that made the peer look like
    /// a connection.
    pub fn close_udp_peer(&mut self, id: UdpSockId, peer: Address) {
        if let Some(entry) = self.udp_socks.get_mut(id.0) {
            entry.write_queue.remove(&peer);
            let _ = entry.peers.remove(&peer);
        }
    }

    /// Queues a write-ready notification for `peer`. If the socket is
    /// already known writable, drains immediately rather than waiting for
    /// the next edge -- edge-triggered `EPOLLOUT` may already have fired
    /// before this session had anything queued to send.
    pub fn queue_udp_write(&mut self, id: UdpSockId, peer: Address) -> Result<(), Status> {
        let (was_empty, already_writable) = {
            let entry = self.udp_socks.get(id.0).ok_or(Status::NotFound)?;
            (entry.write_queue.is_empty(), entry.writable)
        };
        let entry = self.udp_socks.get_mut(id.0).ok_or(Status::NotFound)?;
        entry.write_queue.add(peer, ())?;
        let _ = was_empty;
        if already_writable {
            self.drain_udp_writes(id);
        }
        Ok(())
    }

    /// Attempts to send one datagram to `peer`. `EAGAIN` marks the socket
    /// unwritable (cleared again on the next `EPOLLOUT`) and is surfaced as
    /// `Status::WouldBlock` so the caller leaves its write queued.
    pub fn send_udp_datagram(&mut self, id: UdpSockId, peer: Address, data: &[u8]) -> Result<(), Status> {
        let entry = self.udp_socks.get_mut(id.0).ok_or(Status::NotFound)?;
        match entry.socket.send_to(data, peer.to_socket_addr()) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                entry.writable = false;
                Err(Status::WouldBlock)
            }
            Err(e) => {
                warn!("udp send error to {peer}: {e}");
                Err(Status::Generic)
            }
        }
    }

    /// Removes `peer`'s entry from the write queue once its send has fully
    /// completed. Per §4.3/§9, a partial or would-block send must *not*
    /// call this -- the entry stays live for the next writability cycle.
    pub fn dequeue_udp_write(&mut self, id: UdpSockId, peer: Address) {
        if let Some(entry) = self.udp_socks.get_mut(id.0) {
            entry.write_queue.remove(&peer);
        }
    }

    /// Receives datagrams off `id` until `EAGAIN`, dispatching each to its
    /// peer's session (creating one on first sight of a new peer).
    fn handle_udp_readable(&mut self, id: UdpSockId) {
        loop {
            enum Outcome {
                Data(Address),
                WouldBlock,
                Retry,
                Fatal,
            }
            let outcome = {
                let entry = match self.udp_socks.get_mut(id.0) {
                    Some(e) => e,
                    None => return,
                };
                let mut buf = [0u8; UDP_MSG_SIZE];
                match entry.socket.recv_from(&mut buf) {
                    Ok((n, addr)) => {
                        entry.consecutive_read_errors = 0;
                        entry.scratch.clear();
                        entry.scratch.extend_from_slice(&buf[..n]);
                        Outcome::Data(Address::from(addr))
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        entry.consecutive_read_errors = 0;
                        Outcome::WouldBlock
                    }
                    Err(e) => {
                        warn!("udp recv error on socket {}: {e}", id.0);
                        entry.consecutive_read_errors += 1;
                        if entry.consecutive_read_errors >= UDP_READ_ERROR_LIMIT {
                            entry.consecutive_read_errors = 0;
                            Outcome::Fatal
                        } else {
                            Outcome::Retry
                        }
                    }
                }
            };
            match outcome {
                Outcome::WouldBlock => return,
                Outcome::Retry => continue,
                Outcome::Fatal => {
                    error!(
                        "udp socket {}: {UDP_READ_ERROR_LIMIT} consecutive recv errors, giving up for this pass",
                        id.0
                    );
                    return;
                }
                Outcome::Data(peer) => self.dispatch_udp_datagram(id, peer),
            }
        }
    }

    fn dispatch_udp_datagram(&mut self, id: UdpSockId, peer: Address) {
        let session = {
            let entry = match self.udp_socks.get_mut(id.0) {
                Some(e) => e,
                None => return,
            };
            let make_session = &entry.make_session;
            let peer_entry = entry.peers.get_or_insert_with(peer, || UdpPeerEntry {
                session: (make_session)(),
                read_enabled: true,
            });
            if !peer_entry.read_enabled {
                warn!("dropping datagram from {peer}: read disabled");
                return;
            }
            peer_entry.session.clone()
        };
        session.borrow_mut().on_readable(self, ConnHandle::Udp(id, peer));
    }

    /// Drains the write queue round-robin until it empties or a send hits
    /// `EAGAIN`, handing each popped peer's write handling to its session
    /// (which owns the buffer being sent).
    fn drain_udp_writes(&mut self, id: UdpSockId) {
        loop {
            let (peer, session) = {
                let entry = match self.udp_socks.get_mut(id.0) {
                    Some(e) => e,
                    None => return,
                };
                if entry.write_queue.is_empty() || !entry.writable {
                    break;
                }
                let (peer, ()) = *entry.write_queue.pop_front().expect("checked not empty");
                let session = match entry.peers.get(&peer) {
                    Some(p) => p.session.clone(),
                    None => {
                        // Peer was torn down with a write still queued;
                        // drop the stale entry and move on.
                        entry.write_queue.remove(&peer);
                        continue;
                    }
                };
                (peer, session)
            };
            session.borrow_mut().on_writable(self, ConnHandle::Udp(id, peer));
        }
    }

    // --- timers -----------------------------------------------------------

    /// Schedules `session`'s idle timer to fire `delay_ms` from now. On
    /// expiry, `session.on_timer(reactor, handle)` runs with full reactor
    /// access (see the `due_timers` field doc for why this is safe).
    pub fn schedule_timer(&mut self, delay_ms: u64, session: Rc<RefCell<dyn Session>>, handle: ConnHandle) -> Option<TimerId> {
        let expiry = self.now_ms() + delay_ms;
        let due = self.due_timers.clone();
        self.timers.add(expiry, move || {
            due.borrow_mut().push((session.clone(), handle));
        })
    }

    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    pub fn process_timers(&mut self) {
        let now = self.now_ms();
        self.timers.process(now);
        let due = std::mem::take(&mut *self.due_timers.borrow_mut());
        for (session, handle) in due {
            session.borrow_mut().on_timer(self, handle);
        }
    }

    pub fn next_timer_deadline_ms(&mut self) -> Option<u64> {
        self.timers.next_enabled_expiry()
    }

    // --- event loop ---------------------------------------------------

    /// Polls the backend once and dispatches every ready event to its
    /// owning listener, connection or socket.
    pub fn process_events(&mut self, timeout_ms: Option<u64>) -> Result<(), Status> {
        self.events_buf.clear();
        match self.backend.poll(timeout_ms, &mut self.events_buf) {
            Ok(()) => {}
            Err(Status::WouldBlock) => return Ok(()),
            Err(e) => return Err(e),
        }
        let events = std::mem::take(&mut self.events_buf);
        for event in &events {
            self.dispatch(event);
        }
        self.events_buf = events;
        Ok(())
    }

    fn dispatch(&mut self, event: &ReadyEvent) {
        let fd = event.token as RawFd;
        let owner = match self.owners.get(&fd) {
            Some(o) => *o,
            None => return,
        };
        if event.error {
            let errno = crate::backend::read_socket_error(fd);
            if errno != 0 {
                warn!("fd {fd}: {}", io::Error::from_raw_os_error(errno));
            }
            match owner {
                EventOwner::Tcp(id) => {
                    if let Some(entry) = self.tcp_conns.get_mut(id.0) {
                        entry.error = true;
                    }
                }
                EventOwner::UdpSocket(id) => {
                    if let Some(entry) = self.udp_socks.get_mut(id.0) {
                        entry.error = true;
                    }
                }
                EventOwner::Listener(_) => {}
            }
        }
        match owner {
            EventOwner::Listener(idx) => {
                if event.readable || event.error {
                    self.handle_listener_readable(idx);
                }
            }
            EventOwner::Tcp(id) => {
                if event.readable || event.error {
                    if let Some(entry) = self.tcp_conns.get(id.0) {
                        let session = entry.session.clone();
                        session.borrow_mut().on_readable(self, ConnHandle::Tcp(id));
                    }
                }
                if event.writable && self.tcp_conns.get(id.0).is_some() {
                    if let Some(entry) = self.tcp_conns.get(id.0) {
                        let session = entry.session.clone();
                        session.borrow_mut().on_writable(self, ConnHandle::Tcp(id));
                    }
                }
            }
            EventOwner::UdpSocket(id) => {
                if event.readable || event.error {
                    self.handle_udp_readable(id);
                }
                if event.writable {
                    if let Some(entry) = self.udp_socks.get_mut(id.0) {
                        entry.writable = true;
                    }
                    self.drain_udp_writes(id);
                }
            }
        }
    }
}
