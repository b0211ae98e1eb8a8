use crate::event::ConnHandle;
use crate::reactor::Reactor;

/// The behavior attached to a connection or UDP socket.
///
/// The reactor holds an `Rc<RefCell<dyn Session>>` per connection and calls
/// a typed method on it when an event fires. A session never touches file
/// descriptors directly -- it only ever acts through the `Reactor` handle
/// passed to it, keyed by the `ConnHandle` that identifies which connection
/// raised the event.
pub trait Session {
    /// Invoked synchronously once, right after the connection is registered
    /// with the reactor -- before any readiness event can possibly arrive.
    /// This is where setup that must happen regardless of what the peer
    /// does next belongs (arming an idle timer, dialing an upstream):
    /// edge-triggered readiness never fires for a peer that connects and
    /// then does nothing, so deferring that setup to `on_readable` would
    /// leave such a connection live forever. Default no-op for sessions
    /// (UDP peers) that only ever come to exist already inside an event.
    fn on_accept(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        let _ = (reactor, handle);
    }

    fn on_readable(&mut self, reactor: &mut Reactor, handle: ConnHandle);

    fn on_writable(&mut self, reactor: &mut Reactor, handle: ConnHandle);

    /// Invoked when this session's idle timer (scheduled via
    /// [`Reactor::schedule_timer`]) expires. The handle is still valid to
    /// act on -- implementations tear the connection down from here by
    /// calling back into the reactor (`close_tcp`, `close_udp_peer`, ...).
    ///
    /// There is deliberately no `on_closed` callback invoked *by* the
    /// reactor when a connection is torn down: every teardown path in this
    /// codebase is session-initiated (a session decides to close itself,
    /// and a paired session like the proxy's closes both of its own
    /// halves explicitly). A reactor-invoked `on_closed` would have to
    /// re-borrow the very `RefCell<dyn Session>` the current call already
    /// holds mutably borrowed, which panics; rather than special-case
    /// that, the teardown logic a session needs lives entirely in the
    /// session itself.
    fn on_timer(&mut self, reactor: &mut Reactor, handle: ConnHandle) {
        let _ = (reactor, handle);
    }
}

/// Placeholder session used only for the instant between inserting a TCP
/// connection into the slab (to learn its [`crate::event::TcpConnId`]) and
/// installing the real, id-aware session via `Reactor::add_tcp_conn_with` /
/// `connect_tcp_with`. Never actually observes an event: both insertion and
/// replacement happen synchronously, with no reactor turn in between.
pub(crate) struct NullSession;

impl Session for NullSession {
    fn on_readable(&mut self, _reactor: &mut Reactor, _handle: ConnHandle) {
        log::error!("NullSession placeholder received an event -- session installation is broken");
    }

    fn on_writable(&mut self, _reactor: &mut Reactor, _handle: ConnHandle) {
        log::error!("NullSession placeholder received an event -- session installation is broken");
    }
}
