use hashtable::Address;

/// Identifies a TCP connection by its slot in the reactor's connection slab.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TcpConnId(pub usize);

/// Identifies one of the reactor's UDP sockets by slab index.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UdpSockId(pub usize);

/// A stable handle to a connection-like thing a session can read from or
/// write to. A session holds one of these and asks the reactor to act on
/// it, rather than touching file descriptors directly.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ConnHandle {
    Tcp(TcpConnId),
    /// A UDP socket plus the specific peer address a datagram is destined
    /// for or arrived from; the socket itself is shared by every peer.
    Udp(UdpSockId, Address),
}

/// What kind of reactor-owned thing raised a given backend event.
///
/// The backend only ever hands back the raw fd/token it was given at
/// registration, so the reactor keeps this alongside it to know what to do
/// next.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventOwner {
    Listener(usize),
    Tcp(TcpConnId),
    /// A UDP socket is one fd shared by many peers; the backend event fires
    /// per-socket readability/writability, not per-peer.
    UdpSocket(UdpSockId),
}
