mod backend;
mod event;
mod reactor;
mod session;
mod slab;
mod write_queue;

pub use backend::{EpollBackend, Interest, ReactorBackend, ReadyEvent};
pub use event::{ConnHandle, EventOwner, TcpConnId, UdpSockId};
pub use reactor::Reactor;
pub use session::Session;
pub use slab::Slab;
pub use timer::TimerId;
pub use write_queue::WriteQueue;
