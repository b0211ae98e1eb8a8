use std::os::unix::io::RawFd;

use log::error;
use nix::sys::epoll::{epoll_create1, epoll_ctl, epoll_wait, EpollCreateFlags, EpollEvent, EpollFlags, EpollOp};
use nix::unistd::close;

use status::Status;

/// Which half of a fd's readiness the caller wants to hear about.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };
    pub const BOTH: Interest = Interest { read: true, write: true };
    pub const NONE: Interest = Interest { read: false, write: false };
}

/// Reads and clears `SO_ERROR` on `fd` via `getsockopt`, the socket-level
/// mechanism `recv`/`send` themselves use internally to surface the pending
/// error behind an `EPOLLERR`/`EPOLLHUP` notification. Returns 0 (no error)
/// if the option can't be read at all, which can only happen if `fd` is not
/// actually a socket.
pub fn read_socket_error(fd: RawFd) -> i32 {
    let mut errno: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut errno as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 {
        errno
    } else {
        0
    }
}

/// One fd's worth of readiness reported by a poll.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ReadyEvent {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
    /// `EPOLLHUP`/`EPOLLERR` (or the kqueue equivalent): the reactor treats
    /// this as "try the read/write path anyway and let the syscall report
    /// the real error".
    pub error: bool,
}

/// Abstracts the OS readiness facility so a second backend (kqueue, say)
/// can be added later without touching the reactor's event-owner bookkeeping.
pub trait ReactorBackend {
    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<(), Status>;
    fn modify(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<(), Status>;
    fn deregister(&mut self, fd: RawFd) -> Result<(), Status>;
    /// Blocks for up to `timeout_ms` (or indefinitely if `None`) and appends
    /// any ready events to `events_out`.
    fn poll(&mut self, timeout_ms: Option<u64>, events_out: &mut Vec<ReadyEvent>) -> Result<(), Status>;
}

/// Every registration is edge-triggered: callers (`handle_listener_readable`,
/// `handle_udp_readable`, TCP read/write) always drain a fd until it reports
/// `EAGAIN`/`WouldBlock` rather than relying on repeated level-triggered
/// wakeups, matching §1's "edge-triggered" requirement.
fn interest_to_flags(interest: Interest) -> EpollFlags {
    let mut flags = EpollFlags::EPOLLET;
    if interest.read {
        flags |= EpollFlags::EPOLLIN;
    }
    if interest.write {
        flags |= EpollFlags::EPOLLOUT;
    }
    flags
}

pub struct EpollBackend {
    epoll_fd: RawFd,
    event_buf: Vec<EpollEvent>,
}

impl EpollBackend {
    pub fn new() -> Result<Self, Status> {
        let epoll_fd = epoll_create1(EpollCreateFlags::EPOLL_CLOEXEC).map_err(|e| {
            error!("epoll_create1 failed: {e}");
            Status::Generic
        })?;
        Ok(EpollBackend {
            epoll_fd,
            event_buf: vec![EpollEvent::empty(); 512],
        })
    }
}

impl ReactorBackend for EpollBackend {
    fn register(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<(), Status> {
        let mut event = EpollEvent::new(interest_to_flags(interest), token);
        epoll_ctl(self.epoll_fd, EpollOp::EpollCtlAdd, fd, &mut event).map_err(|e| {
            error!("epoll_ctl(ADD) failed for fd {fd}: {e}");
            Status::Generic
        })
    }

    fn modify(&mut self, fd: RawFd, token: u64, interest: Interest) -> Result<(), Status> {
        let mut event = EpollEvent::new(interest_to_flags(interest), token);
        epoll_ctl(self.epoll_fd, EpollOp::EpollCtlMod, fd, &mut event).map_err(|e| {
            error!("epoll_ctl(MOD) failed for fd {fd}: {e}");
            Status::Generic
        })
    }

    fn deregister(&mut self, fd: RawFd) -> Result<(), Status> {
        // The event argument is ignored by the kernel for EPOLL_CTL_DEL but
        // older kernels require a non-null pointer; pass an empty one.
        let mut event = EpollEvent::empty();
        epoll_ctl(self.epoll_fd, EpollOp::EpollCtlDel, fd, &mut event).map_err(|e| {
            error!("epoll_ctl(DEL) failed for fd {fd}: {e}");
            Status::Generic
        })
    }

    fn poll(&mut self, timeout_ms: Option<u64>, events_out: &mut Vec<ReadyEvent>) -> Result<(), Status> {
        let timeout = match timeout_ms {
            Some(ms) => ms as isize,
            None => -1,
        };
        let count = epoll_wait(self.epoll_fd, &mut self.event_buf, timeout).map_err(|e| {
            if e == nix::errno::Errno::EINTR {
                return Status::WouldBlock;
            }
            error!("epoll_wait failed: {e}");
            Status::Generic
        })?;
        for raw in &self.event_buf[..count] {
            let flags = raw.events();
            events_out.push(ReadyEvent {
                token: raw.data(),
                readable: flags.contains(EpollFlags::EPOLLIN),
                writable: flags.contains(EpollFlags::EPOLLOUT),
                error: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
            });
        }
        Ok(())
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        let _ = close(self.epoll_fd);
    }
}
