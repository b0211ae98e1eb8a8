mod cli;
mod settings;

use std::cell::RefCell;
use std::net::{TcpListener, UdpSocket};
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use log::info;

use cli::CliOptions;
use reactor::{EpollBackend, Reactor, Session};
use session::{EchoSession, ProxySession};
use settings::{Mode, Settings};

/// Upper bound on how long a single `process_events` wait blocks, so the
/// main loop still wakes up to service timers even with nothing else
/// happening on the wire.
const MAX_POLL_MS: u64 = 10_000;

/// Capacity of the timer heap's slot pool -- one slot per live session's
/// idle timer, generously sized for a single-process server.
const TIMER_CAPACITY: usize = 65_536;

/// Per-socket bound on concurrently-queued UDP writes.
const UDP_WRITE_QUEUE_CAPACITY: usize = 1024;

fn main() -> anyhow::Result<()> {
    let cli = CliOptions::parse();
    let settings = Settings::from_cli(cli).context("invalid configuration")?;

    let sink = match &settings.log_file {
        Some(path) => logger::file_sink(path).context("failed to open log file")?,
        None => logger::stdout_sink(),
    };
    logger::init(sink, settings.log_level).context("failed to install logger")?;

    if let Err(e) = run(settings) {
        log::error!("fatal: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let backend = EpollBackend::new().map_err(|e| anyhow::anyhow!("failed to create epoll backend: {e}"))?;
    let mut reactor = Reactor::new(Box::new(backend), TIMER_CAPACITY);

    let bind_addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&bind_addr).with_context(|| format!("failed to bind TCP listener on {bind_addr}"))?;
    let udp_socket = UdpSocket::bind(&bind_addr).with_context(|| format!("failed to bind UDP socket on {bind_addr}"))?;

    match settings.mode {
        Mode::Echo => {
            info!("starting in echo mode on port {}", settings.port);
            reactor
                .add_listener(listener, |reactor, stream, peer| {
                    let session = EchoSession::new() as Rc<RefCell<dyn Session>>;
                    if let Err(e) = reactor.add_tcp_conn(stream, peer, session) {
                        log::warn!("failed to register accepted connection from {peer}: {e}");
                    }
                })
                .map_err(|e| anyhow::anyhow!("failed to register TCP listener: {e}"))?;
            reactor
                .add_udp_sock(
                    udp_socket,
                    || EchoSession::new() as Rc<RefCell<dyn Session>>,
                    UDP_WRITE_QUEUE_CAPACITY,
                )
                .map_err(|e| anyhow::anyhow!("failed to register UDP socket: {e}"))?;
        }
        Mode::Proxy { remote_addr, remote_use_udp } => {
            if remote_use_udp {
                log::debug!("--remote-use-udp was set but is not yet acted on; proxying over TCP");
            }
            info!("starting in proxy mode on port {}, upstream {remote_addr}", settings.port);
            let remote = hashtable::Address::from(remote_addr);
            reactor
                .add_listener(listener, move |reactor, stream, peer| {
                    ProxySession::accept(reactor, stream, peer, remote);
                })
                .map_err(|e| anyhow::anyhow!("failed to register TCP listener: {e}"))?;
            // The UDP socket is bound (matching §6's "bind TCP listener and
            // UDP socket on this port") but proxy mode has no UDP session
            // behavior defined; drop it immediately rather than leak the fd
            // registered with no handler.
            drop(udp_socket);
        }
    }

    loop {
        let timeout = match reactor.next_timer_deadline_ms() {
            Some(deadline) => Some(deadline.saturating_sub(reactor.now_ms()).min(MAX_POLL_MS)),
            None => Some(MAX_POLL_MS),
        };
        if let Err(e) = reactor.process_events(timeout) {
            log::error!("process_events failed: {e}");
        }
        reactor.process_timers();
    }
}
