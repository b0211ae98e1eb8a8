use std::net::IpAddr;

use clap::Parser;

use logger::CliLevel;

/// Command-line surface, mirrored 1:1 onto the external interface table:
/// every option is a long flag, `--name=value` or `--name value`.
#[derive(Debug, Parser)]
#[command(name = "echo-reactor", about = "single-threaded epoll echo/proxy server")]
pub struct CliOptions {
    /// Write logs to this file in append mode; otherwise stdout.
    #[arg(long = "log-file")]
    pub log_file: Option<std::path::PathBuf>,

    /// Minimum level of log record to emit.
    #[arg(long = "log-level", value_enum, default_value = "info")]
    pub log_level: CliLevel,

    /// TCP listener and UDP socket port. Must be nonzero.
    #[arg(long)]
    pub port: u16,

    /// Run as a TCP-to-TCP proxy instead of an echo server.
    #[arg(long)]
    pub proxy: bool,

    /// Upstream address, required when `--proxy` is set.
    #[arg(long = "remote-ip")]
    pub remote_ip: Option<IpAddr>,

    /// Upstream port, required when `--proxy` is set.
    #[arg(long = "remote-port")]
    pub remote_port: Option<u16>,

    /// Accepted but behaviour is reserved; the proxy always speaks TCP to
    /// the upstream today.
    #[arg(long = "remote-use-udp")]
    pub remote_use_udp: bool,
}
