use std::net::SocketAddr;

use anyhow::{bail, Context};
use log::LevelFilter;

use crate::cli::CliOptions;

/// Which session type the server hands out to freshly-accepted connections.
#[derive(Debug, Clone)]
pub enum Mode {
    Echo,
    Proxy {
        remote_addr: SocketAddr,
        /// Accepted on the CLI but not yet acted on; the proxy always
        /// dials the upstream over TCP (see `CliOptions::remote_use_udp`).
        remote_use_udp: bool,
    },
}

/// A validated, immutable configuration value built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub mode: Mode,
    pub log_file: Option<std::path::PathBuf>,
    pub log_level: LevelFilter,
}

impl Settings {
    pub fn from_cli(cli: CliOptions) -> anyhow::Result<Settings> {
        if cli.port == 0 {
            bail!("--port must be nonzero");
        }

        let mode = if cli.proxy {
            let ip = cli
                .remote_ip
                .context("--proxy requires --remote-ip")?;
            let port = cli
                .remote_port
                .context("--proxy requires --remote-port")?;
            if port == 0 {
                bail!("--remote-port must be nonzero");
            }
            Mode::Proxy {
                remote_addr: SocketAddr::new(ip, port),
                remote_use_udp: cli.remote_use_udp,
            }
        } else {
            Mode::Echo
        };

        Ok(Settings {
            port: cli.port,
            mode,
            log_file: cli.log_file,
            log_level: cli.log_level.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> CliOptions {
        CliOptions {
            log_file: None,
            log_level: logger::CliLevel::Info,
            port: 9034,
            proxy: false,
            remote_ip: None,
            remote_port: None,
            remote_use_udp: false,
        }
    }

    #[test]
    fn echo_mode_needs_only_a_port() {
        let settings = Settings::from_cli(base_cli()).unwrap();
        assert!(matches!(settings.mode, Mode::Echo));
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cli = base_cli();
        cli.port = 0;
        assert!(Settings::from_cli(cli).is_err());
    }

    #[test]
    fn proxy_without_remote_ip_is_rejected() {
        let mut cli = base_cli();
        cli.proxy = true;
        cli.remote_port = Some(9100);
        assert!(Settings::from_cli(cli).is_err());
    }

    #[test]
    fn proxy_without_remote_port_is_rejected() {
        let mut cli = base_cli();
        cli.proxy = true;
        cli.remote_ip = Some("127.0.0.1".parse().unwrap());
        assert!(Settings::from_cli(cli).is_err());
    }

    #[test]
    fn proxy_with_both_remote_fields_resolves_the_address() {
        let mut cli = base_cli();
        cli.proxy = true;
        cli.remote_ip = Some("127.0.0.1".parse().unwrap());
        cli.remote_port = Some(9100);
        let settings = Settings::from_cli(cli).unwrap();
        match settings.mode {
            Mode::Proxy { remote_addr, .. } => {
                assert_eq!(remote_addr, "127.0.0.1:9100".parse().unwrap());
            }
            Mode::Echo => panic!("expected proxy mode"),
        }
    }
}
