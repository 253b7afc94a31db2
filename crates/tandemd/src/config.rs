//! Daemon configuration: defaults, then the TOML file, then flags and env

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::Args;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind: String,
    pub tcp_port: u16,
    pub ws_port: u16,
    pub no_tcp: bool,
    pub no_ws: bool,
    pub log_level: String,
    /// Days an idle session with no connections is kept around
    pub expiry_days: u64,
    pub gc_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            tcp_port: 7070,
            ws_port: 7071,
            no_tcp: false,
            no_ws: false,
            log_level: "info".into(),
            expiry_days: 1,
            gc_interval_secs: 60,
        }
    }
}

impl Config {
    /// Read a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Resolve the effective configuration for `args`
    pub fn load(args: &Args) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.merge(args))
    }

    /// Overlay values given on the command line or through the environment
    pub fn merge(mut self, args: &Args) -> Self {
        if let Some(bind) = &args.bind {
            self.bind = bind.clone();
        }
        if let Some(port) = args.tcp_port {
            self.tcp_port = port;
        }
        if let Some(port) = args.ws_port {
            self.ws_port = port;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(days) = args.expiry_days {
            self.expiry_days = days;
        }
        if let Some(secs) = args.gc_interval_secs {
            self.gc_interval_secs = secs;
        }
        self.no_tcp |= args.no_tcp;
        self.no_ws |= args.no_ws;
        self
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.bind, self.tcp_port)
    }

    pub fn ws_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.bind, self.ws_port)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs.max(1))
    }
}

fn socket_addr(bind: &str, port: u16) -> Result<SocketAddr> {
    format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))
}
