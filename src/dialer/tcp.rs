//! Direct TCP dialer.
//!
//! This module contains the [`TcpDialer`] type, which connects straight to the
//! host and port named by the identifier:
//!
//! - `tcp://host:port` connects to `host:port`; the port is required.
//! - `http://host` and `https://host` default to ports 80 and 443.
//! - `?bind=ip:port` binds the local end before connecting.
//!
//! Hostnames are resolved with the system resolver, and each resolved address is
//! tried in turn until one connects.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, Instrument as _};
use url::Url;

use super::{uri, Dialer};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::BoxFuture;

/// Configuration for TCP connections.
#[derive(Debug, Clone)]
pub struct TcpDialerConfig {
    /// The timeout for connecting to one remote address.
    pub connect_timeout: Option<Duration>,

    /// Whether to disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for TcpDialerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
        }
    }
}

impl TcpDialerConfig {
    /// Read `connect_timeout` (ms, 0 disables) and `nodelay` (0 disables) from `options`.
    pub fn from_options(options: &Options) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout = options.int_val_or(
            "connect_timeout",
            defaults
                .connect_timeout
                .map_or(0, |timeout| timeout.as_millis() as i64),
        )?;
        let nodelay = match options.get("nodelay") {
            Some(serde_json::Value::Bool(nodelay)) => *nodelay,
            _ => options.int_val_or("nodelay", 1)? != 0,
        };

        Ok(Self {
            connect_timeout: (timeout > 0).then(|| Duration::from_millis(timeout as u64)),
            nodelay,
        })
    }
}

/// A dialer which opens plain TCP connections.
#[derive(Debug, Default)]
pub struct TcpDialer {
    config: TcpDialerConfig,
    options: Options,
}

impl TcpDialer {
    /// Create a TCP dialer with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a TCP dialer with the given configuration.
    pub fn with_config(config: TcpDialerConfig) -> Self {
        Self {
            config,
            options: Options::new(),
        }
    }

    /// Get the configuration for the TCP dialer.
    pub fn config(&self) -> &TcpDialerConfig {
        &self.config
    }

    async fn connect(&self, uri: &str) -> Result<TcpStream, DialError> {
        let target = uri::parse(uri)?;
        let (host, port) = get_host_and_port(uri, &target)?;

        let bind = match uri::query_value(&target, "bind") {
            Some(bind) if !bind.is_empty() => Some(resolve(&bind).await?),
            _ => None,
        };

        let addrs = tokio::net::lookup_host((host, port)).await?;
        let mut last = None;
        for addr in addrs {
            match self.connect_addr(addr, bind).await {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    trace!(%addr, %error, "tcp attempt failed");
                    last = Some(error);
                }
            }
        }

        Err(last
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"))
            .into())
    }

    async fn connect_addr(&self, addr: SocketAddr, bind: Option<SocketAddr>) -> io::Result<TcpStream> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        if let Some(local) = bind {
            if local.is_ipv4() == addr.is_ipv4() {
                socket.set_reuseaddr(true)?;
                socket.bind(local)?;
            }
        }

        let stream = match self.config.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tcp connect timed out"))??,
            None => socket.connect(addr).await?,
        };

        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(stream)
    }
}

impl Dialer for TcpDialer {
    fn name(&self) -> &str {
        "tcp"
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        self.config = TcpDialerConfig::from_options(&options)?;
        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        uri::parse(uri).is_ok()
    }

    fn dial<'a>(&'a self, sid: u64, uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        let span = tracing::trace_span!("tcp", sid, uri);
        Box::pin(
            async move {
                let stream = self.connect(uri).await?;
                if let Ok(peer_addr) = stream.peer_addr() {
                    trace!(peer.addr = %peer_addr, "tcp connected");
                }
                Ok(Conn::from(stream))
            }
            .instrument(span),
        )
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, DialError> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("bind address {addr}")).into())
}

fn get_host_and_port<'u>(raw: &str, uri: &'u Url) -> Result<(&'u str, u16), DialError> {
    let host = uri::host(uri)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| DialError::invalid_uri(raw, "missing host"))?;
    let port = match uri.port() {
        Some(port) => port,
        None => match uri.scheme() {
            "http" => 80,
            "https" => 443,
            _ => return Err(DialError::invalid_uri(raw, "missing port")),
        },
    };

    Ok((host, port))
}
