//! Dialer which connects through a SOCKS5 proxy (RFC 1928, no authentication).
//!
//! The destination host is always sent to the proxy as a domain name, so name
//! resolution happens on the proxy side.

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tracing::{trace, Instrument as _};

use super::{uri, Dialer};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::BoxFuture;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// A dialer which tunnels `scheme://host:port` through a SOCKS5 proxy.
///
/// The proxy is set by the `address` key (`host:port`). Without a proxy address
/// the dialer claims nothing, so an unconfigured instance never shadows later
/// dialers in a pool.
#[derive(Debug, Default)]
pub struct SocksDialer {
    address: String,
    options: Options,
}

impl SocksDialer {
    /// Create a SOCKS dialer with no proxy address; set one with `bootstrap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a SOCKS dialer for the proxy at `address`.
    pub fn with_address<S: Into<String>>(address: S) -> Self {
        let address = address.into();
        Self {
            options: Options::new().with("address", address.as_str()),
            address,
        }
    }

    /// The proxy address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Dialer for SocksDialer {
    fn name(&self) -> &str {
        "Socks"
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        self.address = options.str_val("address").to_owned();
        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        !self.address.is_empty()
            && uri::parse(uri).is_ok_and(|uri| uri.host_str().is_some() && uri.port().is_some())
    }

    fn dial<'a>(&'a self, sid: u64, uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        let span = tracing::trace_span!("socks", sid, uri, proxy = %self.address);
        Box::pin(
            async move {
                let target = uri::parse(uri)?;
                let host = uri::host(&target)
                    .ok_or_else(|| DialError::invalid_uri(uri, "missing host"))?;
                let port = target
                    .port_or_known_default()
                    .ok_or_else(|| DialError::invalid_uri(uri, "missing port"))?;

                if self.address.is_empty() {
                    return Err(DialError::Socks("no proxy address configured".into()));
                }

                let mut stream = TcpStream::connect(self.address.as_str()).await?;
                connect(&mut stream, host, port).await?;
                trace!("socks5 tunnel established");
                Ok(Conn::from(stream))
            }
            .instrument(span),
        )
    }
}

/// Run the SOCKS5 greeting and CONNECT exchange on `stream`.
pub async fn connect<S>(stream: &mut S, host: &str, port: u16) -> Result<(), DialError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let host_len = u8::try_from(host.len())
        .map_err(|_| DialError::Socks(format!("host name too long: {} bytes", host.len())))?;

    stream.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await?;
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting != [VERSION, METHOD_NO_AUTH] {
        return Err(DialError::Socks(format!(
            "unsupported method reply {greeting:02x?}"
        )));
    }

    let mut request = Vec::with_capacity(host.len() + 7);
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host_len]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(DialError::Socks(format!("bad version {:#04x}", head[0])));
    }
    if head[1] != 0x00 {
        return Err(DialError::Socks(format!("connect rejected, rep={:#04x}", head[1])));
    }

    // bound address and port, which we do not use
    let remaining = match head[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => usize::from(stream.read_u8().await?) + 2,
        other => {
            return Err(DialError::Socks(format!(
                "reply address type is not supported: {other}"
            )))
        }
    };
    let mut bound = vec![0u8; remaining];
    stream.read_exact(&mut bound).await?;

    Ok(())
}
