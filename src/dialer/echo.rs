//! Loopback dialer: everything written to the connection is read back.

use tokio::io::AsyncWriteExt as _;
use tracing::trace;

use super::{uri, Dialer};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::BoxFuture;

const ECHO_BUFFER: usize = 64 * 1024;

/// Dialer for `tcp://echo`, backed by an in-memory stream.
#[derive(Debug, Default)]
pub struct EchoDialer {
    options: Options,
}

impl EchoDialer {
    /// Create a new echo dialer. It needs no configuration.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Dialer for EchoDialer {
    fn name(&self) -> &str {
        "echo"
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        uri::parse(uri).is_ok_and(|uri| uri.scheme() == "tcp" && uri.host_str() == Some("echo"))
    }

    fn dial<'a>(&'a self, sid: u64, _uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        Box::pin(async move {
            let (conn, remote) = tokio::io::duplex(ECHO_BUFFER);
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(remote);
                let copied = tokio::io::copy(&mut reader, &mut writer).await;
                trace!(sid, ?copied, "echo closed");
                let _ = writer.shutdown().await;
            });
            Ok(Conn::from(conn))
        })
    }
}
