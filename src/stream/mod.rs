//! Duplex byte streams handed back by dialers.
//!
//! Every dialer returns a [`Conn`], which dispatches [`AsyncRead`] and
//! [`AsyncWrite`] to whichever concrete stream type the dialer produced.
//! Dropping or shutting down a `Conn` closes the underlying connection.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _, ReadBuf};
use tokio::net::TcpStream;
use tracing::trace;

#[cfg(feature = "cmd")]
pub mod process;
#[cfg(feature = "cmd")]
pub use self::process::ProcessStream;
#[cfg(feature = "pty")]
pub mod pty;
#[cfg(feature = "pty")]
pub use self::pty::PtyStream;

/// Any stream which can be carried inside a [`Conn`].
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

#[pin_project(project = ConnCoreProjection)]
enum ConnCore {
    /// A TCP stream, direct or through a proxy.
    Tcp(#[pin] TcpStream),

    /// An in-memory stream.
    Duplex(#[pin] tokio::io::DuplexStream),

    /// The stdio of a child process.
    #[cfg(feature = "cmd")]
    Process(#[pin] ProcessStream),

    /// A shell on a pseudo terminal.
    #[cfg(feature = "pty")]
    Pty(#[pin] PtyStream),

    /// A stream supplied by a dialer outside this crate.
    Boxed(#[pin] Box<dyn Io>),
}

/// A live, bidirectional connection returned by a dialer.
///
/// Effectively implements enum-dispatch for AsyncRead and AsyncWrite
/// around the stream types that dialers produce.
#[pin_project]
pub struct Conn {
    #[pin]
    inner: ConnCore,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ConnCore::Tcp(stream) => f.debug_tuple("Conn::Tcp").field(stream).finish(),
            ConnCore::Duplex(_) => f.debug_tuple("Conn::Duplex").finish(),
            #[cfg(feature = "cmd")]
            ConnCore::Process(stream) => f.debug_tuple("Conn::Process").field(stream).finish(),
            #[cfg(feature = "pty")]
            ConnCore::Pty(stream) => f.debug_tuple("Conn::Pty").field(stream).finish(),
            ConnCore::Boxed(_) => f.debug_tuple("Conn::Boxed").finish(),
        }
    }
}

impl Conn {
    /// Wrap an arbitrary stream.
    pub fn boxed<S: Io + 'static>(stream: S) -> Self {
        Self {
            inner: ConnCore::Boxed(Box::new(stream)),
        }
    }

    /// The TCP stream, if this connection is one.
    pub fn as_tcp(&self) -> Option<&TcpStream> {
        match &self.inner {
            ConnCore::Tcp(stream) => Some(stream),
            _ => None,
        }
    }
}

macro_rules! dispatch_core {
    (pin $driver:ident.$method:ident($($args:expr),*)) => {
        match $driver.project().inner.project() {
            ConnCoreProjection::Tcp(stream) => stream.$method($($args),*),
            ConnCoreProjection::Duplex(stream) => stream.$method($($args),*),
            #[cfg(feature = "cmd")]
            ConnCoreProjection::Process(stream) => stream.$method($($args),*),
            #[cfg(feature = "pty")]
            ConnCoreProjection::Pty(stream) => stream.$method($($args),*),
            ConnCoreProjection::Boxed(stream) => stream.$method($($args),*),
        }
    };
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch_core!(pin self.poll_read(cx, buf))
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        dispatch_core!(pin self.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch_core!(pin self.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        dispatch_core!(pin self.poll_shutdown(cx))
    }
}

impl From<TcpStream> for Conn {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: ConnCore::Tcp(stream),
        }
    }
}

impl From<tokio::io::DuplexStream> for Conn {
    fn from(stream: tokio::io::DuplexStream) -> Self {
        Self {
            inner: ConnCore::Duplex(stream),
        }
    }
}

#[cfg(feature = "cmd")]
impl From<ProcessStream> for Conn {
    fn from(stream: ProcessStream) -> Self {
        Self {
            inner: ConnCore::Process(stream),
        }
    }
}

#[cfg(feature = "pty")]
impl From<PtyStream> for Conn {
    fn from(stream: PtyStream) -> Self {
        Self {
            inner: ConnCore::Pty(stream),
        }
    }
}

/// Copy bytes in both directions between `a` and `b`.
///
/// Both directions run concurrently. As soon as either one reaches EOF or
/// fails, both streams are shut down and the other direction is abandoned.
/// Returns the outcome of the direction that finished first.
pub async fn pipe<A, B>(a: A, b: B) -> io::Result<u64>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let outcome = {
        let forward = tokio::io::copy(&mut a_read, &mut b_write);
        let backward = tokio::io::copy(&mut b_read, &mut a_write);

        tokio::select! {
            res = forward => {
                trace!(?res, "pipe forward finished");
                res
            }
            res = backward => {
                trace!(?res, "pipe backward finished");
                res
            }
        }
    };

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;
    outcome
}
