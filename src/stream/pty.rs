//! Interactive shell sessions on a pseudo terminal.
//!
//! The pty master is driven by blocking threads. Output is forwarded into one
//! end of an in-memory duplex stream, and bytes written to the other end are
//! fed to the terminal, so a [`PtyStream`] reads and writes like any other
//! async stream.

use std::fmt;
use std::io::{self, Read as _, Write as _};
use std::pin::Pin;
use std::task::{Context, Poll};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::process::contains;

const PTY_BUFFER: usize = 64 * 1024;
const CHUNK: usize = 4096;

/// Terminal geometry, in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 60 }
    }
}

/// A shell running on a pseudo terminal.
///
/// A write containing the close tag fails and kills the shell. The shell is
/// killed when the stream is shut down or dropped.
pub struct PtyStream {
    inner: DuplexStream,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    close_tag: Vec<u8>,
}

impl fmt::Debug for PtyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyStream").field("pid", &self.pid).finish()
    }
}

fn pty_error<E: fmt::Display>(error: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("pty: {error}"))
}

impl PtyStream {
    /// Spawn `command` on a new terminal of `size`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(command: CommandBuilder, size: TermSize) -> io::Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)?;

        let mut child = pair.slave.spawn_command(command).map_err(pty_error)?;
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let mut reader = pair.master.try_clone_reader().map_err(pty_error)?;
        let mut writer = pair.master.take_writer().map_err(pty_error)?;

        let (inner, far) = tokio::io::duplex(PTY_BUFFER);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(16);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        tokio::spawn(async move {
            while let Some(chunk) = output_rx.recv().await {
                if far_write.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            let _ = far_write.shutdown().await;
        });

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(16);
        tokio::spawn(async move {
            let mut buf = vec![0u8; CHUNK];
            loop {
                match far_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if input_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        tokio::task::spawn_blocking(move || {
            while let Some(chunk) = input_rx.blocking_recv() {
                if writer.write_all(&chunk).and_then(|()| writer.flush()).is_err() {
                    break;
                }
            }
        });

        // the master stays open until the shell exits
        let master = pair.master;
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            trace!(?status, "pty shell exited");
            drop(master);
        });

        debug!(?pid, cols = size.cols, rows = size.rows, "pty shell started");
        Ok(Self {
            inner,
            killer,
            pid,
            close_tag: Vec::new(),
        })
    }

    /// Fail writes containing `tag` and kill the shell.
    pub fn with_close_tag(mut self, tag: &[u8]) -> Self {
        self.close_tag = tag.to_vec();
        self
    }

    /// OS process id of the shell.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    fn kill(&mut self) {
        if let Err(error) = self.killer.kill() {
            trace!(%error, "kill pty shell");
        }
    }
}

impl Drop for PtyStream {
    fn drop(&mut self) {
        self.kill();
    }
}

impl AsyncRead for PtyStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PtyStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if contains(buf, &this.close_tag) {
            this.kill();
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        std::task::ready!(Pin::new(&mut this.inner).poll_shutdown(cx))?;
        this.kill();
        Poll::Ready(Ok(()))
    }
}
