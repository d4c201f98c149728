//! Child process stdio exposed as a duplex stream.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use encoding_rs::{CoderResult, Decoder, Encoding};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;

/// Telnet interrupt sequence (IAC IP IAC DO TIMING-MARK), sent by clients on Ctrl-C.
pub const CTRL_C: &[u8] = &[255, 244, 255, 253, 6];

/// Reads come from the child's output, writes go to its stdin.
///
/// Written bytes have every occurrence of `strip` removed before they reach
/// the child. A write containing the close tag fails and kills the child.
/// The child is killed when the stream is shut down or dropped.
///
/// With a charset set, the child's output is decoded from it into UTF-8 and
/// everything written is encoded from UTF-8 into it.
#[derive(Debug)]
pub struct ProcessStream {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    strip: Vec<u8>,
    close_tag: Vec<u8>,
    charset: Option<Transcoder>,

    // filtered bytes still owed to stdin, and the caller's length for them
    pending: Vec<u8>,
    pending_len: usize,
}

impl ProcessStream {
    /// Wrap a spawned child. Its stdin and stdout must be piped.
    pub fn new(mut child: Child) -> io::Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child stdout is not piped"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
            strip: Vec::new(),
            close_tag: Vec::new(),
            charset: None,
            pending: Vec::new(),
            pending_len: 0,
        })
    }

    /// Remove `pattern` from everything written to the child.
    pub fn with_strip(mut self, pattern: &[u8]) -> Self {
        self.strip = pattern.to_vec();
        self
    }

    /// Fail writes containing `tag` and kill the child.
    pub fn with_close_tag(mut self, tag: &[u8]) -> Self {
        self.close_tag = tag.to_vec();
        self
    }

    /// Transcode the child's I/O between `encoding` and UTF-8.
    pub fn with_charset(mut self, encoding: &'static Encoding) -> Self {
        self.charset = Some(Transcoder::new(encoding));
        self
    }

    /// OS process id of the child, if it is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) {
        self.stdin = None;
        if let Err(error) = self.child.start_kill() {
            trace!(%error, "kill child");
        } else {
            debug!(pid = ?self.child.id(), "killed child process");
        }
    }
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

fn strip(buf: &[u8], pattern: &[u8]) -> Vec<u8> {
    if pattern.is_empty() {
        return buf.to_vec();
    }

    let mut out = Vec::with_capacity(buf.len());
    let mut i = 0;
    while i < buf.len() {
        if buf[i..].starts_with(pattern) {
            i += pattern.len();
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    out
}

struct Transcoder {
    encoding: &'static Encoding,
    decoder: Decoder,

    // decoded output not yet handed to the reader
    decoded: Vec<u8>,
    offset: usize,
    eof: bool,

    // trailing bytes of an incomplete UTF-8 sequence from the last write
    carry: Vec<u8>,
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

impl Transcoder {
    fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            decoder: encoding.new_decoder_without_bom_handling(),
            decoded: Vec::new(),
            offset: 0,
            eof: false,
            carry: Vec::new(),
        }
    }

    /// Decode a chunk of child output. An empty, final chunk flushes the decoder.
    fn decode(&mut self, mut src: &[u8], last: bool) {
        self.decoded.clear();
        self.offset = 0;
        loop {
            let start = self.decoded.len();
            let room = self
                .decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 16);
            self.decoded.resize(start + room.max(4), 0);

            let (result, read, written, _) =
                self.decoder
                    .decode_to_utf8(src, &mut self.decoded[start..], last);
            self.decoded.truncate(start + written);
            src = &src[read..];

            if let CoderResult::InputEmpty = result {
                break;
            }
        }
    }

    /// Encode written UTF-8, holding back an incomplete trailing sequence.
    fn encode(&mut self, input: &[u8]) -> Vec<u8> {
        self.carry.extend_from_slice(input);
        let complete = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => self.carry.len(),
        };

        let text: Vec<u8> = self.carry.drain(..complete).collect();
        let decoded = String::from_utf8_lossy(&text);
        let (encoded, _, _) = self.encoding.encode(&decoded);
        encoded.into_owned()
    }

    fn take(&mut self, buf: &mut ReadBuf<'_>) -> bool {
        let available = &self.decoded[self.offset..];
        if available.is_empty() {
            return false;
        }
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.offset += n;
        true
    }
}

impl AsyncRead for ProcessStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(charset) = this.charset.as_mut() else {
            return Pin::new(&mut this.stdout).poll_read(cx, buf);
        };

        loop {
            if charset.take(buf) || charset.eof {
                return Poll::Ready(Ok(()));
            }

            let mut raw = [0u8; READ_CHUNK];
            let mut raw = ReadBuf::new(&mut raw);
            ready!(Pin::new(&mut this.stdout).poll_read(cx, &mut raw))?;

            let last = raw.filled().is_empty();
            charset.decode(raw.filled(), last);
            charset.eof = last;
        }
    }
}

impl AsyncWrite for ProcessStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            if contains(buf, &this.close_tag) {
                this.kill();
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
            }

            let stripped = strip(buf, &this.strip);
            this.pending = match this.charset.as_mut() {
                Some(charset) => charset.encode(&stripped),
                None => stripped,
            };
            this.pending_len = buf.len();
        }

        let Some(stdin) = this.stdin.as_mut() else {
            this.pending.clear();
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        };

        while !this.pending.is_empty() {
            match ready!(Pin::new(&mut *stdin).poll_write(cx, &this.pending)) {
                Ok(0) => {
                    this.pending.clear();
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => {
                    this.pending.drain(..n);
                }
                Err(error) => {
                    this.pending.clear();
                    return Poll::Ready(Err(error));
                }
            }
        }

        Poll::Ready(Ok(std::mem::take(&mut this.pending_len)))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(stdin) = this.stdin.as_mut() {
            ready!(Pin::new(stdin).poll_shutdown(cx))?;
        }
        this.kill();
        Poll::Ready(Ok(()))
    }
}
