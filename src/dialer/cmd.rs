//! Dialer which runs a shell command and connects to its stdio.
//!
//! `tcp://cmd?exec=<command>` spawns `<command>` through the shell. Bytes written
//! to the connection go to the command's stdin; its stdout and stderr are read
//! back, merged. Optional query parameters:
//!
//! - `dir`: working directory for the command.
//! - `LC`: locale naming the character set of the command's I/O, such as
//!   `zh_CN.GBK` or `zh_CN.GB18030`. Output is decoded to UTF-8 and input is
//!   encoded from UTF-8.
//!
//! `exec=bash` instead starts an interactive shell on a pseudo terminal, sized
//! by the `cols` and `rows` parameters (default 80x60).

use std::process::Stdio;

use encoding_rs::Encoding;
use tokio::process::Command;
use tracing::{debug, warn, Instrument as _};
use url::Url;

use super::{uri, Dialer};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::process::{ProcessStream, CTRL_C};
#[cfg(feature = "pty")]
use crate::stream::pty::{PtyStream, TermSize};
use crate::stream::Conn;
use crate::BoxFuture;

/// A dialer which spawns a child process per connection.
///
/// Configuration keys:
///
/// | key | meaning |
/// |---|---|
/// | `shell` | shell used to run commands, default `bash` (`cmd` on Windows) |
/// | `strip` | text removed from everything written to the command, default `"\r"` |
/// | `ps1` | prompt for interactive shells |
#[derive(Debug)]
pub struct CmdDialer {
    shell: String,
    strip: Vec<u8>,
    ps1: Option<String>,
    options: Options,
}

impl Default for CmdDialer {
    fn default() -> Self {
        Self {
            shell: default_shell().to_owned(),
            strip: b"\r".to_vec(),
            ps1: None,
            options: Options::new(),
        }
    }
}

fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "bash"
    }
}

/// The character set named by a locale such as `zh_CN.GBK`.
fn charset(locale: &str) -> Option<&'static Encoding> {
    let label = locale.rsplit('.').next().unwrap_or(locale);
    Encoding::for_label(label.as_bytes())
}

#[cfg(feature = "pty")]
fn term_size(target: &Url) -> TermSize {
    let cell = |key| {
        uri::query_value(target, key)
            .and_then(|value| value.parse::<u16>().ok())
            .filter(|value| *value > 0)
    };
    let default = TermSize::default();
    TermSize {
        cols: cell("cols").unwrap_or(default.cols),
        rows: cell("rows").unwrap_or(default.rows),
    }
}

impl CmdDialer {
    /// Create a command dialer with the default shell.
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, runnable: &str) -> Command {
        let mut command = Command::new(&self.shell);
        if cfg!(windows) {
            command.arg("/C").arg(format!("{runnable} 2>&1"));
        } else {
            command.arg("-c").arg(format!("exec 2>&1; {runnable}"));
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }

    #[cfg(feature = "pty")]
    fn interactive(&self, runnable: &str, target: &Url) -> Result<Option<Conn>, DialError> {
        if runnable != "bash" {
            return Ok(None);
        }

        let mut command = portable_pty::CommandBuilder::new(&self.shell);
        if let Some(dir) = uri::query_value(target, "dir").filter(|dir| !dir.is_empty()) {
            command.cwd(dir);
        }
        if let Some(ps1) = &self.ps1 {
            command.env("PS1", ps1);
        }

        let size = term_size(target);
        debug!(shell = %self.shell, cols = size.cols, rows = size.rows, "cmd interactive dial");
        let stream = PtyStream::spawn(command, size)?.with_close_tag(CTRL_C);
        Ok(Some(Conn::from(stream)))
    }

    #[cfg(not(feature = "pty"))]
    fn interactive(&self, _runnable: &str, _target: &Url) -> Result<Option<Conn>, DialError> {
        Ok(None)
    }
}

impl Dialer for CmdDialer {
    fn name(&self) -> &str {
        "cmd"
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        let shell = options.str_val("shell");
        if !shell.is_empty() {
            self.shell = shell.to_owned();
        }
        if options.get("strip").is_some() {
            self.strip = options.str_val("strip").as_bytes().to_vec();
        }
        self.ps1 = Some(options.str_val("ps1").to_owned()).filter(|ps1| !ps1.is_empty());
        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        uri::parse(uri).is_ok_and(|uri| uri.scheme() == "tcp" && uri.host_str() == Some("cmd"))
    }

    fn dial<'a>(&'a self, sid: u64, uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        let span = tracing::debug_span!("cmd", sid);
        Box::pin(
            async move {
                let target = uri::parse(uri)?;
                let runnable = uri::query_value(&target, "exec")
                    .filter(|exec| !exec.is_empty())
                    .ok_or_else(|| DialError::invalid_uri(uri, "missing exec"))?;

                if let Some(conn) = self.interactive(&runnable, &target)? {
                    return Ok(conn);
                }

                let encoding = match uri::query_value(&target, "LC").filter(|lc| !lc.is_empty()) {
                    None => None,
                    Some(locale) => match charset(&locale) {
                        Some(encoding) if encoding == encoding_rs::UTF_8 => None,
                        Some(encoding) => Some(encoding),
                        None => {
                            warn!(%locale, "unknown charset, passing bytes through");
                            None
                        }
                    },
                };

                let mut command = self.command(&runnable);
                if let Some(dir) = uri::query_value(&target, "dir").filter(|dir| !dir.is_empty()) {
                    command.current_dir(dir);
                }

                debug!(%runnable, "cmd dial");
                let child = command.spawn()?;
                let mut stream = ProcessStream::new(child)?
                    .with_strip(&self.strip)
                    .with_close_tag(CTRL_C);
                if let Some(encoding) = encoding {
                    debug!(charset = encoding.name(), "cmd transcoding");
                    stream = stream.with_charset(encoding);
                }
                Ok(Conn::from(stream))
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_cmd_host() {
        let dialer = CmdDialer::new();
        assert!(dialer.matched("tcp://cmd?exec=ls"));
        assert!(dialer.matched("tcp://cmd"));
        assert!(dialer.matched("tcp://cmd?exec=ls -la"));
        assert!(!dialer.matched("tcp://cmd.example.com:22"));
    }

    #[test]
    fn charset_names() {
        assert_eq!(charset("en_US.UTF-8"), Some(encoding_rs::UTF_8));
        assert_eq!(charset("utf8"), Some(encoding_rs::UTF_8));
        assert_eq!(charset("zh_CN.GBK"), Some(encoding_rs::GBK));
        assert_eq!(charset("zh_CN.GB18030"), Some(encoding_rs::GB18030));
        assert_eq!(charset("C"), None);
    }

    #[cfg(feature = "pty")]
    #[test]
    fn terminal_geometry() {
        let target = uri::parse("tcp://cmd?exec=bash&cols=120&rows=40").unwrap();
        assert_eq!(term_size(&target), TermSize { cols: 120, rows: 40 });

        let target = uri::parse("tcp://cmd?exec=bash&cols=0&rows=x").unwrap();
        assert_eq!(term_size(&target), TermSize::default());
    }

    #[test]
    fn bootstrap_overrides() {
        let mut dialer = CmdDialer::new();
        dialer
            .bootstrap(
                Options::new()
                    .with("shell", "sh")
                    .with("strip", "")
                    .with("ps1", "$ "),
            )
            .unwrap();
        assert_eq!(dialer.shell, "sh");
        assert!(dialer.strip.is_empty());
        assert_eq!(dialer.ps1.as_deref(), Some("$ "));
    }

    #[tokio::test]
    async fn missing_exec() {
        let dialer = CmdDialer::new();
        let err = dialer.dial(1, "tcp://cmd").await.unwrap_err();
        assert!(matches!(err, DialError::InvalidUri { .. }));
    }
}
