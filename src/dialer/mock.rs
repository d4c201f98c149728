//! Scripted dialers, suitable for testing dispatch and balancing behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use super::{Dialer, DialerFactory};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::BoxFuture;

/// The error returned by a mock dialer whose successes are used up.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("mock connection error")]
pub struct MockConnectionError;

/// One recorded dial attempt.
#[derive(Debug, Clone)]
pub struct MockAttempt {
    /// Session id passed to `dial`.
    pub sid: u64,
    /// When the attempt started.
    pub at: Instant,
    /// Whether the attempt succeeded.
    pub ok: bool,
}

/// Shared record of every attempt made by mock dialers, keyed by dialer id.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    attempts: Arc<Mutex<HashMap<String, Vec<MockAttempt>>>>,
}

impl MockLog {
    fn record(&self, id: &str, attempt: MockAttempt) {
        self.attempts
            .lock()
            .entry(id.to_owned())
            .or_default()
            .push(attempt);
    }

    /// Attempts made by dialer `id`, in order.
    pub fn attempts(&self, id: &str) -> Vec<MockAttempt> {
        self.attempts.lock().get(id).cloned().unwrap_or_default()
    }

    /// Number of attempts made by dialer `id`.
    pub fn calls(&self, id: &str) -> usize {
        self.attempts.lock().get(id).map_or(0, Vec::len)
    }

    /// Number of successful attempts made by dialer `id`.
    pub fn successes(&self, id: &str) -> usize {
        self.attempts
            .lock()
            .get(id)
            .map_or(0, |attempts| attempts.iter().filter(|a| a.ok).count())
    }

    /// Total attempts across all dialers.
    pub fn total(&self) -> usize {
        self.attempts.lock().values().map(Vec::len).sum()
    }

    /// A factory with a `"mock"` type whose dialers record into this log.
    ///
    /// The standard types are registered as well, so that `"balance"` records
    /// can nest mock dialers.
    pub fn factory(&self) -> DialerFactory {
        let log = self.clone();
        DialerFactory::standard().with("mock", move |_| Box::new(MockDialer::new(log.clone())))
    }
}

/// A dialer with scripted outcomes.
///
/// Configuration keys:
///
/// | key | meaning |
/// |---|---|
/// | `id` | name, required |
/// | `uri` | the only identifier this dialer claims; default all |
/// | `succeed` | successful dials before every later dial fails; default unlimited |
/// | `latency` | ms each dial takes before completing; default 0 |
/// | `fail_remove` | read by the balancer |
///
/// Successful dials return one end of an in-memory duplex stream.
#[derive(Debug)]
pub struct MockDialer {
    id: String,
    options: Options,
    uri: Option<String>,
    succeed: Option<usize>,
    latency: Duration,
    dialed: Mutex<usize>,
    log: MockLog,
}

impl MockDialer {
    /// An un-bootstrapped mock dialer recording into `log`.
    pub fn new(log: MockLog) -> Self {
        Self {
            id: String::new(),
            options: Options::new(),
            uri: None,
            succeed: None,
            latency: Duration::ZERO,
            dialed: Mutex::new(0),
            log,
        }
    }

    /// A mock dialer named `id` which always succeeds.
    pub fn always(id: &str, log: MockLog) -> Self {
        Self::bootstrapped(Options::new().with("id", id), log)
    }

    /// A mock dialer named `id` which always fails, evicted after `fail_remove` failures.
    pub fn failing(id: &str, fail_remove: i64, log: MockLog) -> Self {
        Self::bootstrapped(
            Options::new()
                .with("id", id)
                .with("succeed", 0)
                .with("fail_remove", fail_remove),
            log,
        )
    }

    /// A mock dialer bootstrapped from `options`.
    ///
    /// # Panics
    /// Panics if `options` has no `id`.
    pub fn bootstrapped(options: Options, log: MockLog) -> Self {
        let mut dialer = Self::new(log);
        dialer
            .bootstrap(options)
            .expect("mock dialer options must carry an id");
        dialer
    }
}

impl Dialer for MockDialer {
    fn name(&self) -> &str {
        &self.id
    }

    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError> {
        if options.str_val("id").is_empty() {
            return Err(ConfigError::MissingId);
        }
        self.id = options.str_val("id").to_owned();
        self.uri = Some(options.str_val("uri").to_owned()).filter(|uri| !uri.is_empty());
        self.succeed = match options.int_val_or("succeed", -1)? {
            n if n < 0 => None,
            n => Some(n as usize),
        };
        self.latency = Duration::from_millis(options.int_val_or("latency", 0)?.max(0) as u64);
        self.options = options;
        Ok(())
    }

    fn options(&self) -> &Options {
        &self.options
    }

    fn matched(&self, uri: &str) -> bool {
        self.uri.as_deref().map_or(true, |claimed| claimed == uri)
    }

    fn dial<'a>(&'a self, sid: u64, _uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>> {
        Box::pin(async move {
            let at = Instant::now();
            let ok = {
                let mut dialed = self.dialed.lock();
                *dialed += 1;
                self.succeed.map_or(true, |limit| *dialed <= limit)
            };

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            self.log.record(&self.id, MockAttempt { sid, at, ok });
            if ok {
                let (conn, _) = tokio::io::duplex(64);
                Ok(Conn::from(conn))
            } else {
                Err(DialError::Connect(MockConnectionError.into()))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use static_assertions::assert_impl_all;

    assert_impl_all!(MockConnectionError: std::error::Error, Send, Sync);
    assert_impl_all!(MockDialer: Dialer);

    #[tokio::test]
    async fn scripted_successes() {
        let log = MockLog::default();
        let dialer = MockDialer::bootstrapped(
            Options::new().with("id", "m").with("succeed", 1).with("uri", "once"),
            log.clone(),
        );

        assert!(dialer.matched("once"));
        assert!(!dialer.matched("twice"));

        assert!(dialer.dial(1, "once").await.is_ok());
        assert!(dialer.dial(2, "once").await.is_err());
        assert_eq!(log.calls("m"), 2);
        assert_eq!(log.successes("m"), 1);
        assert_eq!(log.attempts("m")[1].sid, 2);
    }

    #[test]
    fn requires_id() {
        let mut dialer = MockDialer::new(MockLog::default());
        assert!(matches!(
            dialer.bootstrap(Options::new()),
            Err(ConfigError::MissingId)
        ));
    }
}
