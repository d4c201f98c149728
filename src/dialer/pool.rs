//! Ordered dispatch over a set of dialers.
//!
//! A [`Pool`] routes an identifier to the first registered dialer that claims it.
//! Registration order is the only tie-break: there is no scoring, and a dialer
//! registered early shadows later ones for every identifier it matches.

use std::sync::Arc;

use tracing::{debug, trace, Instrument as _};

use super::{Dialer, DialerFactory};
use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;

/// Types appended by `"standard": 1`, in dispatch order.
///
/// TCP claims any parseable identifier, so it comes last.
const STANDARD_TYPES: &[&str] = &["cmd", "echo", "socks", "tcp"];

/// An ordered collection of dialers dispatching by first match.
#[derive(Debug, Clone)]
pub struct Pool {
    factory: DialerFactory,
    dialers: Vec<Arc<dyn Dialer>>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(DialerFactory::standard())
    }
}

impl Pool {
    /// Create an empty pool which builds configured dialers from `factory`.
    pub fn new(factory: DialerFactory) -> Self {
        Self {
            factory,
            dialers: Vec::new(),
        }
    }

    /// Append already-bootstrapped dialers.
    pub fn add_dialer<D: Dialer + 'static>(&mut self, dialer: D) {
        self.dialers.push(Arc::new(dialer));
    }

    /// Append an already-bootstrapped, shared dialer.
    pub fn add_shared(&mut self, dialer: Arc<dyn Dialer>) {
        self.dialers.push(dialer);
    }

    /// Registered dialers, in dispatch order.
    pub fn dialers(&self) -> &[Arc<dyn Dialer>] {
        &self.dialers
    }

    /// Number of registered dialers.
    pub fn len(&self) -> usize {
        self.dialers.len()
    }

    /// Whether no dialers are registered.
    pub fn is_empty(&self) -> bool {
        self.dialers.is_empty()
    }

    /// Populate the pool from `dialers` records and the `standard` flag.
    ///
    /// Each record is built through the factory by its `type`. Any failure
    /// aborts the whole bootstrap and leaves the pool unchanged.
    pub fn bootstrap(&mut self, options: &Options) -> Result<(), ConfigError> {
        let mut built = Vec::new();
        for option in options.map_list("dialers")? {
            let dialer = self.factory.build(option)?;
            debug!(dialer = dialer.name(), "pool add dialer");
            built.push(dialer);
        }

        if options.int_val_or("standard", 0)? > 0 {
            for kind in STANDARD_TYPES {
                match self.factory.create(kind) {
                    Some(mut dialer) => {
                        dialer
                            .bootstrap(Options::new())
                            .map_err(|error| ConfigError::Dialer {
                                kind: (*kind).to_owned(),
                                source: Box::new(error),
                            })?;
                        built.push(Arc::from(dialer));
                    }
                    None => trace!(kind, "standard dialer not available"),
                }
            }
        }

        self.dialers.extend(built);
        Ok(())
    }

    /// Dial `uri` with the first dialer that claims it.
    pub async fn dial(&self, sid: u64, uri: &str) -> Result<Conn, DialError> {
        let span = tracing::debug_span!("pool", sid, uri);
        async {
            match self.dialers.iter().find(|dialer| dialer.matched(uri)) {
                Some(dialer) => {
                    trace!(dialer = dialer.name(), "pool matched");
                    dialer.dial(sid, uri).await
                }
                None => Err(DialError::NoMatch(uri.to_owned())),
            }
        }
        .instrument(span)
        .await
    }
}
