//! Dialers turn identifiers into connections.
//!
//! A [`Dialer`] is one connection strategy: plain TCP, a SOCKS5 proxy, a child
//! process, an in-memory echo, or a [`Balancer`][balance::Balancer] over other
//! dialers. Dialers are created empty by a [`DialerFactory`], configured once
//! with [`Dialer::bootstrap`], and then shared behind an [`Arc`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, DialError};
use crate::options::Options;
use crate::stream::Conn;
use crate::{BoxFuture, DebugLiteral};

pub mod balance;
#[cfg(feature = "cmd")]
pub mod cmd;
pub mod echo;
#[cfg(any(test, feature = "mocks"))]
pub mod mock;
pub mod pool;
pub mod service;
#[cfg(feature = "socks")]
pub mod socks;
pub mod tcp;
mod uri;

/// A connection strategy.
///
/// `matched` is evaluated on every dispatch attempt, possibly many times while a
/// balancer retries, so it must be cheap and free of side effects. `dial` makes
/// exactly one connection attempt; calls for different sessions are independent.
pub trait Dialer: fmt::Debug + Send + Sync {
    /// Stable name, unique within any collection this dialer is registered in.
    fn name(&self) -> &str;

    /// One-time initialization from a configuration record.
    fn bootstrap(&mut self, options: Options) -> Result<(), ConfigError>;

    /// The record this dialer was bootstrapped with.
    fn options(&self) -> &Options;

    /// Whether this dialer claims `uri`.
    fn matched(&self, uri: &str) -> bool;

    /// Establish one connection to `uri` on behalf of session `sid`.
    fn dial<'a>(&'a self, sid: u64, uri: &'a str) -> BoxFuture<'a, Result<Conn, DialError>>;
}

type Constructor = Arc<dyn Fn(&DialerFactory) -> Box<dyn Dialer> + Send + Sync>;

/// Registry mapping a `type` tag to a dialer constructor.
///
/// The factory is passed to the [`Pool`][pool::Pool] and [`Balancer`][balance::Balancer]
/// at construction, and each constructor receives the factory too, so that
/// nested balancers build their children from the same registry.
#[derive(Clone, Default)]
pub struct DialerFactory {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for DialerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.constructors.keys().collect();
        kinds.sort();
        f.debug_set()
            .entries(kinds.into_iter().map(DebugLiteral))
            .finish()
    }
}

impl DialerFactory {
    /// A factory with no registered types.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A factory with every dialer type this crate provides.
    pub fn standard() -> Self {
        let factory = Self::empty()
            .with("balance", |factory| {
                Box::new(balance::Balancer::new(factory.clone()))
            })
            .with("tcp", |_| Box::new(tcp::TcpDialer::new()))
            .with("echo", |_| Box::new(echo::EchoDialer::new()));

        #[cfg(feature = "socks")]
        let factory = factory.with("socks", |_| Box::new(socks::SocksDialer::new()));

        #[cfg(feature = "cmd")]
        let factory = factory.with("cmd", |_| Box::new(cmd::CmdDialer::new()));

        factory
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, constructor: F)
    where
        F: Fn(&DialerFactory) -> Box<dyn Dialer> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.to_owned(), Arc::new(constructor));
    }

    /// Register `kind`, returning the factory.
    pub fn with<F>(mut self, kind: &str, constructor: F) -> Self
    where
        F: Fn(&DialerFactory) -> Box<dyn Dialer> + Send + Sync + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Construct an un-bootstrapped dialer of type `kind`.
    pub fn create(&self, kind: &str) -> Option<Box<dyn Dialer>> {
        self.constructors
            .get(kind)
            .map(|constructor| constructor(self))
    }

    /// Construct and bootstrap a dialer from a record carrying a `type` key.
    pub fn build(&self, options: Options) -> Result<Arc<dyn Dialer>, ConfigError> {
        let kind = options.str_val("type").to_owned();
        let mut dialer = self
            .create(&kind)
            .ok_or_else(|| ConfigError::UnknownType(kind.clone()))?;

        dialer
            .bootstrap(options)
            .map_err(|error| ConfigError::Dialer {
                kind,
                source: Box::new(error),
            })?;

        Ok(Arc::from(dialer))
    }
}
