//! Dialpool
//!
//! Pluggable connection establishment for tunneling and proxy services.
//!
//! A destination is named by a URI-shaped identifier (`tcp://host:port?bind=...`).
//! A [`Dialer`] claims identifiers it understands and turns them into a live
//! duplex [`Conn`]. Dialers are collected into an ordered [`Pool`], which routes
//! each identifier to the first dialer that claims it, or into a [`Balancer`],
//! which is itself a dialer spreading load over a private set of sub-dialers with
//! rate limiting, eviction and retry.
//!
//! Dialers are built from JSON-shaped [`Options`] through a [`DialerFactory`],
//! which maps a `type` tag to a constructor:
//!
//! ```no_run
//! # use dialpool::{DialerFactory, Options, Pool};
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let options = Options::from_json(r#"{
//!     "dialers": [
//!         {"type": "balance", "id": "upstream", "matcher": "^tcp://.*:443$",
//!          "dialers": [{"type": "socks", "address": "127.0.0.1:1080"}]}
//!     ],
//!     "standard": 1
//! }"#)?;
//!
//! let mut pool = Pool::new(DialerFactory::standard());
//! pool.bootstrap(&options)?;
//!
//! let conn = pool.dial(1, "tcp://echo").await?;
//! # drop(conn);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod dialer;
pub use dialer::balance::Balancer;
pub use dialer::pool::Pool;
pub use dialer::{Dialer, DialerFactory};
pub mod error;
pub use error::{ConfigError, DialError};
pub mod options;
pub use options::Options;
pub mod stream;
pub use stream::Conn;

/// Boxed error type used for foreign dialer failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed future returned by [`Dialer::dial`].
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Formats a value with `Display` inside `Debug` output.
pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
