//! Errors raised while configuring dialers and while dialing.

use thiserror::Error;

use crate::BoxError;

/// A dialer could not be configured.
///
/// Configuration errors are fatal to the `bootstrap` call which produced them.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The `id` key is required but missing or empty.
    #[error("the dialer id is required")]
    MissingId,

    /// A policy `limit` did not have the form `[window_ms, max_count]`.
    #[error("limit must be [window, count], got {0:?}")]
    InvalidLimit(Vec<i64>),

    /// A `matcher` could not be compiled.
    #[error("invalid matcher: {0}")]
    InvalidMatcher(#[from] regex::Error),

    /// The dialer `type` is not known to the factory.
    #[error("unknown dialer type {0:?}")]
    UnknownType(String),

    /// A key held a value of the wrong shape.
    #[error("invalid option {key:?}: {reason}")]
    InvalidOption {
        /// The offending key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A nested dialer failed to bootstrap.
    #[error("bootstrap dialer {kind:?}: {source}")]
    Dialer {
        /// The `type` of the nested dialer.
        kind: String,
        /// The nested failure.
        #[source]
        source: Box<ConfigError>,
    },

    /// Configuration text was not valid JSON.
    #[error("parse options: {0}")]
    Json(#[from] serde_json::Error),
}

/// A connection could not be established.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DialError {
    /// No dialer claims the identifier.
    #[error("uri({0}) is not supported (no matched dialer)")]
    NoMatch(String),

    /// The retry budget elapsed without a successful connection.
    #[error("dial to {0} timeout")]
    Timeout(String),

    /// The identifier could not be parsed, or lacks a part the dialer needs.
    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri {
        /// The identifier.
        uri: String,
        /// What was missing or malformed.
        reason: &'static str,
    },

    /// I/O error from the underlying connection.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The SOCKS5 proxy refused or garbled the handshake.
    #[error("socks5: {0}")]
    Socks(String),

    /// Error from a dialer outside this crate.
    #[error("connect: {0}")]
    Connect(#[source] BoxError),
}

impl DialError {
    pub(crate) fn invalid_uri(uri: &str, reason: &'static str) -> Self {
        DialError::InvalidUri {
            uri: uri.to_owned(),
            reason,
        }
    }

    /// Whether this error means the retry budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DialError::Timeout(_))
    }

    /// Whether this error means no dialer claimed the identifier.
    pub fn is_no_match(&self) -> bool {
        matches!(self, DialError::NoMatch(_))
    }
}
